//! Filesystem helpers for pipeline artifacts.
//!
//! Renders and syntheses write to a `*.part.<ext>` sibling first and are moved
//! into place only once complete, so a final path never holds a truncated
//! file. Moves fall back to copy-and-delete across filesystems.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Marker inserted before the extension of in-progress files.
pub const PART_MARKER: &str = ".part";

/// Sibling path used while `path` is being written: `clip_7.mp4` -> `clip_7.part.mp4`.
pub fn part_path(path: &Path) -> PathBuf {
    let stem = path.file_stem().unwrap_or_default();
    let mut name = OsString::from(stem);
    name.push(PART_MARKER);
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    path.with_file_name(name)
}

/// Whether `path` is an in-progress file left behind by [`part_path`].
pub fn is_part_file(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.ends_with(PART_MARKER))
}

/// A regular, non-empty file.
pub async fn is_valid_file(path: &Path) -> bool {
    match fs::metadata(path).await {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}

/// Fail with [`MediaError::EmptyOutput`] unless `path` is a non-empty file.
pub async fn ensure_non_empty(path: &Path) -> MediaResult<()> {
    if is_valid_file(path).await {
        Ok(())
    } else {
        Err(MediaError::EmptyOutput(path.to_path_buf()))
    }
}

/// Remove a file, treating "already gone" as success. Returns whether it existed.
pub async fn remove_file_if_exists(path: &Path) -> MediaResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Remove a directory tree, treating "already gone" as success.
pub async fn remove_dir_if_exists(path: &Path) -> MediaResult<bool> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Move a file from `src` to `dst`, handling cross-device moves.
///
/// A fast rename is tried first; on EXDEV the file is copied next to `dst`
/// and renamed into place, then the source is removed.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            debug!(
                "Cross-device rename detected, falling back to copy+delete: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Check if an IO error is EXDEV (cross-device link).
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}

async fn copy_and_delete(src: &Path, dst: &Path) -> MediaResult<()> {
    let tmp_dst = part_path(dst);

    fs::copy(src, &tmp_dst).await?;

    if let Err(e) = fs::rename(&tmp_dst, dst).await {
        let _ = fs::remove_file(&tmp_dst).await;
        return Err(e.into());
    }

    if let Err(e) = fs::remove_file(src).await {
        warn!(
            "Failed to remove source file after cross-device move: {}: {}",
            src.display(),
            e
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_part_path_roundtrip() {
        let part = part_path(Path::new("/t/clips/clip_7.mp4"));
        assert_eq!(part, Path::new("/t/clips/clip_7.part.mp4"));
        assert!(is_part_file(&part));
        assert!(!is_part_file(Path::new("/t/clips/clip_7.mp4")));
        assert_eq!(part_path(Path::new("noext")), Path::new("noext.part"));
    }

    #[tokio::test]
    async fn test_move_file_to_subdirectory_overwrites() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("source.txt");
        let dst = dir.path().join("subdir").join("dest.txt");

        fs::write(&src, b"new content").await.unwrap();
        fs::create_dir_all(dst.parent().unwrap()).await.unwrap();
        fs::write(&dst, b"old content").await.unwrap();

        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dst).await.unwrap(), "new content");
    }

    #[tokio::test]
    async fn test_valid_file_and_removal() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("empty.mp3");
        let full = dir.path().join("full.mp3");
        fs::write(&empty, b"").await.unwrap();
        fs::write(&full, b"ID3").await.unwrap();

        assert!(!is_valid_file(&empty).await);
        assert!(is_valid_file(&full).await);
        assert!(!is_valid_file(dir.path()).await);
        assert!(matches!(
            ensure_non_empty(&empty).await,
            Err(MediaError::EmptyOutput(_))
        ));

        assert!(remove_file_if_exists(&full).await.unwrap());
        assert!(!remove_file_if_exists(&full).await.unwrap());
        assert!(remove_dir_if_exists(dir.path()).await.unwrap());
    }

    #[test]
    fn test_is_cross_device_error() {
        assert!(is_cross_device_error(&std::io::Error::from_raw_os_error(18)));
        assert!(!is_cross_device_error(&std::io::Error::from_raw_os_error(2)));
    }
}
