//! Clip rendering and concatenation.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

use narrate_models::EncodingConfig;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{ensure_non_empty, move_file, part_path, remove_file_if_exists};

/// Renders per-chunk clips and joins them into output videos.
#[async_trait]
pub trait ClipRenderer: Send + Sync {
    /// Render `audio` over the still `image` into `output`.
    async fn render_clip(
        &self,
        audio: &Path,
        image: &Path,
        output: &Path,
        fps: u32,
        encoding: &EncodingConfig,
    ) -> MediaResult<PathBuf>;

    /// Join `clips`, in order, into `output`.
    async fn concatenate(&self, clips: &[PathBuf], output: &Path) -> MediaResult<PathBuf>;
}

/// [`ClipRenderer`] backed by the ffmpeg CLI.
#[derive(Debug, Clone, Default)]
pub struct FfmpegRenderer {
    runner: FfmpegRunner,
}

impl FfmpegRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill ffmpeg invocations running longer than `secs`.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.runner = self.runner.with_timeout(secs);
        self
    }

    /// Write `output` through its `.part` sibling, removing the partial file on failure.
    async fn run_into(&self, cmd: FfmpegCommand, output: &Path) -> MediaResult<PathBuf> {
        let partial = cmd.output_path().to_path_buf();
        let result = async {
            self.runner
                .run_with_progress(&cmd, |p| {
                    trace!(frame = p.frame, out_time_ms = p.out_time_ms, speed = p.speed, "ffmpeg progress");
                })
                .await?;
            ensure_non_empty(&partial).await?;
            move_file(&partial, output).await
        }
        .await;

        if result.is_err() {
            let _ = remove_file_if_exists(&partial).await;
        }
        result.map(|()| output.to_path_buf())
    }
}

#[async_trait]
impl ClipRenderer for FfmpegRenderer {
    async fn render_clip(
        &self,
        audio: &Path,
        image: &Path,
        output: &Path,
        fps: u32,
        encoding: &EncodingConfig,
    ) -> MediaResult<PathBuf> {
        for input in [audio, image] {
            if !input.exists() {
                return Err(MediaError::FileNotFound(input.to_path_buf()));
            }
        }
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let cmd = clip_command(audio, image, &part_path(output), fps, encoding);
        let path = self.run_into(cmd, output).await?;
        metrics::counter!("narrate_clips_rendered_total").increment(1);
        debug!("Rendered clip {}", path.display());
        Ok(path)
    }

    async fn concatenate(&self, clips: &[PathBuf], output: &Path) -> MediaResult<PathBuf> {
        if clips.is_empty() {
            return Err(MediaError::internal("nothing to concatenate"));
        }
        for clip in clips {
            if !clip.exists() {
                return Err(MediaError::FileNotFound(clip.clone()));
            }
        }
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Concat demuxer list; dropped (and deleted) after ffmpeg returns
        let mut list = tempfile::Builder::new()
            .prefix("concat-")
            .suffix(".txt")
            .tempfile()?;
        list.write_all(concat_list(clips).as_bytes())?;
        list.flush()?;

        let cmd = FfmpegCommand::new(part_path(output))
            .input_with_args(["-f", "concat", "-safe", "0"], list.path())
            .stream_copy()
            .faststart();
        let path = self.run_into(cmd, output).await?;

        info!("Merged {} clips into {}", clips.len(), path.display());
        Ok(path)
    }
}

/// Still image looped under the audio track, ending with the audio.
fn clip_command(
    audio: &Path,
    image: &Path,
    output: &Path,
    fps: u32,
    encoding: &EncodingConfig,
) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::new(output)
        .input_with_args(
            ["-loop".to_string(), "1".to_string(), "-framerate".to_string(), fps.to_string()],
            image,
        )
        .input(audio)
        .output_args(encoding.to_ffmpeg_args())
        .output_args(["-r".to_string(), fps.to_string()]);
    if !encoding.hardware {
        cmd = cmd.output_args(["-tune", "stillimage"]);
    }
    cmd.shortest().faststart()
}

/// Concat demuxer input: one `file '<path>'` line per clip.
fn concat_list(clips: &[PathBuf]) -> String {
    clips
        .iter()
        .map(|clip| {
            let escaped = clip.to_string_lossy().replace('\'', r"'\''");
            format!("file '{}'\n", escaped)
        })
        .collect()
}
