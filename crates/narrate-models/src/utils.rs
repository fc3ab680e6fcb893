//! Small helpers shared across crates.

/// Longest file name produced by [`safe_filename`], in characters.
const MAX_FILENAME_CHARS: usize = 200;

/// Make a user-supplied name safe to use as a file or directory name.
///
/// Path separators and characters reserved on common filesystems become `_`,
/// control characters are dropped, and the result is capped at 200
/// characters. An empty result becomes `untitled`.
pub fn safe_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .take(MAX_FILENAME_CHARS)
        .collect();

    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}
