//! Speech synthesis.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use narrate_models::ProjectConfig;

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{ensure_non_empty, move_file, part_path, remove_file_if_exists};

/// Default speech CLI.
pub const DEFAULT_TTS_PROGRAM: &str = "edge-tts";

/// Parameters of one synthesis call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: String,
    pub rate: String,
    pub pitch: String,
    pub volume: String,
}

impl SpeechRequest {
    /// Request for `text` using the project's voice settings.
    pub fn from_config(text: impl Into<String>, config: &ProjectConfig) -> Self {
        Self {
            text: text.into(),
            voice: config.voice.clone(),
            rate: config.rate.clone(),
            pitch: config.pitch.clone(),
            volume: config.volume.clone(),
        }
    }
}

/// Turns text into an audio file.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `request` into `output` and return the written path.
    async fn synthesize(&self, request: &SpeechRequest, output: &Path) -> MediaResult<PathBuf>;
}

/// [`SpeechSynthesizer`] that shells out to the `edge-tts` CLI.
#[derive(Debug, Clone)]
pub struct EdgeTtsSynthesizer {
    program: String,
    timeout: Duration,
}

impl Default for EdgeTtsSynthesizer {
    fn default() -> Self {
        Self {
            program: DEFAULT_TTS_PROGRAM.to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl EdgeTtsSynthesizer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check that the CLI is on PATH.
    pub fn check(&self) -> MediaResult<PathBuf> {
        which::which(&self.program).map_err(|_| MediaError::ToolNotFound(self.program.clone()))
    }

    /// Arguments for one call. Values are joined with `=` so a leading `-`
    /// (e.g. a rate of `-10%`) is not read as a flag.
    fn build_args(request: &SpeechRequest, output: &Path) -> Vec<String> {
        vec![
            format!("--voice={}", request.voice),
            format!("--rate={}", request.rate),
            format!("--pitch={}", request.pitch),
            format!("--volume={}", request.volume),
            format!("--text={}", request.text),
            format!("--write-media={}", output.to_string_lossy()),
        ]
    }
}

#[async_trait]
impl SpeechSynthesizer for EdgeTtsSynthesizer {
    async fn synthesize(&self, request: &SpeechRequest, output: &Path) -> MediaResult<PathBuf> {
        if request.text.trim().is_empty() {
            return Err(MediaError::speech_failed("empty text", None, None));
        }
        self.check()?;
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let partial = part_path(output);
        let args = Self::build_args(request, &partial);
        debug!("Running {} for {} bytes of text", self.program, request.text.len());

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let result = match tokio::time::timeout(self.timeout, child).await {
            Err(_) => Err(MediaError::Timeout(self.timeout.as_secs())),
            Ok(Err(e)) => Err(MediaError::from(e)),
            Ok(Ok(out)) if !out.status.success() => Err(MediaError::speech_failed(
                format!("{} exited with non-zero status", self.program),
                Some(String::from_utf8_lossy(&out.stderr).trim().to_string()),
                out.status.code(),
            )),
            Ok(Ok(_)) => match ensure_non_empty(&partial).await {
                Ok(()) => move_file(&partial, output).await,
                Err(e) => Err(e),
            },
        };

        if let Err(e) = result {
            let _ = remove_file_if_exists(&partial).await;
            return Err(e);
        }
        Ok(output.to_path_buf())
    }
}
