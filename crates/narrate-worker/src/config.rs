//! Worker configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use narrate_models::{project::DEFAULT_MAX_CHUNK_BYTES, ProjectId};
use narrate_queue::QueueConfig;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// SQLite database file
    pub database_path: PathBuf,
    /// Root for finished videos (one directory per project)
    pub output_dir: PathBuf,
    /// Root for intermediate audio, images and clips
    pub temp_dir: PathBuf,
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Cap on jobs waiting in the queue; `None` for unbounded
    pub queue_max_pending: Option<usize>,
    /// Idle sleep of the dispatch loop
    pub poll_interval: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Speech attempts per chunk (including the first)
    pub tts_retry_count: u32,
    /// Base delay of the speech retry backoff
    pub tts_retry_base_delay: Duration,
    /// Byte ceiling accepted by the speech service
    pub tts_byte_limit: usize,
    /// Speech CLI program
    pub tts_command: String,
    /// Kill ffmpeg invocations running longer than this
    pub ffmpeg_timeout_secs: u64,
    /// Maximum characters of imported text per project
    pub max_project_text_size: usize,
    /// Probe CPU/RAM/GPU for encoder settings
    pub detect_hardware: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/narrate.db"),
            output_dir: PathBuf::from("output"),
            temp_dir: PathBuf::from("temp"),
            max_concurrent_jobs: 5,
            queue_max_pending: None,
            poll_interval: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(30),
            tts_retry_count: 3,
            tts_retry_base_delay: Duration::from_secs(1),
            tts_byte_limit: DEFAULT_MAX_CHUNK_BYTES,
            tts_command: "edge-tts".to_string(),
            ffmpeg_timeout_secs: 3600,
            max_project_text_size: 5_000_000,
            detect_hardware: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_path: std::env::var("NARRATE_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            output_dir: std::env::var("NARRATE_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            temp_dir: std::env::var("NARRATE_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            queue_max_pending: QueueConfig::from_env().max_pending,
            poll_interval: Duration::from_millis(
                std::env::var("WORKER_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            tts_retry_count: std::env::var("TTS_RETRY_COUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.tts_retry_count),
            tts_retry_base_delay: Duration::from_millis(
                std::env::var("TTS_RETRY_BASE_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
            tts_byte_limit: std::env::var("TTS_BYTE_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.tts_byte_limit),
            tts_command: std::env::var("TTS_COMMAND").unwrap_or(defaults.tts_command),
            ffmpeg_timeout_secs: std::env::var("FFMPEG_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.ffmpeg_timeout_secs),
            max_project_text_size: std::env::var("MAX_PROJECT_TEXT_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_project_text_size),
            detect_hardware: std::env::var("WORKER_DETECT_HARDWARE")
                .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(defaults.detect_hardware),
        }
    }

    /// Config rooted in `dir`, for tests and throwaway runs.
    pub fn rooted_at(dir: &Path) -> Self {
        Self {
            database_path: dir.join("narrate.db"),
            output_dir: dir.join("output"),
            temp_dir: dir.join("temp"),
            ..Self::default()
        }
    }

    /// `<temp>/audio/<project>`
    pub fn audio_dir(&self, project_id: ProjectId) -> PathBuf {
        self.temp_dir.join("audio").join(project_id.to_string())
    }

    /// `<temp>/images/<project>`
    pub fn image_dir(&self, project_id: ProjectId) -> PathBuf {
        self.temp_dir.join("images").join(project_id.to_string())
    }

    /// Root of all per-chunk clips.
    pub fn clips_root(&self) -> PathBuf {
        self.temp_dir.join("clips")
    }

    /// `<temp>/clips/<project>`
    pub fn clip_dir(&self, project_id: ProjectId) -> PathBuf {
        self.clips_root().join(project_id.to_string())
    }

    /// Settings of the in-process job queue.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_pending: self.queue_max_pending,
        }
    }

    /// Uploaded custom backgrounds live here until their project is deleted.
    pub fn custom_background_dir(&self) -> PathBuf {
        self.temp_dir.join("images").join("custom_backgrounds")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_dirs() {
        let config = WorkerConfig::rooted_at(Path::new("/srv/narrate"));
        let id = ProjectId(12);
        assert_eq!(config.audio_dir(id), Path::new("/srv/narrate/temp/audio/12"));
        assert_eq!(config.clip_dir(id), Path::new("/srv/narrate/temp/clips/12"));
        assert_eq!(config.image_dir(id), Path::new("/srv/narrate/temp/images/12"));
        assert_eq!(config.database_path, Path::new("/srv/narrate/narrate.db"));
    }

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent_jobs, 5);
        assert_eq!(config.tts_retry_count, 3);
        assert_eq!(config.tts_byte_limit, 4096);
        assert_eq!(config.max_project_text_size, 5_000_000);
        assert!(config.queue_config().max_pending.is_none());
    }
}
