//! Project model and per-project configuration.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use validator::Validate;

use crate::error::{ModelError, ModelResult};
use crate::status::status_strings;
use crate::ProjectId;

/// Default speech voice.
pub const DEFAULT_VOICE: &str = "zh-CN-XiaoxiaoNeural";
/// Default speech rate adjustment.
pub const DEFAULT_RATE: &str = "+0%";
/// Default speech pitch adjustment.
pub const DEFAULT_PITCH: &str = "+0Hz";
/// Default speech volume adjustment.
pub const DEFAULT_VOLUME: &str = "+0%";
/// Default output frame rate.
pub const DEFAULT_FPS: u32 = 30;
/// Default output video bitrate.
pub const DEFAULT_BITRATE: &str = "2000k";
/// Default output container.
pub const DEFAULT_FORMAT: &str = "mp4";
/// Default target duration of one output video, in seconds.
pub const DEFAULT_TARGET_DURATION_SECS: f64 = 600.0;
/// Byte ceiling of a single speech-service request.
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 4096;

/// Project status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Waiting for a pipeline stage to be triggered
    #[default]
    Pending,
    /// A pipeline stage is running
    Processing,
    /// All output videos were produced
    Completed,
    /// A stage failed; partial progress is kept
    Failed,
    /// Cancelled by the user
    Cancelled,
}

status_strings!(ProjectStatus, "project status", {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

/// Output frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total pixel count of one frame.
    pub fn pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = ModelError;

    /// Parse `WIDTHxHEIGHT`, e.g. `1920x1080`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| ModelError::InvalidResolution(s.to_string()))?;
        let width: u32 = w
            .trim()
            .parse()
            .map_err(|_| ModelError::InvalidResolution(s.to_string()))?;
        let height: u32 = h
            .trim()
            .parse()
            .map_err(|_| ModelError::InvalidResolution(s.to_string()))?;
        if width == 0 || height == 0 {
            return Err(ModelError::InvalidResolution(s.to_string()));
        }
        Ok(Self { width, height })
    }
}

/// Background shown behind the narration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundMode {
    /// Generated title card with the project name
    #[default]
    Default,
    /// User-supplied image, resized to the output resolution
    Custom,
}

/// Per-project pipeline configuration, persisted with the project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct ProjectConfig {
    /// Speech voice name
    #[serde(default = "default_voice")]
    #[validate(length(min = 1))]
    pub voice: String,

    /// Speech rate adjustment (e.g. "+10%")
    #[serde(default = "default_rate")]
    pub rate: String,

    /// Speech pitch adjustment (e.g. "-5Hz")
    #[serde(default = "default_pitch")]
    pub pitch: String,

    /// Speech volume adjustment (e.g. "+0%")
    #[serde(default = "default_volume")]
    pub volume: String,

    /// Output frame size
    #[serde(default)]
    pub resolution: Resolution,

    /// Output frame rate
    #[serde(default = "default_fps")]
    #[validate(range(min = 1, max = 120))]
    pub fps: u32,

    /// Output video bitrate (e.g. "2000k")
    #[serde(default = "default_bitrate")]
    pub bitrate: String,

    /// Output container extension
    #[serde(default = "default_format")]
    #[validate(length(min = 1, max = 8))]
    pub format: String,

    /// Target duration of one output video, in seconds
    #[serde(default = "default_target_duration")]
    #[validate(range(exclusive_min = 0.0, max = 3600.0))]
    pub target_duration_secs: f64,

    /// Background mode
    #[serde(default)]
    pub background: BackgroundMode,

    /// Source image for [`BackgroundMode::Custom`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_background_path: Option<PathBuf>,

    /// Byte ceiling for one text chunk
    #[serde(default = "default_max_chunk_bytes")]
    #[validate(range(min = 4, max = 65536))]
    pub max_chunk_bytes: usize,
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}
fn default_rate() -> String {
    DEFAULT_RATE.to_string()
}
fn default_pitch() -> String {
    DEFAULT_PITCH.to_string()
}
fn default_volume() -> String {
    DEFAULT_VOLUME.to_string()
}
fn default_fps() -> u32 {
    DEFAULT_FPS
}
fn default_bitrate() -> String {
    DEFAULT_BITRATE.to_string()
}
fn default_format() -> String {
    DEFAULT_FORMAT.to_string()
}
fn default_target_duration() -> f64 {
    DEFAULT_TARGET_DURATION_SECS
}
fn default_max_chunk_bytes() -> usize {
    DEFAULT_MAX_CHUNK_BYTES
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            voice: default_voice(),
            rate: default_rate(),
            pitch: default_pitch(),
            volume: default_volume(),
            resolution: Resolution::default(),
            fps: DEFAULT_FPS,
            bitrate: default_bitrate(),
            format: default_format(),
            target_duration_secs: DEFAULT_TARGET_DURATION_SECS,
            background: BackgroundMode::Default,
            custom_background_path: None,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
        }
    }
}

impl ProjectConfig {
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_target_duration(mut self, secs: f64) -> Self {
        self.target_duration_secs = secs;
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_max_chunk_bytes(mut self, bytes: usize) -> Self {
        self.max_chunk_bytes = bytes;
        self
    }

    /// Use a custom background image.
    pub fn with_custom_background(mut self, path: impl Into<PathBuf>) -> Self {
        self.background = BackgroundMode::Custom;
        self.custom_background_path = Some(path.into());
        self
    }

    /// Validate field ranges and cross-field rules.
    pub fn check(&self) -> ModelResult<()> {
        self.validate()
            .map_err(|e| ModelError::invalid_config(e.to_string()))?;
        if !self.target_duration_secs.is_finite() {
            return Err(ModelError::invalid_config(
                "target_duration_secs must be finite",
            ));
        }
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(ModelError::InvalidResolution(self.resolution.to_string()));
        }
        if self.background == BackgroundMode::Custom && self.custom_background_path.is_none() {
            return Err(ModelError::invalid_config(
                "custom background selected without an image path",
            ));
        }
        Ok(())
    }
}

/// A text-to-video project.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Project {
    pub id: ProjectId,

    /// Unique, user-facing name
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub status: ProjectStatus,

    pub config: ProjectConfig,

    /// Directory receiving the final videos
    pub output_dir: PathBuf,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Whether a stage is currently running for this project.
    pub fn is_processing(&self) -> bool {
        self.status == ProjectStatus::Processing
    }
}
