//! Video encoding configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "ultrafast";
/// Default encoder thread count
pub const DEFAULT_THREADS: u32 = 1;
/// Default video bitrate
pub const DEFAULT_VIDEO_BITRATE: &str = "2000k";
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";
/// Pixel format accepted by every common player
pub const DEFAULT_PIXEL_FORMAT: &str = "yuv420p";

/// Video encoding configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EncodingConfig {
    /// Video codec (e.g., "libx264", "h264_nvenc")
    #[serde(default = "default_video_codec")]
    pub codec: String,

    /// Encoding preset (e.g., "ultrafast", "faster")
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Encoder threads
    #[serde(default = "default_threads")]
    pub threads: u32,

    /// Target video bitrate (e.g., "2000k")
    #[serde(default = "default_video_bitrate")]
    pub bitrate: String,

    /// Rate-control buffer size (e.g., "4000k")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<String>,

    /// Audio codec
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,

    /// Audio bitrate
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,

    /// Use hardware acceleration (NVENC / VideoToolbox)
    #[serde(default)]
    pub hardware: bool,
}

fn default_video_codec() -> String {
    DEFAULT_VIDEO_CODEC.to_string()
}
fn default_preset() -> String {
    DEFAULT_PRESET.to_string()
}
fn default_threads() -> u32 {
    DEFAULT_THREADS
}
fn default_video_bitrate() -> String {
    DEFAULT_VIDEO_BITRATE.to_string()
}
fn default_audio_codec() -> String {
    DEFAULT_AUDIO_CODEC.to_string()
}
fn default_audio_bitrate() -> String {
    DEFAULT_AUDIO_BITRATE.to_string()
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: default_video_codec(),
            preset: default_preset(),
            threads: DEFAULT_THREADS,
            bitrate: default_video_bitrate(),
            buffer_size: None,
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
            hardware: false,
        }
    }
}

impl EncodingConfig {
    /// Create a new encoding configuration.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.bitrate = bitrate.into();
        self
    }

    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = preset.into();
        self
    }

    pub fn with_buffer_size(mut self, size: impl Into<String>) -> Self {
        self.buffer_size = Some(size.into());
        self
    }

    /// Enable NVENC hardware acceleration.
    pub fn with_nvenc(mut self) -> Self {
        self.hardware = true;
        self.codec = "h264_nvenc".to_string();
        self.preset = "p4".to_string();
        self
    }

    /// Enable VideoToolbox hardware acceleration (macOS).
    pub fn with_videotoolbox(mut self) -> Self {
        self.hardware = true;
        self.codec = "h264_videotoolbox".to_string();
        self
    }

    /// Convert to FFmpeg output arguments for the video and audio streams.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let mut args = vec!["-c:v".to_string(), self.codec.clone()];

        // VideoToolbox has no preset option
        if self.codec != "h264_videotoolbox" {
            args.extend(["-preset".to_string(), self.preset.clone()]);
        }

        args.extend(["-b:v".to_string(), self.bitrate.clone()]);
        if let Some(size) = &self.buffer_size {
            args.extend(["-bufsize".to_string(), size.clone()]);
        }
        if !self.hardware {
            args.extend(["-threads".to_string(), self.threads.to_string()]);
        }

        args.extend([
            "-pix_fmt".to_string(),
            DEFAULT_PIXEL_FORMAT.to_string(),
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-b:a".to_string(),
            self.audio_bitrate.clone(),
        ]);

        args
    }
}
