//! Media collaborators for the narration pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building and a runner with timeouts
//! - Progress parsing from `-progress pipe:2`
//! - Clip rendering (audio over a still image) and concatenation
//! - Background image generation
//! - Speech synthesis through the `edge-tts` CLI
//! - Hardware-aware encoder recommendations

pub mod background;
pub mod command;
pub mod error;
pub mod fs_utils;
pub mod hardware;
pub mod probe;
pub mod progress;
pub mod render;
pub mod speech;

pub use background::{BackgroundProvider, FfmpegBackground};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use hardware::{recommend_encoding, GpuEncoder, HardwareProfile};
pub use probe::{probe_duration, probe_media, DurationProbe, FfprobeDuration, MediaInfo};
pub use progress::FfmpegProgress;
pub use render::{ClipRenderer, FfmpegRenderer};
pub use speech::{EdgeTtsSynthesizer, SpeechRequest, SpeechSynthesizer};
