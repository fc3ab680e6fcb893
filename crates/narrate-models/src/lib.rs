//! Shared data models for the narration pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Projects and their per-project configuration
//! - Jobs (one pass of one pipeline stage over a project)
//! - Text chunks, rendered clips and synthesis queue entries
//! - Encoding configuration
//! - Progress snapshots and pipeline events

pub mod chunk;
pub mod clip;
pub mod encoding;
pub mod error;
pub mod event;
pub mod ids;
pub mod job;
pub mod progress;
pub mod project;
pub mod queue_entry;
mod status;
pub mod utils;

// Re-export common types
pub use chunk::{AudioStatus, TextChunk};
pub use clip::{ClipStatus, RenderedClip};
pub use encoding::EncodingConfig;
pub use error::{ModelError, ModelResult};
pub use event::{PipelineEvent, PipelineEventKind};
pub use ids::{ChunkId, ClipId, EntryId, JobId, OutputVideoId, ProjectId};
pub use job::{Job, JobKind, JobStatus};
pub use progress::{ProjectProgress, ProjectSnapshot};
pub use project::{BackgroundMode, Project, ProjectConfig, ProjectStatus, Resolution};
pub use queue_entry::{EntryStatus, OutputVideo, OutputVideoStatus, SynthesisQueueEntry};
pub use utils::safe_filename;
