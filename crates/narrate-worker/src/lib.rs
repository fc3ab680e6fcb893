//! Narration pipeline worker.
//!
//! This crate provides:
//! - Text segmentation under a byte ceiling
//! - Duration-based grouping of chunks into output videos
//! - Audio-synthesis and video-generation jobs
//! - A scheduler with per-project leases and a bounded worker pool
//! - Startup recovery after an unclean shutdown
//! - The `PipelineService` facade used by front ends

pub mod audio_job;
pub mod config;
pub mod context;
pub mod error;
pub mod grouping;
pub mod lock;
pub mod logging;
pub mod recovery;
pub mod retry;
pub mod scheduler;
pub mod segmenter;
pub mod service;
pub mod video_job;

pub use config::WorkerConfig;
pub use context::{Adopted, Collaborators, PipelineContext};
pub use error::{WorkerError, WorkerResult};
pub use lock::ProcessLock;
pub use logging::JobLogger;
pub use recovery::{reconcile, RecoveryManager, RecoveryReport};
pub use scheduler::Scheduler;
pub use service::PipelineService;
