//! In-process job queue.
//!
//! This crate provides:
//! - A FIFO queue of pipeline stage jobs with duplicate rejection
//! - Progress events over a broadcast channel

pub mod error;
pub mod job;
pub mod progress;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use job::{QueueJob, StageJob};
pub use progress::ProgressChannel;
pub use queue::{JobQueue, QueueConfig, Slot};
