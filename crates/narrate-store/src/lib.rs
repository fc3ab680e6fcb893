//! Durable state store for projects, jobs, chunks, clips and queue entries.
//!
//! Backed by a single SQLite file. Every repository method is one
//! independent statement; child rows cascade from their project.

pub mod chunks;
pub mod clips;
pub mod db;
pub mod error;
pub mod jobs;
pub mod output_videos;
pub mod projects;
pub mod queue_entries;
mod row;

pub use chunks::{ChunkCounts, ChunkRepository};
pub use clips::ClipRepository;
pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use jobs::JobRepository;
pub use output_videos::OutputVideoRepository;
pub use projects::ProjectRepository;
pub use queue_entries::QueueEntryRepository;
