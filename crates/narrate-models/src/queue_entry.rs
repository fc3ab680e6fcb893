//! Synthesis queue entries and the output videos they produce.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::status::status_strings;
use crate::{ClipId, EntryId, OutputVideoId, ProjectId};

/// Queue entry status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    #[default]
    Pending,
    Synthesizing,
    Completed,
}

status_strings!(EntryStatus, "queue entry status", {
    Pending => "pending",
    Synthesizing => "synthesizing",
    Completed => "completed",
});

/// A planned output video and the ordered clips composing it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SynthesisQueueEntry {
    pub id: EntryId,

    pub project_id: ProjectId,

    /// 0-based position among the project's output videos
    pub sequence: u32,

    pub output_path: PathBuf,

    /// Member clips in playback order
    pub clip_ids: Vec<ClipId>,

    /// Sum of member audio durations, in seconds
    pub total_duration: f64,

    #[serde(default)]
    pub status: EntryStatus,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl SynthesisQueueEntry {
    /// Whether the video worker still has to process this entry.
    pub fn is_open(&self) -> bool {
        self.status != EntryStatus::Completed
    }
}

/// Output video status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputVideoStatus {
    #[default]
    Pending,
    Completed,
}

status_strings!(OutputVideoStatus, "output video status", {
    Pending => "pending",
    Completed => "completed",
});

/// A final exported video.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OutputVideo {
    pub id: OutputVideoId,

    pub project_id: ProjectId,

    /// Matches the producing queue entry's sequence
    pub sequence: u32,

    pub path: PathBuf,

    /// Length in seconds
    pub duration: f64,

    #[serde(default)]
    pub status: OutputVideoStatus,

    pub created_at: DateTime<Utc>,
}
