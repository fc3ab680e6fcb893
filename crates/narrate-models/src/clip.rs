//! Rendered clip model (intermediate per-chunk video).

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::status::status_strings;
use crate::{ChunkId, ClipId, ProjectId};

/// Clip lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClipStatus {
    /// Placeholder created by the grouping planner
    #[default]
    Pending,
    /// Rendered to disk
    Synthesized,
    /// Folded into an output video
    Merged,
    /// File purged from disk
    Deleted,
}

status_strings!(ClipStatus, "clip status", {
    Pending => "pending",
    Synthesized => "synthesized",
    Merged => "merged",
    Deleted => "deleted",
});

impl ClipStatus {
    /// Whether the clip has already been consumed by an output video.
    pub fn is_consumed(&self) -> bool {
        matches!(self, ClipStatus::Merged | ClipStatus::Deleted)
    }
}

/// A short video of one chunk's audio over a static background.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RenderedClip {
    pub id: ClipId,

    pub project_id: ProjectId,

    /// Source chunk (1:1)
    pub chunk_id: ChunkId,

    pub clip_path: PathBuf,

    #[serde(default)]
    pub status: ClipStatus,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}
