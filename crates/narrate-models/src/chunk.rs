//! Text chunk model.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::status::status_strings;
use crate::{ChunkId, ProjectId};

/// Audio synthesis state of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum AudioStatus {
    #[default]
    Pending,
    Synthesizing,
    Completed,
    Failed,
}

status_strings!(AudioStatus, "audio status", {
    Pending => "pending",
    Synthesizing => "synthesizing",
    Completed => "completed",
    Failed => "failed",
});

/// A unit of source text sized to fit one speech-service call.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TextChunk {
    pub id: ChunkId,

    pub project_id: ProjectId,

    /// Dense 0-based position within the project
    pub ordinal: u32,

    pub content: String,

    /// Number of characters in `content`
    pub char_count: u32,

    #[serde(default)]
    pub audio_status: AudioStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<PathBuf>,

    /// Audio length in seconds, cached once known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_duration: Option<f64>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl TextChunk {
    pub fn is_audio_completed(&self) -> bool {
        self.audio_status == AudioStatus::Completed
    }
}
