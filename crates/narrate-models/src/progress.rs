//! Aggregated progress views over a project.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::percent;
use crate::{Job, ProjectId, ProjectStatus};

/// The minimal view of a project needed to reconcile it after a crash.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub status: ProjectStatus,
    pub total_chunks: usize,
    pub completed_chunks: usize,
}

impl ProjectSnapshot {
    /// Share of chunks with completed audio, in percent. `None` without chunks.
    pub fn audio_percent(&self) -> Option<f64> {
        if self.total_chunks == 0 {
            return None;
        }
        Some(percent(self.completed_chunks, self.total_chunks))
    }

    /// Whether every chunk has audio (and there is at least one chunk).
    pub fn audio_complete(&self) -> bool {
        self.total_chunks > 0 && self.completed_chunks >= self.total_chunks
    }
}

/// Per-project counts and percentages for status polling.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProjectProgress {
    pub project_id: ProjectId,
    pub status: ProjectStatus,

    pub total_chunks: usize,
    pub pending_chunks: usize,
    pub synthesizing_chunks: usize,
    pub completed_chunks: usize,
    pub failed_chunks: usize,
    /// Audio completion (0-100)
    pub audio_progress: f64,

    pub total_entries: usize,
    pub completed_entries: usize,
    /// Output video completion (0-100)
    pub video_progress: f64,

    /// Most recent job for the project
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_job: Option<Job>,
}

impl ProjectProgress {
    pub fn snapshot(&self) -> ProjectSnapshot {
        ProjectSnapshot {
            status: self.status,
            total_chunks: self.total_chunks,
            completed_chunks: self.completed_chunks,
        }
    }
}
