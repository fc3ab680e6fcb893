//! Progress events published while jobs run.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{JobId, JobKind, ProjectId};

/// Event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEventKind {
    /// Free-form log line
    Log { message: String },
    /// Progress update (0-100)
    Progress { value: f64 },
    /// Job failed
    Error { message: String },
    /// Job completed
    Done,
}

/// A progress event for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PipelineEvent {
    pub job_id: JobId,
    pub project_id: ProjectId,
    pub job_kind: JobKind,
    #[serde(flatten)]
    pub kind: PipelineEventKind,
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn new(job_id: JobId, project_id: ProjectId, job_kind: JobKind, kind: PipelineEventKind) -> Self {
        Self {
            job_id,
            project_id,
            job_kind,
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Whether this is the last event of its job.
    pub fn is_final(&self) -> bool {
        matches!(
            self.kind,
            PipelineEventKind::Done | PipelineEventKind::Error { .. }
        )
    }
}
