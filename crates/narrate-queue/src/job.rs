//! Job types for the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use narrate_models::{JobId, JobKind, ProjectId};

/// One queued pass of a pipeline stage over a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageJob {
    /// Persisted job record
    pub job_id: JobId,
    /// Project the stage runs over
    pub project_id: ProjectId,
    /// When the job was queued
    pub created_at: DateTime<Utc>,
}

impl StageJob {
    pub fn new(job_id: JobId, project_id: ProjectId) -> Self {
        Self {
            job_id,
            project_id,
            created_at: Utc::now(),
        }
    }
}

/// Jobs the scheduler dispatches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueJob {
    AudioSynthesis(StageJob),
    VideoGeneration(StageJob),
}

impl QueueJob {
    /// Build the queue item for a job of `kind`.
    ///
    /// Returns `None` for kinds that never go through the queue.
    pub fn for_kind(kind: JobKind, job_id: JobId, project_id: ProjectId) -> Option<Self> {
        if !Self::is_queued(kind) {
            return None;
        }
        let stage = StageJob::new(job_id, project_id);
        match kind {
            JobKind::AudioSynthesis => Some(QueueJob::AudioSynthesis(stage)),
            JobKind::VideoGeneration => Some(QueueJob::VideoGeneration(stage)),
            JobKind::TextImport => None,
        }
    }

    /// Whether jobs of `kind` are dispatched through the queue.
    pub fn is_queued(kind: JobKind) -> bool {
        matches!(kind, JobKind::AudioSynthesis | JobKind::VideoGeneration)
    }

    /// Dedup key of the (project, stage) pair.
    pub fn key_for(project_id: ProjectId, kind: JobKind) -> String {
        format!("{}:{}", project_id, kind)
    }

    fn stage(&self) -> &StageJob {
        match self {
            QueueJob::AudioSynthesis(j) | QueueJob::VideoGeneration(j) => j,
        }
    }

    /// Get the job ID.
    pub fn job_id(&self) -> JobId {
        self.stage().job_id
    }

    pub fn project_id(&self) -> ProjectId {
        self.stage().project_id
    }

    pub fn kind(&self) -> JobKind {
        match self {
            QueueJob::AudioSynthesis(_) => JobKind::AudioSynthesis,
            QueueJob::VideoGeneration(_) => JobKind::VideoGeneration,
        }
    }

    /// Get idempotency key: one waiting job per project and stage.
    pub fn idempotency_key(&self) -> String {
        Self::key_for(self.project_id(), self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_serialization() {
        let job = QueueJob::for_kind(JobKind::VideoGeneration, JobId(9), ProjectId(2)).unwrap();
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"type\":\"video_generation\""));

        let parsed: QueueJob = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.job_id(), JobId(9));
        assert_eq!(parsed.kind(), JobKind::VideoGeneration);
        assert_eq!(parsed.idempotency_key(), "2:video_generation");
    }

    #[test]
    fn test_text_import_is_not_queued() {
        assert!(QueueJob::for_kind(JobKind::TextImport, JobId(1), ProjectId(1)).is_none());
        assert!(!QueueJob::is_queued(JobKind::TextImport));
        assert!(QueueJob::is_queued(JobKind::AudioSynthesis));
    }
}
