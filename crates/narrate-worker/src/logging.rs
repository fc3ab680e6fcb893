//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for job processing with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};

use narrate_models::{JobId, JobKind, ProjectId};

/// Job logger for structured logging with consistent formatting.
///
/// Every line carries the job id, project id and stage.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    project_id: ProjectId,
    kind: JobKind,
}

impl JobLogger {
    /// Create a new job logger for a specific job.
    pub fn new(job_id: JobId, project_id: ProjectId, kind: JobKind) -> Self {
        Self {
            job_id,
            project_id,
            kind,
        }
    }

    /// Log the start of a job operation.
    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            project_id = %self.project_id,
            operation = %self.kind,
            "Job started: {}", message
        );
    }

    /// Log a progress update during job execution.
    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            project_id = %self.project_id,
            operation = %self.kind,
            "Job progress: {}", message
        );
    }

    /// Log a warning during job execution.
    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            project_id = %self.project_id,
            operation = %self.kind,
            "Job warning: {}", message
        );
    }

    /// Log an error during job execution.
    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            project_id = %self.project_id,
            operation = %self.kind,
            "Job error: {}", message
        );
    }

    /// Log the completion of a job operation.
    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            project_id = %self.project_id,
            operation = %self.kind,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            project_id = %self.project_id,
            operation = %self.kind
        )
    }
}
