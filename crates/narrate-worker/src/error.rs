//! Worker error types.

use thiserror::Error;

use narrate_models::ProjectId;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Planning failed: {0}")]
    Planning(String),

    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Project {0} has a job in progress")]
    ProjectBusy(ProjectId),

    #[error("{} is held by running process {pid}; remove it if that process is gone", path.display())]
    Locked { pid: u32, path: std::path::PathBuf },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Store error: {0}")]
    Store(#[from] narrate_store::StoreError),

    #[error("Media error: {0}")]
    Media(#[from] narrate_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] narrate_queue::QueueError),

    #[error("Model error: {0}")]
    Model(#[from] narrate_models::ModelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn planning(msg: impl Into<String>) -> Self {
        Self::Planning(msg.into())
    }

    pub fn resource_unavailable(msg: impl Into<String>) -> Self {
        Self::ResourceUnavailable(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Missing inputs or a full disk: continuing with the next unit cannot help.
    pub fn is_resource_failure(&self) -> bool {
        match self {
            WorkerError::ResourceUnavailable(_) => true,
            WorkerError::Media(e) => e.is_resource_failure(),
            WorkerError::Io(e) => e.raw_os_error() == Some(28),
            _ => false,
        }
    }

    /// Submission rejected because the same stage is already waiting.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, WorkerError::Queue(narrate_queue::QueueError::Duplicate(_)))
    }
}
