//! Progress events over an in-process broadcast channel.

use tokio::sync::broadcast;
use tracing::trace;

use narrate_models::{JobId, JobKind, PipelineEvent, PipelineEventKind, ProjectId};

/// Default number of buffered events per subscriber.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Channel for publishing/subscribing to progress events.
///
/// Publishing never blocks; slow subscribers observe `Lagged` and skip ahead.
#[derive(Clone)]
pub struct ProgressChannel {
    sender: broadcast::Sender<PipelineEvent>,
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ProgressChannel {
    /// Create a new progress channel.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Publish a progress event. Events without subscribers are dropped.
    pub fn publish(&self, event: PipelineEvent) {
        trace!(job_id = %event.job_id, "Publishing progress event");
        let _ = self.sender.send(event);
    }

    /// Publish a log message.
    pub fn log(&self, job_id: JobId, project_id: ProjectId, kind: JobKind, message: impl Into<String>) {
        self.publish(PipelineEvent::new(
            job_id,
            project_id,
            kind,
            PipelineEventKind::Log {
                message: message.into(),
            },
        ));
    }

    /// Publish a progress update.
    pub fn progress(&self, job_id: JobId, project_id: ProjectId, kind: JobKind, value: f64) {
        self.publish(PipelineEvent::new(
            job_id,
            project_id,
            kind,
            PipelineEventKind::Progress {
                value: value.clamp(0.0, 100.0),
            },
        ));
    }

    /// Publish done message.
    pub fn done(&self, job_id: JobId, project_id: ProjectId, kind: JobKind) {
        self.publish(PipelineEvent::new(job_id, project_id, kind, PipelineEventKind::Done));
    }

    /// Publish error message.
    pub fn error(&self, job_id: JobId, project_id: ProjectId, kind: JobKind, message: impl Into<String>) {
        self.publish(PipelineEvent::new(
            job_id,
            project_id,
            kind,
            PipelineEventKind::Error {
                message: message.into(),
            },
        ));
    }
}
