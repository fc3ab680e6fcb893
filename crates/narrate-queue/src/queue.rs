//! FIFO job queue shared by submitters and the dispatch loop.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::gauge;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use narrate_models::{JobId, JobKind, ProjectId};

use crate::error::{QueueError, QueueResult};
use crate::job::QueueJob;

/// Queue configuration.
#[derive(Debug, Clone, Default)]
pub struct QueueConfig {
    /// Maximum number of waiting jobs; `None` for unbounded
    pub max_pending: Option<usize>,
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_pending: std::env::var("QUEUE_MAX_PENDING")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0),
        }
    }
}

/// Occupancy of a (project, stage) dedup slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Nothing waiting
    Free,
    /// Claimed by a submitter that has not pushed its job yet
    Reserved,
    /// Held by a waiting or dispatching job
    Held(JobId),
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<QueueJob>,
    /// Dedup slots not yet released; `None` while only reserved
    slots: HashMap<String, Option<JobId>>,
    reserved: usize,
}

impl QueueState {
    fn report_len(&self) {
        gauge!("narrate_queue_length").set(self.items.len() as f64);
    }

    /// Check a new claim on `key` against the dedup slots and the cap.
    fn admit(&self, key: &str, max_pending: Option<usize>) -> QueueResult<()> {
        if self.slots.contains_key(key) {
            warn!("Duplicate job rejected: {}", key);
            return Err(QueueError::Duplicate(key.to_string()));
        }
        let waiting = self.items.len() + self.reserved;
        match max_pending {
            Some(max) if waiting >= max => Err(QueueError::Full(waiting)),
            _ => Ok(()),
        }
    }

    fn push(&mut self, job: QueueJob) {
        info!(
            job_id = %job.job_id(),
            project_id = %job.project_id(),
            "Enqueued {} job",
            job.kind()
        );
        self.items.push_back(job);
        self.report_len();
    }
}

/// In-process FIFO of stage jobs.
///
/// A (project, stage) pair is accepted at most once until the consumer
/// [`release`](JobQueue::release)s it, so a job taken off the queue and
/// [`defer`](JobQueue::defer)red keeps its slot. Submitters that must
/// persist a record before the job exists [`reserve`](JobQueue::reserve)
/// the slot first and then [`fill`](JobQueue::fill_reservation) or
/// [`cancel`](JobQueue::cancel_reservation) it.
///
/// Every accepted job counts as unfinished until the consumer calls
/// [`JobQueue::task_done`] (or the job is removed), so a follow-up job
/// enqueued by a running job is counted before its parent finishes.
#[derive(Default)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    config: QueueConfig,
    unfinished: AtomicUsize,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            config,
            unfinished: AtomicUsize::new(0),
        }
    }

    /// Append a job to the tail.
    pub async fn enqueue(&self, job: QueueJob) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        let key = job.idempotency_key();
        state.admit(&key, self.config.max_pending)?;

        state.slots.insert(key, Some(job.job_id()));
        state.push(job);
        self.unfinished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Claim the slot of `(project_id, kind)` ahead of the job itself.
    ///
    /// The reservation counts against the capacity until it is filled or
    /// cancelled.
    pub async fn reserve(&self, project_id: ProjectId, kind: JobKind) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        let key = QueueJob::key_for(project_id, kind);
        state.admit(&key, self.config.max_pending)?;

        debug!("Reserved queue slot {}", key);
        state.slots.insert(key, None);
        state.reserved += 1;
        Ok(())
    }

    /// Push the job for a slot taken with [`JobQueue::reserve`].
    pub async fn fill_reservation(&self, job: QueueJob) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        let key = job.idempotency_key();
        match state.slots.get_mut(&key) {
            Some(slot) if slot.is_none() => *slot = Some(job.job_id()),
            _ => {
                return Err(QueueError::enqueue_failed(format!(
                    "no reservation for {}",
                    key
                )))
            }
        }
        state.reserved = state.reserved.saturating_sub(1);
        state.push(job);
        self.unfinished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Give back a reservation that will not be filled.
    pub async fn cancel_reservation(&self, project_id: ProjectId, kind: JobKind) {
        let mut state = self.state.lock().await;
        let key = QueueJob::key_for(project_id, kind);
        if state.slots.get(&key) == Some(&None) {
            state.slots.remove(&key);
            state.reserved = state.reserved.saturating_sub(1);
            debug!("Cancelled queue reservation {}", key);
        }
    }

    /// Take the job at the head, if any. Its dedup slot stays taken.
    pub async fn dequeue(&self) -> Option<QueueJob> {
        let mut state = self.state.lock().await;
        let job = state.items.pop_front()?;
        state.report_len();
        debug!(job_id = %job.job_id(), "Dequeued job");
        Some(job)
    }

    /// Put a dequeued job back at the tail (its project is busy).
    pub async fn defer(&self, job: QueueJob) {
        let mut state = self.state.lock().await;
        state.items.push_back(job);
        state.report_len();
    }

    /// Free the dedup slot of a dispatched job.
    pub async fn release(&self, job: &QueueJob) {
        let mut state = self.state.lock().await;
        let key = job.idempotency_key();
        if state.slots.get(&key) == Some(&Some(job.job_id())) {
            state.slots.remove(&key);
        }
    }

    /// Remove a waiting job (cancellation before dispatch).
    pub async fn remove(&self, job_id: JobId) -> QueueResult<QueueJob> {
        let mut state = self.state.lock().await;
        let pos = state
            .items
            .iter()
            .position(|j| j.job_id() == job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        let job = state
            .items
            .remove(pos)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        state.slots.remove(&job.idempotency_key());
        state.report_len();
        self.task_done();
        Ok(job)
    }

    /// Mark a dequeued job as finished.
    pub fn task_done(&self) {
        let _ = self
            .unfinished
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Jobs accepted but not yet finished (waiting or executing).
    pub fn unfinished(&self) -> usize {
        self.unfinished.load(Ordering::SeqCst)
    }

    /// Whether a job of `kind` for `project_id` is waiting, reserved or being dispatched.
    pub async fn contains(&self, project_id: ProjectId, kind: JobKind) -> bool {
        self.slot(project_id, kind).await != Slot::Free
    }

    /// Current occupancy of the `(project_id, kind)` slot.
    pub async fn slot(&self, project_id: ProjectId, kind: JobKind) -> Slot {
        let key = QueueJob::key_for(project_id, kind);
        match self.state.lock().await.slots.get(&key) {
            None => Slot::Free,
            Some(None) => Slot::Reserved,
            Some(Some(job_id)) => Slot::Held(*job_id),
        }
    }

    /// Get queue length.
    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.items.is_empty()
    }

    /// Waiting jobs in dispatch order.
    pub async fn snapshot(&self) -> Vec<QueueJob> {
        self.state.lock().await.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(kind: JobKind, job_id: i64, project_id: i64) -> QueueJob {
        QueueJob::for_kind(kind, JobId(job_id), ProjectId(project_id)).unwrap()
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = JobQueue::default();
        queue.enqueue(job(JobKind::AudioSynthesis, 1, 1)).await.unwrap();
        queue.enqueue(job(JobKind::AudioSynthesis, 2, 2)).await.unwrap();
        queue.enqueue(job(JobKind::VideoGeneration, 3, 1)).await.unwrap();

        assert_eq!(queue.len().await, 3);
        assert_eq!(queue.dequeue().await.unwrap().job_id(), JobId(1));
        assert_eq!(queue.dequeue().await.unwrap().job_id(), JobId(2));
        assert_eq!(queue.dequeue().await.unwrap().job_id(), JobId(3));
        assert!(queue.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_rejected_until_released() {
        let queue = JobQueue::default();
        queue.enqueue(job(JobKind::AudioSynthesis, 1, 7)).await.unwrap();
        assert!(matches!(
            queue.enqueue(job(JobKind::AudioSynthesis, 2, 7)).await,
            Err(QueueError::Duplicate(_))
        ));

        let taken = queue.dequeue().await.unwrap();
        assert!(queue.contains(ProjectId(7), JobKind::AudioSynthesis).await);
        assert!(queue.enqueue(job(JobKind::AudioSynthesis, 3, 7)).await.is_err());

        queue.release(&taken).await;
        assert!(!queue.contains(ProjectId(7), JobKind::AudioSynthesis).await);
        queue.enqueue(job(JobKind::AudioSynthesis, 3, 7)).await.unwrap();
    }

    #[tokio::test]
    async fn test_defer_moves_to_tail() {
        let queue = JobQueue::default();
        queue.enqueue(job(JobKind::VideoGeneration, 1, 1)).await.unwrap();
        queue.enqueue(job(JobKind::AudioSynthesis, 2, 2)).await.unwrap();

        let head = queue.dequeue().await.unwrap();
        queue.defer(head).await;
        let order: Vec<JobId> = queue.snapshot().await.iter().map(|j| j.job_id()).collect();
        assert_eq!(order, vec![JobId(2), JobId(1)]);

        // Deferred job keeps its dedup slot
        assert!(queue.enqueue(job(JobKind::VideoGeneration, 5, 1)).await.is_err());
        assert_eq!(queue.unfinished(), 2);
    }

    #[tokio::test]
    async fn test_unfinished_until_task_done() {
        let queue = JobQueue::default();
        queue.enqueue(job(JobKind::AudioSynthesis, 1, 1)).await.unwrap();
        let _running = queue.dequeue().await.unwrap();
        assert!(queue.is_empty().await);
        assert_eq!(queue.unfinished(), 1);

        queue.task_done();
        assert_eq!(queue.unfinished(), 0);
        queue.task_done();
        assert_eq!(queue.unfinished(), 0);
    }

    #[tokio::test]
    async fn test_remove_and_capacity() {
        let queue = JobQueue::new(QueueConfig {
            max_pending: Some(1),
        });
        queue.enqueue(job(JobKind::AudioSynthesis, 1, 1)).await.unwrap();
        assert!(matches!(
            queue.enqueue(job(JobKind::AudioSynthesis, 2, 2)).await,
            Err(QueueError::Full(1))
        ));

        let removed = tokio_test::assert_ok!(queue.remove(JobId(1)).await);
        assert_eq!(removed.project_id(), ProjectId(1));
        assert!(queue.is_empty().await);
        tokio_test::assert_err!(queue.remove(JobId(1)).await);
        tokio_test::assert_ok!(queue.enqueue(job(JobKind::AudioSynthesis, 2, 2)).await);
    }

    #[tokio::test]
    async fn test_reservation_blocks_duplicates() {
        let queue = JobQueue::default();
        queue.reserve(ProjectId(4), JobKind::AudioSynthesis).await.unwrap();
        assert_eq!(queue.slot(ProjectId(4), JobKind::AudioSynthesis).await, Slot::Reserved);
        assert!(matches!(
            queue.reserve(ProjectId(4), JobKind::AudioSynthesis).await,
            Err(QueueError::Duplicate(_))
        ));
        assert!(queue.enqueue(job(JobKind::AudioSynthesis, 9, 4)).await.is_err());
        assert_eq!(queue.unfinished(), 0);

        queue.fill_reservation(job(JobKind::AudioSynthesis, 1, 4)).await.unwrap();
        assert_eq!(
            queue.slot(ProjectId(4), JobKind::AudioSynthesis).await,
            Slot::Held(JobId(1))
        );
        assert_eq!(queue.unfinished(), 1);
        assert_eq!(queue.len().await, 1);

        // Filling twice has no reservation left to fill
        tokio_test::assert_err!(queue.fill_reservation(job(JobKind::AudioSynthesis, 2, 4)).await);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_cancelled_reservation_frees_slot_and_capacity() {
        let queue = JobQueue::new(QueueConfig {
            max_pending: Some(1),
        });
        queue.reserve(ProjectId(1), JobKind::VideoGeneration).await.unwrap();
        assert!(matches!(
            queue.reserve(ProjectId(2), JobKind::VideoGeneration).await,
            Err(QueueError::Full(1))
        ));

        queue.cancel_reservation(ProjectId(1), JobKind::VideoGeneration).await;
        assert_eq!(queue.slot(ProjectId(1), JobKind::VideoGeneration).await, Slot::Free);
        queue.enqueue(job(JobKind::VideoGeneration, 3, 2)).await.unwrap();

        // A held slot is not a reservation
        queue.cancel_reservation(ProjectId(2), JobKind::VideoGeneration).await;
        assert!(queue.contains(ProjectId(2), JobKind::VideoGeneration).await);
    }

    #[tokio::test]
    async fn test_release_ignores_other_holder() {
        let queue = JobQueue::default();
        queue.enqueue(job(JobKind::AudioSynthesis, 1, 3)).await.unwrap();
        let stale = job(JobKind::AudioSynthesis, 8, 3);
        queue.release(&stale).await;
        assert_eq!(
            queue.slot(ProjectId(3), JobKind::AudioSynthesis).await,
            Slot::Held(JobId(1))
        );
    }
}
