//! Job scheduler: FIFO dispatch with per-project leases and a bounded pool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use metrics::counter;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use narrate_models::{JobId, JobKind, ProjectId, ProjectStatus};
use narrate_queue::{JobQueue, QueueJob};

use crate::context::PipelineContext;
use crate::error::{WorkerError, WorkerResult};
use crate::{audio_job, video_job};

/// Projects holding a lease, with the job that holds it.
type Leases = Arc<Mutex<HashMap<ProjectId, JobId>>>;

/// Dispatches queued jobs to workers.
///
/// At most one job runs per project; a job whose project is busy goes back
/// to the tail of the queue. At most `max_concurrent_jobs` jobs run at once;
/// the rest wait in the queue.
pub struct Scheduler {
    ctx: Arc<PipelineContext>,
    job_semaphore: Arc<Semaphore>,
    max_concurrent_jobs: usize,
    leases: Leases,
    shutdown: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a new scheduler.
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        let max_concurrent_jobs = ctx.config.max_concurrent_jobs.max(1);
        let (shutdown, _) = watch::channel(false);
        Self {
            ctx,
            job_semaphore: Arc::new(Semaphore::new(max_concurrent_jobs)),
            max_concurrent_jobs,
            leases: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
            dispatcher: Mutex::new(None),
        }
    }

    /// Start the dispatch loop. Calling it again while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let Ok(mut dispatcher) = self.dispatcher.lock() else {
            error!("Scheduler state poisoned; not starting");
            return;
        };
        if dispatcher.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        self.shutdown.send_replace(false);
        info!(
            "Starting scheduler with {} max concurrent jobs",
            self.max_concurrent_jobs
        );
        let scheduler = Arc::clone(self);
        *dispatcher = Some(tokio::spawn(async move {
            if let Err(e) = scheduler.dispatch_loop().await {
                error!("Dispatch loop stopped: {}", e);
            }
        }));
    }

    /// Stop dispatching and wait (up to the shutdown timeout) for running jobs.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let handle = self.dispatcher.lock().ok().and_then(|mut d| d.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        info!("Waiting for in-flight jobs to complete...");
        let timeout = self.ctx.config.shutdown_timeout;
        if tokio::time::timeout(timeout, self.wait_for_jobs()).await.is_err() {
            warn!(
                "{} jobs still running after {:?}",
                self.running_projects().len(),
                timeout
            );
        }
        info!("Scheduler stopped");
    }

    /// Projects with a job currently executing.
    pub fn running_projects(&self) -> Vec<ProjectId> {
        let mut projects: Vec<ProjectId> = lock(&self.leases).keys().copied().collect();
        projects.sort();
        projects
    }

    /// Whether a job of `project_id` is executing.
    pub fn is_running(&self, project_id: ProjectId) -> bool {
        lock(&self.leases).contains_key(&project_id)
    }

    /// Wait until every submitted job, including follow-ups, has finished.
    pub async fn wait_idle(&self) {
        while self.ctx.queue.unfinished() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn dispatch_loop(&self) -> WorkerResult<()> {
        let mut shutdown_rx = self.shutdown.subscribe();
        let poll_interval = self.ctx.config.poll_interval;

        loop {
            if *shutdown_rx.borrow() {
                info!("Shutdown signal received, stopping dispatch");
                return Ok(());
            }

            // Backpressure: hold a permit before taking work off the queue
            let permit = tokio::select! {
                _ = shutdown_rx.changed() => continue,
                permit = Arc::clone(&self.job_semaphore).acquire_owned() => {
                    permit.map_err(|_| WorkerError::job_failed("Semaphore closed"))?
                }
            };

            let Some(job) = self.ctx.queue.dequeue().await else {
                drop(permit);
                idle(&mut shutdown_rx, poll_interval).await;
                continue;
            };

            if !self.try_lease(&job) {
                debug!(
                    job_id = %job.job_id(),
                    project_id = %job.project_id(),
                    "Project busy, deferring job"
                );
                drop(permit);
                self.ctx.queue.defer(job).await;
                idle(&mut shutdown_rx, poll_interval).await;
                continue;
            }
            self.ctx.queue.release(&job).await;

            let guard = LeaseGuard {
                leases: Arc::clone(&self.leases),
                project_id: job.project_id(),
                queue: Arc::clone(&self.ctx.queue),
            };
            let ctx = Arc::clone(&self.ctx);
            tokio::spawn(async move {
                let _permit = permit;
                let _guard = guard;
                let (job_id, project_id, kind) = (job.job_id(), job.project_id(), job.kind());

                let worker = {
                    let ctx = Arc::clone(&ctx);
                    tokio::spawn(async move { execute_job(&ctx, job).await })
                };
                match worker.await {
                    Ok(()) => {}
                    Err(e) if e.is_panic() => {
                        error!(job_id = %job_id, project_id = %project_id, "Job {} panicked", job_id);
                        counter!("narrate_jobs_failed_total", "kind" => kind.as_str()).increment(1);
                        let error = WorkerError::job_failed("worker panicked");
                        record_failure(&ctx, job_id, project_id, kind, &error);
                    }
                    Err(e) => warn!(job_id = %job_id, "Job task cancelled: {}", e),
                }
            });
        }
    }

    fn try_lease(&self, job: &QueueJob) -> bool {
        let mut leases = lock(&self.leases);
        if leases.contains_key(&job.project_id()) {
            return false;
        }
        leases.insert(job.project_id(), job.job_id());
        true
    }

    async fn wait_for_jobs(&self) {
        while self.job_semaphore.available_permits() < self.max_concurrent_jobs {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Releases a project lease and marks the job finished when the job task
/// ends, including by panic.
struct LeaseGuard {
    leases: Leases,
    project_id: ProjectId,
    queue: Arc<JobQueue>,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        lock(&self.leases).remove(&self.project_id);
        self.queue.task_done();
    }
}

/// Lease map guard; a poisoned map is still structurally valid.
fn lock(leases: &Mutex<HashMap<ProjectId, JobId>>) -> MutexGuard<'_, HashMap<ProjectId, JobId>> {
    leases.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn idle(shutdown_rx: &mut watch::Receiver<bool>, poll_interval: Duration) {
    tokio::select! {
        _ = shutdown_rx.changed() => {}
        _ = tokio::time::sleep(poll_interval) => {}
    }
}

/// Run one job and record its terminal state.
async fn execute_job(ctx: &PipelineContext, job: QueueJob) {
    let job_id = job.job_id();
    let project_id = job.project_id();
    let kind = job.kind();

    match ctx.jobs.start(job_id) {
        Ok(true) => {}
        Ok(false) => {
            info!(job_id = %job_id, "Job no longer pending, skipping");
            return;
        }
        Err(e) => {
            error!(job_id = %job_id, "Failed to start job: {}", e);
            return;
        }
    }

    info!(job_id = %job_id, project_id = %project_id, "Executing {} job", kind);
    counter!("narrate_jobs_started_total", "kind" => kind.as_str()).increment(1);
    ctx.progress
        .log(job_id, project_id, kind, format!("{} started", kind));

    let result = match &job {
        QueueJob::AudioSynthesis(stage) => audio_job::run(ctx, stage).await,
        QueueJob::VideoGeneration(stage) => video_job::run(ctx, stage).await,
    };

    match result {
        Ok(()) => {
            info!(job_id = %job_id, "Job {} completed successfully", job_id);
            counter!("narrate_jobs_completed_total", "kind" => kind.as_str()).increment(1);
            if let Err(e) = ctx.jobs.complete(job_id) {
                error!(job_id = %job_id, "Failed to record job completion: {}", e);
            }
            ctx.progress.progress(job_id, project_id, kind, 100.0);
            ctx.progress.done(job_id, project_id, kind);
        }
        Err(e) => {
            error!(job_id = %job_id, project_id = %project_id, "Job {} failed: {}", job_id, e);
            counter!("narrate_jobs_failed_total", "kind" => kind.as_str()).increment(1);
            record_failure(ctx, job_id, project_id, kind, &e);
        }
    }
}

fn record_failure(
    ctx: &PipelineContext,
    job_id: JobId,
    project_id: ProjectId,
    kind: JobKind,
    error: &WorkerError,
) {
    let message = error.to_string();
    if let Err(e) = ctx.jobs.fail(job_id, &message) {
        error!(job_id = %job_id, "Failed to record job failure: {}", e);
    }
    if let Err(e) = ctx.projects.update_status(project_id, ProjectStatus::Failed) {
        error!(project_id = %project_id, "Failed to mark project failed: {}", e);
    }
    ctx.progress.error(job_id, project_id, kind, message);
}
