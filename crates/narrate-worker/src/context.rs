//! Shared state handed to every job: repositories, collaborators, queue.

use std::sync::Arc;

use tracing::{debug, info};

use narrate_media::{
    BackgroundProvider, ClipRenderer, DurationProbe, EdgeTtsSynthesizer, FfmpegBackground,
    FfmpegRenderer, FfprobeDuration, SpeechSynthesizer,
};
use narrate_models::{Job, JobKind, JobStatus, ProjectId};
use narrate_queue::{JobQueue, ProgressChannel, QueueError, QueueJob, Slot};
use narrate_store::{
    ChunkRepository, ClipRepository, Database, JobRepository, OutputVideoRepository,
    ProjectRepository, QueueEntryRepository,
};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// External services the jobs call.
#[derive(Clone)]
pub struct Collaborators {
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub renderer: Arc<dyn ClipRenderer>,
    pub background: Arc<dyn BackgroundProvider>,
    pub durations: Arc<dyn DurationProbe>,
}

impl Collaborators {
    /// `edge-tts` for speech, ffmpeg/ffprobe for everything else.
    pub fn production(config: &WorkerConfig) -> Self {
        Self {
            speech: Arc::new(EdgeTtsSynthesizer::new(config.tts_command.clone())),
            renderer: Arc::new(FfmpegRenderer::new().with_timeout(config.ffmpeg_timeout_secs)),
            background: Arc::new(FfmpegBackground::new()),
            durations: Arc::new(FfprobeDuration),
        }
    }
}

/// Everything a job needs, shared by `Arc`.
pub struct PipelineContext {
    pub config: WorkerConfig,
    pub projects: ProjectRepository,
    pub jobs: JobRepository,
    pub chunks: ChunkRepository,
    pub clips: ClipRepository,
    pub entries: QueueEntryRepository,
    pub outputs: OutputVideoRepository,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub renderer: Arc<dyn ClipRenderer>,
    pub background: Arc<dyn BackgroundProvider>,
    pub durations: Arc<dyn DurationProbe>,
    pub queue: Arc<JobQueue>,
    pub progress: ProgressChannel,
}

impl PipelineContext {
    pub fn new(config: WorkerConfig, db: Database, collaborators: Collaborators) -> Self {
        Self {
            projects: ProjectRepository::new(db.clone()),
            jobs: JobRepository::new(db.clone()),
            chunks: ChunkRepository::new(db.clone()),
            clips: ClipRepository::new(db.clone()),
            entries: QueueEntryRepository::new(db.clone()),
            outputs: OutputVideoRepository::new(db),
            speech: collaborators.speech,
            renderer: collaborators.renderer,
            background: collaborators.background,
            durations: collaborators.durations,
            queue: Arc::new(JobQueue::new(config.queue_config())),
            progress: ProgressChannel::default(),
            config,
        }
    }

    /// Open the configured database with the production collaborators.
    pub fn open(config: WorkerConfig) -> WorkerResult<Self> {
        let db = Database::open(&config.database_path)?;
        let collaborators = Collaborators::production(&config);
        Ok(Self::new(config, db, collaborators))
    }

    /// Create a pending job of `kind` and queue it.
    ///
    /// Rejected with a duplicate error while the same stage of the project is
    /// still waiting, or a full error when the queue is at capacity; no job
    /// row is created in either case.
    pub async fn submit(&self, project_id: ProjectId, kind: JobKind) -> WorkerResult<Job> {
        self.projects.require(project_id)?;
        ensure_queued(kind)?;
        self.queue.reserve(project_id, kind).await?;

        let job = match self.jobs.create(project_id, kind) {
            Ok(job) => job,
            Err(e) => {
                self.queue.cancel_reservation(project_id, kind).await;
                return Err(e.into());
            }
        };
        let pushed = match QueueJob::for_kind(kind, job.id, project_id) {
            Some(item) => self.queue.fill_reservation(item).await,
            None => Err(QueueError::enqueue_failed(format!("{} jobs are not queued", kind))),
        };
        if let Err(e) = pushed {
            self.queue.cancel_reservation(project_id, kind).await;
            self.jobs.cancel_if_pending(job.id)?;
            return Err(e.into());
        }

        info!(project_id = %project_id, job_id = %job.id, "Submitted {} job", kind);
        Ok(job)
    }

    /// Persist a pending job of `kind` without queueing it.
    ///
    /// The process that owns dispatch picks the row up with
    /// [`PipelineContext::adopt_pending`]. Rejected while a pending job of the
    /// same stage already exists for the project.
    pub fn request(&self, project_id: ProjectId, kind: JobKind) -> WorkerResult<Job> {
        self.projects.require(project_id)?;
        ensure_queued(kind)?;
        if self.jobs.find_pending(project_id, kind)?.is_some() {
            return Err(QueueError::Duplicate(QueueJob::key_for(project_id, kind)).into());
        }

        let job = self.jobs.create(project_id, kind)?;
        info!(project_id = %project_id, job_id = %job.id, "Requested {} job", kind);
        Ok(job)
    }

    /// Queue pending job rows this process does not hold yet.
    ///
    /// Rows of a stage whose slot is held by another job are duplicates and
    /// get cancelled, as do rows of kinds that never go through the queue.
    /// Rows that do not fit a full queue stay pending for the next pass.
    pub async fn adopt_pending(&self) -> WorkerResult<Adopted> {
        let mut adopted = Adopted::default();

        for job in self.jobs.list_by_status(JobStatus::Pending)? {
            let Some(item) = QueueJob::for_kind(job.kind, job.id, job.project_id) else {
                if self.jobs.cancel_if_pending(job.id)? {
                    adopted.cancelled += 1;
                }
                continue;
            };

            match self.queue.slot(job.project_id, job.kind).await {
                Slot::Held(holder) if holder == job.id => {}
                Slot::Reserved => {}
                Slot::Held(holder) => {
                    info!(job_id = %job.id, "Cancelling duplicate of job {}", holder);
                    if self.jobs.cancel_if_pending(job.id)? {
                        adopted.cancelled += 1;
                    }
                }
                Slot::Free => match self.queue.enqueue(item).await {
                    Ok(()) => adopted.requeued += 1,
                    Err(QueueError::Full(waiting)) => {
                        debug!("Queue full with {} jobs; leaving the rest pending", waiting);
                        break;
                    }
                    // Raced with a submitter; the next pass settles it
                    Err(QueueError::Duplicate(_)) => {}
                    Err(e) => return Err(e.into()),
                },
            }
        }

        if adopted.requeued > 0 || adopted.cancelled > 0 {
            info!(
                "Adopted {} pending jobs, cancelled {}",
                adopted.requeued, adopted.cancelled
            );
        }
        Ok(adopted)
    }
}

/// Outcome of [`PipelineContext::adopt_pending`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Adopted {
    pub requeued: usize,
    pub cancelled: usize,
}

fn ensure_queued(kind: JobKind) -> WorkerResult<()> {
    if QueueJob::is_queued(kind) {
        Ok(())
    } else {
        Err(WorkerError::invalid_input(format!("{} jobs are not queued", kind)))
    }
}
