//! Project-level operations for front ends (HTTP handlers, the CLI).

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use narrate_media::fs_utils::{remove_dir_if_exists, remove_file_if_exists};
use narrate_models::{
    job::percent, safe_filename, BackgroundMode, EntryStatus, Job, JobId, JobKind, OutputVideo,
    PipelineEvent, Project, ProjectConfig, ProjectId, ProjectProgress, ProjectStatus,
    SynthesisQueueEntry, TextChunk,
};
use narrate_store::StoreError;

use crate::context::{Adopted, PipelineContext};
use crate::error::{WorkerError, WorkerResult};
use crate::recovery::{RecoveryManager, RecoveryReport};
use crate::scheduler::Scheduler;
use crate::segmenter;

/// Facade over the store, the scheduler and the progress channel.
#[derive(Clone)]
pub struct PipelineService {
    ctx: Arc<PipelineContext>,
    scheduler: Arc<Scheduler>,
}

impl PipelineService {
    pub fn new(ctx: Arc<PipelineContext>, scheduler: Arc<Scheduler>) -> Self {
        Self { ctx, scheduler }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Reconcile state left by a previous process. Call before [`Scheduler::start`].
    pub async fn recover(&self) -> WorkerResult<RecoveryReport> {
        RecoveryManager::new(Arc::clone(&self.ctx)).run().await
    }

    /// Create a project and import its text.
    ///
    /// The name must be unique. The text is segmented immediately by a
    /// `text_import` job; audio synthesis is started separately.
    pub async fn create_project(
        &self,
        name: &str,
        description: Option<&str>,
        text: &str,
        config: ProjectConfig,
    ) -> WorkerResult<Project> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WorkerError::invalid_input("project name is required"));
        }
        let chars = text.chars().count();
        if chars > self.ctx.config.max_project_text_size {
            return Err(WorkerError::invalid_input(format!(
                "text has {} characters, limit is {}",
                chars, self.ctx.config.max_project_text_size
            )));
        }
        config.check()?;
        if let Some(source) = custom_background_source(&config) {
            if !tokio::fs::try_exists(source).await.unwrap_or(false) {
                return Err(WorkerError::invalid_input(format!(
                    "custom background {} not found",
                    source.display()
                )));
            }
        }
        if self.ctx.projects.get_by_name(name)?.is_some() {
            return Err(StoreError::already_exists(format!("project named '{}'", name)).into());
        }

        let output_dir = self.ctx.config.output_dir.join(safe_filename(name));
        tokio::fs::create_dir_all(&output_dir).await?;

        let project = self
            .ctx
            .projects
            .create(name, description, &config, &output_dir)?;
        let project = self.adopt_custom_background(project).await?;
        let chunks = self.import_text(&project, text)?;

        info!(project_id = %project.id, "Created project '{}' with {} chunks", name, chunks);
        Ok(project)
    }

    /// Queue an audio-synthesis job.
    pub async fn submit_audio_job(&self, project_id: ProjectId) -> WorkerResult<Job> {
        self.ctx.submit(project_id, JobKind::AudioSynthesis).await
    }

    /// Queue a video-generation job.
    pub async fn submit_video_job(&self, project_id: ProjectId) -> WorkerResult<Job> {
        self.ctx.submit(project_id, JobKind::VideoGeneration).await
    }

    /// Record a pending job for the process that owns dispatch to pick up.
    pub fn request_job(&self, project_id: ProjectId, kind: JobKind) -> WorkerResult<Job> {
        self.ctx.request(project_id, kind)
    }

    /// Queue pending jobs recorded by other processes.
    pub async fn adopt_pending_jobs(&self) -> WorkerResult<Adopted> {
        self.ctx.adopt_pending().await
    }

    /// Re-split the project's text, optionally with a new chunk byte limit.
    ///
    /// Discards audio, clips, plans, finished videos and their records; the
    /// project returns to pending.
    pub async fn resegment(
        &self,
        project_id: ProjectId,
        max_chunk_bytes: Option<usize>,
    ) -> WorkerResult<usize> {
        let mut project = self.ctx.projects.require(project_id)?;
        self.ensure_idle(project_id)?;

        if let Some(bytes) = max_chunk_bytes {
            let config = project.config.clone().with_max_chunk_bytes(bytes);
            config.check()?;
            self.ctx.projects.update_config(project_id, &config)?;
            project.config = config;
        }

        let text = self
            .ctx
            .chunks
            .list(project_id)?
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        for output in self.ctx.outputs.list(project_id)? {
            remove_file_if_exists(&output.path).await?;
        }
        self.ctx.entries.delete_for_project(project_id)?;
        self.ctx.outputs.delete_for_project(project_id)?;
        remove_dir_if_exists(&self.ctx.config.audio_dir(project_id)).await?;
        remove_dir_if_exists(&self.ctx.config.clip_dir(project_id)).await?;

        let chunks = self.import_text(&project, &text)?;
        self.ctx
            .projects
            .update_status(project_id, ProjectStatus::Pending)?;
        info!(project_id = %project_id, "Re-segmented into {} chunks", chunks);
        Ok(chunks)
    }

    /// Delete a project, its rows and every file it produced.
    pub async fn delete_project(&self, project_id: ProjectId) -> WorkerResult<()> {
        let project = self.ctx.projects.require(project_id)?;
        self.ensure_idle(project_id)?;

        for job in self.ctx.queue.snapshot().await {
            if job.project_id() == project_id {
                let _ = self.ctx.queue.remove(job.job_id()).await;
            }
        }

        let config = &self.ctx.config;
        for dir in [
            project.output_dir.clone(),
            config.audio_dir(project_id),
            config.image_dir(project_id),
            config.clip_dir(project_id),
        ] {
            if let Err(e) = remove_dir_if_exists(&dir).await {
                warn!(project_id = %project_id, "Failed to remove {}: {}", dir.display(), e);
            }
        }
        if let Some(copy) = project
            .config
            .custom_background_path
            .as_ref()
            .filter(|p| p.starts_with(config.custom_background_dir()))
        {
            if let Err(e) = remove_file_if_exists(copy).await {
                warn!(project_id = %project_id, "Failed to remove {}: {}", copy.display(), e);
            }
        }

        self.ctx.projects.delete(project_id)?;
        info!(project_id = %project_id, "Deleted project '{}'", project.name);
        Ok(())
    }

    /// Cancel a job that has not started. Returns false once it is running or done.
    pub async fn cancel_job(&self, job_id: JobId) -> WorkerResult<bool> {
        let _ = self.ctx.queue.remove(job_id).await;
        let cancelled = self.ctx.jobs.cancel_if_pending(job_id)?;
        if cancelled {
            info!(job_id = %job_id, "Cancelled job");
        }
        Ok(cancelled)
    }

    pub fn get_project(&self, project_id: ProjectId) -> WorkerResult<Option<Project>> {
        Ok(self.ctx.projects.get(project_id)?)
    }

    pub fn list_projects(&self) -> WorkerResult<Vec<Project>> {
        Ok(self.ctx.projects.list()?)
    }

    pub fn project_jobs(&self, project_id: ProjectId) -> WorkerResult<Vec<Job>> {
        Ok(self.ctx.jobs.list_for_project(project_id)?)
    }

    pub fn project_chunks(&self, project_id: ProjectId) -> WorkerResult<Vec<TextChunk>> {
        Ok(self.ctx.chunks.list(project_id)?)
    }

    pub fn queue_entries(&self, project_id: ProjectId) -> WorkerResult<Vec<SynthesisQueueEntry>> {
        Ok(self.ctx.entries.list(project_id)?)
    }

    pub fn output_videos(&self, project_id: ProjectId) -> WorkerResult<Vec<OutputVideo>> {
        Ok(self.ctx.outputs.list(project_id)?)
    }

    /// Chunk and entry counts with audio and video percentages.
    pub fn project_progress(&self, project_id: ProjectId) -> WorkerResult<ProjectProgress> {
        let project = self.ctx.projects.require(project_id)?;
        let counts = self.ctx.chunks.counts(project_id)?;
        let entries = self.ctx.entries.list(project_id)?;
        let completed_entries = entries
            .iter()
            .filter(|e| e.status == EntryStatus::Completed)
            .count();

        let total_chunks = counts.total();
        Ok(ProjectProgress {
            project_id,
            status: project.status,
            total_chunks,
            pending_chunks: counts.pending,
            synthesizing_chunks: counts.synthesizing,
            completed_chunks: counts.completed,
            failed_chunks: counts.failed,
            audio_progress: if total_chunks == 0 {
                0.0
            } else {
                percent(counts.completed, total_chunks)
            },
            total_entries: entries.len(),
            completed_entries,
            video_progress: if entries.is_empty() {
                0.0
            } else {
                percent(completed_entries, entries.len())
            },
            latest_job: self.ctx.jobs.latest_for_project(project_id)?,
        })
    }

    pub fn running_projects(&self) -> Vec<ProjectId> {
        self.scheduler.running_projects()
    }

    /// Receive every progress event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.ctx.progress.subscribe()
    }

    fn ensure_idle(&self, project_id: ProjectId) -> WorkerResult<()> {
        if self.scheduler.is_running(project_id) {
            return Err(WorkerError::ProjectBusy(project_id));
        }
        Ok(())
    }

    /// Run a `text_import` job: segment `text` and replace the project's chunks.
    fn import_text(&self, project: &Project, text: &str) -> WorkerResult<usize> {
        let job = self.ctx.jobs.create(project.id, JobKind::TextImport)?;
        self.ctx.jobs.start(job.id)?;

        let limit = project
            .config
            .max_chunk_bytes
            .min(self.ctx.config.tts_byte_limit);
        let imported = segmenter::segment(text, limit)
            .and_then(|chunks| Ok(self.ctx.chunks.replace_all(project.id, &chunks)?));

        match imported {
            Ok(count) => {
                self.ctx.jobs.complete(job.id)?;
                Ok(count)
            }
            Err(e) => {
                self.ctx.jobs.fail(job.id, &e.to_string())?;
                Err(e)
            }
        }
    }

    /// Keep a private copy of a custom background so the upload can go away.
    async fn adopt_custom_background(&self, project: Project) -> WorkerResult<Project> {
        let Some(source) = custom_background_source(&project.config) else {
            return Ok(project);
        };

        let file_name = source
            .file_name()
            .map(|n| safe_filename(&n.to_string_lossy()))
            .unwrap_or_else(|| "background".to_string());
        let dir = self.ctx.config.custom_background_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let copy: PathBuf = dir.join(format!("{}_{}", project.id, file_name));
        tokio::fs::copy(source, &copy).await?;

        let mut config = project.config.clone();
        config.custom_background_path = Some(copy);
        self.ctx.projects.update_config(project.id, &config)?;
        Ok(Project { config, ..project })
    }
}

fn custom_background_source(config: &ProjectConfig) -> Option<&std::path::Path> {
    match config.background {
        BackgroundMode::Custom => config.custom_background_path.as_deref(),
        BackgroundMode::Default => None,
    }
}
