//! Video-generation job: render, merge and clean up every open queue entry.

use std::path::{Path, PathBuf};

use tracing::{debug, Instrument};

use narrate_media::fs_utils::{is_valid_file, remove_file_if_exists};
use narrate_media::recommend_encoding;
use narrate_models::{
    job::percent, ClipStatus, EncodingConfig, EntryStatus, JobKind, Project, ProjectSnapshot,
    ProjectStatus, SynthesisQueueEntry,
};
use narrate_queue::StageJob;

use crate::context::PipelineContext;
use crate::error::{WorkerError, WorkerResult};
use crate::grouping;
use crate::logging::JobLogger;

/// Inputs shared by every entry of one job.
struct RenderInputs {
    background: PathBuf,
    encoding: EncodingConfig,
}

/// Run one video-generation pass over the project.
pub async fn run(ctx: &PipelineContext, job: &StageJob) -> WorkerResult<()> {
    let logger = JobLogger::new(job.job_id, job.project_id, JobKind::VideoGeneration);
    let span = logger.create_span();
    run_inner(ctx, job, &logger).instrument(span).await
}

async fn run_inner(ctx: &PipelineContext, job: &StageJob, logger: &JobLogger) -> WorkerResult<()> {
    let project = ctx.projects.require(job.project_id)?;
    ctx.projects.update_status(project.id, ProjectStatus::Processing)?;

    let counts = ctx.chunks.counts(project.id)?;
    let snapshot = ProjectSnapshot {
        status: ProjectStatus::Processing,
        total_chunks: counts.total(),
        completed_chunks: counts.completed,
    };
    if !snapshot.audio_complete() {
        return Err(WorkerError::precondition(format!(
            "audio synthesis progress {:.1}% < 100%",
            snapshot.audio_percent().unwrap_or(0.0)
        )));
    }

    // Planning is idempotent; covers projects whose audio job never got this far
    grouping::materialize(ctx, &project).await?;

    let entries = ctx.entries.list(project.id)?;
    let total = entries.len();
    let open: Vec<SynthesisQueueEntry> = entries.into_iter().filter(|e| e.is_open()).collect();
    let mut completed = total - open.len();
    logger.log_start(&format!("{} of {} videos to render", open.len(), total));

    if open.is_empty() {
        ctx.projects.update_status(project.id, ProjectStatus::Completed)?;
        logger.log_completion("all videos already rendered");
        return Ok(());
    }

    let inputs = prepare_inputs(ctx, &project).await?;
    tokio::fs::create_dir_all(&project.output_dir).await?;

    let mut failed = 0usize;
    for entry in &open {
        match render_entry(ctx, &project, entry, &inputs).await {
            Ok(()) => {
                completed += 1;
                logger.log_progress(&format!("video {} done", entry.sequence + 1));
            }
            Err(e) => {
                logger.log_error(&format!("video {} failed: {}", entry.sequence + 1, e));
                ctx.entries.set_status(entry.id, EntryStatus::Pending)?;
                if e.is_resource_failure() {
                    return Err(e);
                }
                failed += 1;
            }
        }

        let value = percent(completed, total);
        ctx.jobs.update_progress(job.job_id, value)?;
        ctx.progress
            .progress(job.job_id, project.id, JobKind::VideoGeneration, value);
    }

    if failed > 0 {
        return Err(WorkerError::job_failed(format!(
            "{} of {} entries failed",
            failed, total
        )));
    }

    ctx.projects.update_status(project.id, ProjectStatus::Completed)?;
    logger.log_completion(&format!("{} videos in {}", total, project.output_dir.display()));
    Ok(())
}

/// Background image and encoder settings, computed once per job.
async fn prepare_inputs(ctx: &PipelineContext, project: &Project) -> WorkerResult<RenderInputs> {
    let background = ctx
        .background
        .prepare(&project.name, &project.config, &ctx.config.image_dir(project.id))
        .await?;
    let encoding = recommend_encoding(
        project.config.resolution,
        project.config.fps,
        &project.config.bitrate,
        ctx.config.detect_hardware,
    )
    .await;
    Ok(RenderInputs {
        background,
        encoding,
    })
}

/// Render missing clips, merge them and retire the intermediates.
async fn render_entry(
    ctx: &PipelineContext,
    project: &Project,
    entry: &SynthesisQueueEntry,
    inputs: &RenderInputs,
) -> WorkerResult<()> {
    ctx.entries.set_status(entry.id, EntryStatus::Synthesizing)?;

    let mut clip_paths = Vec::with_capacity(entry.clip_ids.len());
    for &clip_id in &entry.clip_ids {
        let clip = ctx.clips.require(clip_id)?;
        if is_valid_file(&clip.clip_path).await {
            debug!(clip_id = %clip.id, "Reusing rendered clip");
            if clip.status == ClipStatus::Pending {
                ctx.clips.mark_synthesized(clip.id)?;
            }
        } else {
            let chunk = ctx.chunks.require(clip.chunk_id)?;
            let audio = chunk.audio_path.ok_or_else(|| {
                WorkerError::resource_unavailable(format!("chunk {} has no audio file", chunk.id))
            })?;
            ctx.renderer
                .render_clip(
                    &audio,
                    &inputs.background,
                    &clip.clip_path,
                    project.config.fps,
                    &inputs.encoding,
                )
                .await?;
            ctx.clips.mark_synthesized(clip.id)?;
        }
        clip_paths.push(clip.clip_path);
    }

    ctx.renderer
        .concatenate(&clip_paths, &entry.output_path)
        .await?;
    ctx.outputs.upsert_completed(
        project.id,
        entry.sequence,
        &entry.output_path,
        entry.total_duration,
    )?;

    for (&clip_id, path) in entry.clip_ids.iter().zip(&clip_paths) {
        ctx.clips.mark_merged(clip_id)?;
        retire_clip_file(path).await;
        ctx.clips.mark_deleted(clip_id)?;
    }

    ctx.entries.set_status(entry.id, EntryStatus::Completed)?;
    Ok(())
}

async fn retire_clip_file(path: &Path) {
    if let Err(e) = remove_file_if_exists(path).await {
        // Recovery purges files of merged clips that survive here
        tracing::warn!("Failed to delete merged clip {}: {}", path.display(), e);
    }
}
