//! Audio-synthesis job: speak every pending chunk, then plan the videos.

use std::path::Path;

use tracing::Instrument;

use narrate_media::SpeechRequest;
use narrate_models::{job::percent, AudioStatus, JobKind, Project, ProjectStatus, TextChunk};
use narrate_queue::{QueueError, StageJob};

use crate::context::PipelineContext;
use crate::error::{WorkerError, WorkerResult};
use crate::grouping;
use crate::logging::JobLogger;
use crate::retry::{retry_async, RetryConfig, RetryResult};

/// Run one audio-synthesis pass over the project.
///
/// Chunks are processed one at a time in ordinal order. A chunk that keeps
/// failing is marked failed and the pass moves on; the job fails at the end
/// if any chunk did.
pub async fn run(ctx: &PipelineContext, job: &StageJob) -> WorkerResult<()> {
    let logger = JobLogger::new(job.job_id, job.project_id, JobKind::AudioSynthesis);
    let span = logger.create_span();
    run_inner(ctx, job, &logger).instrument(span).await
}

async fn run_inner(ctx: &PipelineContext, job: &StageJob, logger: &JobLogger) -> WorkerResult<()> {
    let project = ctx.projects.require(job.project_id)?;
    ctx.projects.update_status(project.id, ProjectStatus::Processing)?;

    // Re-arm chunks left behind by an earlier failed or interrupted pass
    let rearmed = ctx.chunks.reset_to_pending(project.id, AudioStatus::Failed)?
        + ctx.chunks.reset_to_pending(project.id, AudioStatus::Synthesizing)?;
    if rearmed > 0 {
        logger.log_progress(&format!("re-armed {} chunks for another attempt", rearmed));
    }

    let counts = ctx.chunks.counts(project.id)?;
    if counts.total() == 0 {
        ctx.projects.update_status(project.id, ProjectStatus::Pending)?;
        logger.log_completion("project has no text chunks");
        return Ok(());
    }

    let pending = ctx.chunks.list_by_status(project.id, AudioStatus::Pending)?;
    let total = pending.len();
    logger.log_start(&format!(
        "{} of {} chunks to synthesize",
        total,
        counts.total()
    ));

    let audio_dir = ctx.config.audio_dir(project.id);
    tokio::fs::create_dir_all(&audio_dir).await?;

    let mut failed = 0usize;
    for (done, chunk) in pending.iter().enumerate() {
        if let Err(e) = synthesize_chunk(ctx, &project, chunk, &audio_dir).await {
            failed += 1;
            logger.log_error(&format!("chunk {} failed: {}", chunk.id, e));
        }

        let value = percent(done + 1, total);
        ctx.jobs.update_progress(job.job_id, value)?;
        ctx.progress
            .progress(job.job_id, project.id, JobKind::AudioSynthesis, value);
    }

    if failed > 0 {
        return Err(WorkerError::job_failed(format!(
            "{} of {} chunks failed",
            failed, total
        )));
    }

    let entries = grouping::materialize(ctx, &project).await?;
    logger.log_progress(&format!("planned {} output videos", entries.len()));

    match ctx.submit(project.id, JobKind::VideoGeneration).await {
        Ok(video) => logger.log_completion(&format!("queued video job {}", video.id)),
        Err(e) if e.is_duplicate() => logger.log_completion("video job already queued"),
        Err(WorkerError::Queue(QueueError::Full(_))) => {
            match ctx.request(project.id, JobKind::VideoGeneration) {
                Ok(video) => logger
                    .log_completion(&format!("queue full, video job {} left pending", video.id)),
                Err(e) if e.is_duplicate() => logger.log_completion("video job already pending"),
                Err(e) => return Err(e),
            }
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

/// Speak one chunk with retries and record the outcome on the chunk.
async fn synthesize_chunk(
    ctx: &PipelineContext,
    project: &Project,
    chunk: &TextChunk,
    audio_dir: &Path,
) -> WorkerResult<()> {
    ctx.chunks.mark_synthesizing(chunk.id)?;

    let text = chunk.content.trim();
    if text.is_empty() {
        ctx.chunks.mark_failed(chunk.id)?;
        return Err(WorkerError::invalid_input(format!(
            "chunk {} has no text",
            chunk.id
        )));
    }

    let output = audio_dir.join(format!("segment_{}.mp3", chunk.id));
    let request = SpeechRequest::from_config(text, &project.config);
    let retry = RetryConfig::new(format!("speech for chunk {}", chunk.id))
        .with_attempts(ctx.config.tts_retry_count)
        .with_base_delay(ctx.config.tts_retry_base_delay);

    let path = match retry_async(&retry, || ctx.speech.synthesize(&request, &output)).await {
        RetryResult::Success(path) => path,
        RetryResult::Failed { error, attempts } => {
            ctx.chunks.mark_failed(chunk.id)?;
            return Err(WorkerError::job_failed(format!(
                "speech failed after {} attempts: {}",
                attempts, error
            )));
        }
    };

    let duration = match ctx.durations.duration(&path).await {
        Ok(duration) => Some(duration),
        Err(e) => {
            tracing::warn!(
                chunk_id = %chunk.id,
                "Could not probe audio duration, planning will retry: {}",
                e
            );
            None
        }
    };
    ctx.chunks.mark_completed(chunk.id, &path, duration)?;
    Ok(())
}
