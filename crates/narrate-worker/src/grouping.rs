//! Duration-based grouping of audio chunks into output videos.
//!
//! Chunks are packed left to right without reordering: a group closes as
//! soon as the next chunk would push it past the target duration. A chunk
//! longer than the target gets a group of its own.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use narrate_models::{safe_filename, AudioStatus, ClipId, Project, SynthesisQueueEntry, TextChunk};

use crate::context::PipelineContext;
use crate::error::{WorkerError, WorkerResult};

/// Greedy single pass over `durations`; returns index groups in order.
pub fn plan_groups(durations: &[f64], target: f64) -> WorkerResult<Vec<Vec<usize>>> {
    if !target.is_finite() || target <= 0.0 {
        return Err(WorkerError::config_error(format!(
            "target duration must be positive, got {}",
            target
        )));
    }

    let mut groups = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut sum = 0.0;

    for (index, &duration) in durations.iter().enumerate() {
        if !current.is_empty() && sum + duration > target {
            groups.push(std::mem::take(&mut current));
            sum = 0.0;
        }
        current.push(index);
        sum += duration;
    }
    if !current.is_empty() {
        groups.push(current);
    }

    Ok(groups)
}

/// Output file of the entry at `sequence` (0-based).
pub fn entry_output_path(project: &Project, sequence: u32) -> PathBuf {
    project.output_dir.join(format!(
        "{}_{}.{}",
        safe_filename(&project.name),
        sequence + 1,
        project.config.format
    ))
}

/// Plan the project's audio-completed chunks and persist clips and entries.
///
/// Safe to call again: every clip and entry is looked up before it is
/// created, so a repeat call returns the rows already there.
pub async fn materialize(
    ctx: &PipelineContext,
    project: &Project,
) -> WorkerResult<Vec<SynthesisQueueEntry>> {
    let chunks = ctx.chunks.list_by_status(project.id, AudioStatus::Completed)?;
    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    let durations = resolve_durations(ctx, &chunks).await?;
    let groups = plan_groups(&durations, project.config.target_duration_secs)?;
    let clip_dir = ctx.config.clip_dir(project.id);

    let mut entries = Vec::with_capacity(groups.len());
    for (sequence, group) in groups.iter().enumerate() {
        let sequence = sequence as u32;
        let mut clip_ids: Vec<ClipId> = Vec::with_capacity(group.len());
        for &index in group {
            let chunk = &chunks[index];
            let clip_path = clip_dir.join(format!("clip_{}.mp4", chunk.id));
            let clip = ctx.clips.get_or_create(project.id, chunk.id, &clip_path)?;
            clip_ids.push(clip.id);
        }

        let total: f64 = group.iter().map(|&i| durations[i]).sum();
        let entry = ctx.entries.get_or_create(
            project.id,
            sequence,
            &entry_output_path(project, sequence),
            &clip_ids,
            total,
        )?;
        if entry.clip_ids != clip_ids {
            warn!(
                project_id = %project.id,
                "Entry {} was planned with different clips; keeping the stored plan",
                sequence
            );
        }
        debug!(
            project_id = %project.id,
            "Entry {}: {} clips, {:.1}s",
            sequence,
            entry.clip_ids.len(),
            entry.total_duration
        );
        entries.push(entry);
    }

    info!(
        project_id = %project.id,
        "Planned {} chunks into {} videos (target {:.0}s)",
        chunks.len(),
        entries.len(),
        project.config.target_duration_secs
    );
    Ok(entries)
}

/// Cached durations, probing (and caching) the ones still unknown.
async fn resolve_durations(ctx: &PipelineContext, chunks: &[TextChunk]) -> WorkerResult<Vec<f64>> {
    let mut durations = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        if let Some(duration) = chunk.audio_duration {
            durations.push(duration);
            continue;
        }

        let path = chunk.audio_path.as_ref().ok_or_else(|| {
            WorkerError::planning(format!("chunk {} has no audio file", chunk.id))
        })?;
        let duration = ctx.durations.duration(path).await.map_err(|e| {
            WorkerError::planning(format!(
                "cannot determine duration of chunk {} ({}): {}",
                chunk.id,
                path.display(),
                e
            ))
        })?;
        ctx.chunks.set_duration(chunk.id, duration)?;
        durations.push(duration);
    }
    Ok(durations)
}
