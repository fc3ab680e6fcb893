//! Startup reconciliation after an unclean shutdown.
//!
//! Runs before the scheduler accepts work: nothing is executing, so any
//! `running` job, `synthesizing` chunk or `synthesizing` entry is a leftover.
//! Pending jobs are still wanted and go back on the queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use narrate_media::fs_utils::{is_part_file, remove_file_if_exists};
use narrate_models::{ClipStatus, ProjectSnapshot, ProjectStatus};

use crate::context::PipelineContext;
use crate::error::WorkerResult;

/// Error recorded on jobs that were running when the process died.
pub const RESTART_MESSAGE: &str = "process restarted";

/// Status a project should move to after a crash, if any.
///
/// A project interrupted mid-pipeline with all audio done is marked failed so
/// the user re-triggers video generation explicitly; otherwise it returns to
/// pending so audio synthesis can resume.
pub fn reconcile(snapshot: &ProjectSnapshot) -> Option<ProjectStatus> {
    if snapshot.status != ProjectStatus::Processing {
        return None;
    }
    if snapshot.audio_complete() {
        Some(ProjectStatus::Failed)
    } else {
        Some(ProjectStatus::Pending)
    }
}

/// What one recovery pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub projects_failed: usize,
    pub projects_reset: usize,
    pub jobs_failed: usize,
    pub jobs_requeued: usize,
    pub jobs_cancelled: usize,
    pub chunks_reset: usize,
    pub entries_reset: usize,
    pub files_purged: usize,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// Reconciles persisted state with the fact that nothing is running.
pub struct RecoveryManager {
    ctx: Arc<PipelineContext>,
}

impl RecoveryManager {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Run one recovery pass.
    pub async fn run(&self) -> WorkerResult<RecoveryReport> {
        let ctx = &self.ctx;
        let mut report = RecoveryReport::default();

        for project in ctx.projects.list_by_status(ProjectStatus::Processing)? {
            let counts = ctx.chunks.counts(project.id)?;
            let snapshot = ProjectSnapshot {
                status: project.status,
                total_chunks: counts.total(),
                completed_chunks: counts.completed,
            };
            let Some(status) = reconcile(&snapshot) else {
                continue;
            };
            ctx.projects.update_status(project.id, status)?;
            info!(
                project_id = %project.id,
                "Recovered interrupted project at {:.1}% audio -> {}",
                snapshot.audio_percent().unwrap_or(0.0),
                status
            );
            match status {
                ProjectStatus::Failed => report.projects_failed += 1,
                _ => report.projects_reset += 1,
            }
        }

        report.jobs_failed = ctx.jobs.fail_all_running(RESTART_MESSAGE)?;
        let adopted = ctx.adopt_pending().await?;
        report.jobs_requeued = adopted.requeued;
        report.jobs_cancelled = adopted.cancelled;
        report.chunks_reset = ctx.chunks.reset_all_synthesizing()?;
        report.entries_reset = ctx.entries.reset_all_synthesizing()?;
        report.files_purged = self.purge_orphans().await?;

        if report.is_clean() {
            info!("Recovery found nothing to repair");
        } else {
            warn!(
                projects_failed = report.projects_failed,
                projects_reset = report.projects_reset,
                jobs_failed = report.jobs_failed,
                jobs_requeued = report.jobs_requeued,
                jobs_cancelled = report.jobs_cancelled,
                chunks_reset = report.chunks_reset,
                entries_reset = report.entries_reset,
                files_purged = report.files_purged,
                "Recovered state after unclean shutdown"
            );
        }
        Ok(report)
    }

    /// Delete partial renders and files of clips that were already merged.
    async fn purge_orphans(&self) -> WorkerResult<usize> {
        let mut purged = 0;

        for path in list_files(&self.ctx.config.clips_root()).await? {
            if is_part_file(&path) && remove_file_if_exists(&path).await? {
                purged += 1;
            }
        }

        for status in [ClipStatus::Merged, ClipStatus::Deleted] {
            for clip in self.ctx.clips.list_by_status(status)? {
                if remove_file_if_exists(&clip.clip_path).await? {
                    purged += 1;
                }
                if status == ClipStatus::Merged {
                    self.ctx.clips.mark_deleted(clip.id)?;
                }
            }
        }

        Ok(purged)
    }
}

/// Every regular file below `root`; empty when `root` does not exist.
async fn list_files(root: &Path) -> WorkerResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut dirs = vec![root.to_path_buf()];

    while let Some(dir) = dirs.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                dirs.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }

    Ok(files)
}
