//! Output video repository.

use std::path::Path;

use chrono::Utc;
use metrics::counter;
use rusqlite::{params, Row};
use tracing::info;

use narrate_models::{OutputVideo, OutputVideoId, OutputVideoStatus, ProjectId};

use crate::db::Database;
use crate::error::StoreResult;
use crate::row::{parse_col, path_col, path_text};

const COLUMNS: &str = "id, project_id, sequence, path, duration, status, created_at";

/// Repository for exported videos.
#[derive(Clone)]
pub struct OutputVideoRepository {
    db: Database,
}

impl OutputVideoRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record a completed output video, replacing any earlier record at `sequence`.
    pub fn upsert_completed(
        &self,
        project_id: ProjectId,
        sequence: u32,
        path: &Path,
        duration: f64,
    ) -> StoreResult<OutputVideo> {
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO output_videos (project_id, sequence, path, duration, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(project_id, sequence) DO UPDATE SET
                path = excluded.path,
                duration = excluded.duration,
                status = excluded.status",
            params![
                project_id.get(),
                sequence,
                path_text(path),
                duration,
                OutputVideoStatus::Completed.as_str(),
                Utc::now()
            ],
        )?;
        let video = conn.query_row(
            &format!("SELECT {COLUMNS} FROM output_videos WHERE project_id = ?1 AND sequence = ?2"),
            params![project_id.get(), sequence],
            map_video,
        )?;
        counter!("narrate_output_videos_total").increment(1);
        info!(project_id = %project_id, "Recorded output video: {}", path.display());
        Ok(video)
    }

    /// Output videos of a project in sequence order.
    pub fn list(&self, project_id: ProjectId) -> StoreResult<Vec<OutputVideo>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM output_videos WHERE project_id = ?1 ORDER BY sequence"
        ))?;
        let videos = stmt
            .query_map(params![project_id.get()], map_video)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(videos)
    }

    pub fn delete_for_project(&self, project_id: ProjectId) -> StoreResult<usize> {
        let conn = self.db.lock()?;
        let changed = conn.execute(
            "DELETE FROM output_videos WHERE project_id = ?1",
            params![project_id.get()],
        )?;
        Ok(changed)
    }
}

fn map_video(row: &Row<'_>) -> rusqlite::Result<OutputVideo> {
    Ok(OutputVideo {
        id: OutputVideoId(row.get(0)?),
        project_id: ProjectId(row.get(1)?),
        sequence: row.get(2)?,
        path: path_col(row, 3)?,
        duration: row.get(4)?,
        status: parse_col(row, 5)?,
        created_at: row.get(6)?,
    })
}
