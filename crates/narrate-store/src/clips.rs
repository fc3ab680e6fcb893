//! Rendered clip repository.

use std::path::Path;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use narrate_models::{ChunkId, ClipId, ClipStatus, ProjectId, RenderedClip};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::row::{parse_col, path_col, path_text};

const COLUMNS: &str = "id, project_id, chunk_id, clip_path, status, created_at, updated_at";

/// Repository for rendered clips.
#[derive(Clone)]
pub struct ClipRepository {
    db: Database,
}

impl ClipRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create the placeholder clip for a chunk, or return the existing one.
    pub fn get_or_create(
        &self,
        project_id: ProjectId,
        chunk_id: ChunkId,
        clip_path: &Path,
    ) -> StoreResult<RenderedClip> {
        let now = Utc::now();
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO rendered_clips (project_id, chunk_id, clip_path, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(chunk_id) DO NOTHING",
            params![
                project_id.get(),
                chunk_id.get(),
                path_text(clip_path),
                ClipStatus::Pending.as_str(),
                now
            ],
        )?;
        let clip = conn.query_row(
            &format!("SELECT {COLUMNS} FROM rendered_clips WHERE chunk_id = ?1"),
            params![chunk_id.get()],
            map_clip,
        )?;
        Ok(clip)
    }

    pub fn get(&self, id: ClipId) -> StoreResult<Option<RenderedClip>> {
        let conn = self.db.lock()?;
        let clip = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM rendered_clips WHERE id = ?1"),
                params![id.get()],
                map_clip,
            )
            .optional()?;
        Ok(clip)
    }

    pub fn require(&self, id: ClipId) -> StoreResult<RenderedClip> {
        self.get(id)?
            .ok_or_else(|| StoreError::not_found(format!("rendered clip {}", id)))
    }

    /// Clips of a project ordered by their chunk.
    pub fn list(&self, project_id: ProjectId) -> StoreResult<Vec<RenderedClip>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM rendered_clips WHERE project_id = ?1 ORDER BY chunk_id"
        ))?;
        let clips = stmt
            .query_map(params![project_id.get()], map_clip)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(clips)
    }

    /// Clips in the given status across all projects.
    pub fn list_by_status(&self, status: ClipStatus) -> StoreResult<Vec<RenderedClip>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM rendered_clips WHERE status = ?1 ORDER BY id"
        ))?;
        let clips = stmt
            .query_map(params![status.as_str()], map_clip)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(clips)
    }

    pub fn mark_synthesized(&self, id: ClipId) -> StoreResult<()> {
        self.set_status(id, ClipStatus::Synthesized)
    }

    pub fn mark_merged(&self, id: ClipId) -> StoreResult<()> {
        self.set_status(id, ClipStatus::Merged)
    }

    pub fn mark_deleted(&self, id: ClipId) -> StoreResult<()> {
        self.set_status(id, ClipStatus::Deleted)
    }

    fn set_status(&self, id: ClipId, status: ClipStatus) -> StoreResult<()> {
        let conn = self.db.lock()?;
        let changed = conn.execute(
            "UPDATE rendered_clips SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now(), id.get()],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found(format!("rendered clip {}", id)));
        }
        Ok(())
    }
}

fn map_clip(row: &Row<'_>) -> rusqlite::Result<RenderedClip> {
    Ok(RenderedClip {
        id: ClipId(row.get(0)?),
        project_id: ProjectId(row.get(1)?),
        chunk_id: ChunkId(row.get(2)?),
        clip_path: path_col(row, 3)?,
        status: parse_col(row, 4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}
