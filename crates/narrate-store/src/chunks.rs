//! Text chunk repository.

use std::path::Path;

use chrono::Utc;
use metrics::counter;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use tracing::info;

use narrate_models::{AudioStatus, ChunkId, ProjectId, TextChunk};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::row::{opt_path_col, parse_col, path_text};

const COLUMNS: &str = "id, project_id, ordinal, content, char_count, audio_status, audio_path, \
                       audio_duration, created_at, updated_at";

/// Chunk counts per audio status for one project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChunkCounts {
    pub pending: usize,
    pub synthesizing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl ChunkCounts {
    pub fn total(&self) -> usize {
        self.pending + self.synthesizing + self.completed + self.failed
    }
}

/// Repository for text chunks.
#[derive(Clone)]
pub struct ChunkRepository {
    db: Database,
}

impl ChunkRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Replace all chunks of a project with `contents`, numbered from 0.
    ///
    /// Old chunks (and, by cascade, their rendered clips) are removed in the
    /// same transaction so ordinals stay dense.
    pub fn replace_all(&self, project_id: ProjectId, contents: &[String]) -> StoreResult<usize> {
        let now = Utc::now();
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM text_chunks WHERE project_id = ?1",
            params![project_id.get()],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO text_chunks
                 (project_id, ordinal, content, char_count, audio_status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            )?;
            for (ordinal, content) in contents.iter().enumerate() {
                stmt.execute(params![
                    project_id.get(),
                    ordinal as i64,
                    content,
                    content.chars().count() as i64,
                    AudioStatus::Pending.as_str(),
                    now
                ])?;
            }
        }
        tx.commit()?;

        counter!("narrate_chunks_imported_total").increment(contents.len() as u64);
        info!(project_id = %project_id, "Stored {} text chunks", contents.len());
        Ok(contents.len())
    }

    pub fn get(&self, id: ChunkId) -> StoreResult<Option<TextChunk>> {
        let conn = self.db.lock()?;
        let chunk = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM text_chunks WHERE id = ?1"),
                params![id.get()],
                map_chunk,
            )
            .optional()?;
        Ok(chunk)
    }

    pub fn require(&self, id: ChunkId) -> StoreResult<TextChunk> {
        self.get(id)?
            .ok_or_else(|| StoreError::not_found(format!("text chunk {}", id)))
    }

    /// All chunks of a project in ordinal order.
    pub fn list(&self, project_id: ProjectId) -> StoreResult<Vec<TextChunk>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM text_chunks WHERE project_id = ?1 ORDER BY ordinal"
        ))?;
        let chunks = stmt
            .query_map(params![project_id.get()], map_chunk)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chunks)
    }

    /// Chunks of a project with the given status, in ordinal order.
    pub fn list_by_status(
        &self,
        project_id: ProjectId,
        status: AudioStatus,
    ) -> StoreResult<Vec<TextChunk>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM text_chunks WHERE project_id = ?1 AND audio_status = ?2
             ORDER BY ordinal"
        ))?;
        let chunks = stmt
            .query_map(params![project_id.get(), status.as_str()], map_chunk)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chunks)
    }

    pub fn counts(&self, project_id: ProjectId) -> StoreResult<ChunkCounts> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT audio_status, COUNT(*) FROM text_chunks WHERE project_id = ?1
             GROUP BY audio_status",
        )?;
        let rows = stmt
            .query_map(params![project_id.get()], |row| {
                Ok((parse_col::<AudioStatus>(row, 0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = ChunkCounts::default();
        for (status, n) in rows {
            let n = n as usize;
            match status {
                AudioStatus::Pending => counts.pending = n,
                AudioStatus::Synthesizing => counts.synthesizing = n,
                AudioStatus::Completed => counts.completed = n,
                AudioStatus::Failed => counts.failed = n,
            }
        }
        Ok(counts)
    }

    pub fn mark_synthesizing(&self, id: ChunkId) -> StoreResult<()> {
        self.set_status(id, AudioStatus::Synthesizing)
    }

    pub fn mark_failed(&self, id: ChunkId) -> StoreResult<()> {
        self.set_status(id, AudioStatus::Failed)?;
        counter!("narrate_chunks_failed_total").increment(1);
        Ok(())
    }

    /// Record a successful synthesis.
    pub fn mark_completed(
        &self,
        id: ChunkId,
        audio_path: &Path,
        duration: Option<f64>,
    ) -> StoreResult<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "UPDATE text_chunks SET audio_status = ?1, audio_path = ?2, audio_duration = ?3,
             updated_at = ?4 WHERE id = ?5",
            params![
                AudioStatus::Completed.as_str(),
                path_text(audio_path),
                duration,
                Utc::now(),
                id.get()
            ],
        )?;
        counter!("narrate_chunks_synthesized_total").increment(1);
        Ok(())
    }

    /// Cache a probed audio duration.
    pub fn set_duration(&self, id: ChunkId, duration: f64) -> StoreResult<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "UPDATE text_chunks SET audio_duration = ?1, updated_at = ?2 WHERE id = ?3",
            params![duration, Utc::now(), id.get()],
        )?;
        Ok(())
    }

    /// Put a project's chunks in `from` back to pending. Returns rows touched.
    pub fn reset_to_pending(
        &self,
        project_id: ProjectId,
        from: AudioStatus,
    ) -> StoreResult<usize> {
        let conn = self.db.lock()?;
        let changed = conn.execute(
            "UPDATE text_chunks SET audio_status = ?1, updated_at = ?2
             WHERE project_id = ?3 AND audio_status = ?4",
            params![
                AudioStatus::Pending.as_str(),
                Utc::now(),
                project_id.get(),
                from.as_str()
            ],
        )?;
        Ok(changed)
    }

    /// Put every `synthesizing` chunk of every project back to pending.
    pub fn reset_all_synthesizing(&self) -> StoreResult<usize> {
        let conn = self.db.lock()?;
        let changed = conn.execute(
            "UPDATE text_chunks SET audio_status = ?1, updated_at = ?2 WHERE audio_status = ?3",
            params![
                AudioStatus::Pending.as_str(),
                Utc::now(),
                AudioStatus::Synthesizing.as_str()
            ],
        )?;
        Ok(changed)
    }

    fn set_status(&self, id: ChunkId, status: AudioStatus) -> StoreResult<()> {
        let conn = self.db.lock()?;
        let changed = conn.execute(
            "UPDATE text_chunks SET audio_status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now(), id.get()],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found(format!("text chunk {}", id)));
        }
        Ok(())
    }
}

fn map_chunk(row: &Row<'_>) -> rusqlite::Result<TextChunk> {
    Ok(TextChunk {
        id: ChunkId(row.get(0)?),
        project_id: ProjectId(row.get(1)?),
        ordinal: row.get(2)?,
        content: row.get(3)?,
        char_count: row.get(4)?,
        audio_status: parse_col(row, 5)?,
        audio_path: opt_path_col(row, 6)?,
        audio_duration: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}
