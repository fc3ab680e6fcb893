//! Synthesis queue entry repository.

use std::path::Path;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use narrate_models::{ClipId, EntryId, EntryStatus, ProjectId, SynthesisQueueEntry};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::row::{json_col, parse_col, path_col, path_text};

const COLUMNS: &str = "id, project_id, sequence, output_path, clip_ids, total_duration, status, \
                       created_at, updated_at";

/// Repository for synthesis queue entries.
#[derive(Clone)]
pub struct QueueEntryRepository {
    db: Database,
}

impl QueueEntryRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create the entry at `sequence`, or return the one already there.
    pub fn get_or_create(
        &self,
        project_id: ProjectId,
        sequence: u32,
        output_path: &Path,
        clip_ids: &[ClipId],
        total_duration: f64,
    ) -> StoreResult<SynthesisQueueEntry> {
        let clip_json = serde_json::to_string(clip_ids)?;
        let now = Utc::now();
        let conn = self.db.lock()?;
        let inserted = conn.execute(
            "INSERT INTO synthesis_queue
             (project_id, sequence, output_path, clip_ids, total_duration, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(project_id, sequence) DO NOTHING",
            params![
                project_id.get(),
                sequence,
                path_text(output_path),
                clip_json,
                total_duration,
                EntryStatus::Pending.as_str(),
                now
            ],
        )?;
        if inserted > 0 {
            debug!(project_id = %project_id, "Created queue entry {}", sequence);
        }
        let entry = conn.query_row(
            &format!("SELECT {COLUMNS} FROM synthesis_queue WHERE project_id = ?1 AND sequence = ?2"),
            params![project_id.get(), sequence],
            map_entry,
        )?;
        Ok(entry)
    }

    pub fn get(&self, id: EntryId) -> StoreResult<Option<SynthesisQueueEntry>> {
        let conn = self.db.lock()?;
        let entry = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM synthesis_queue WHERE id = ?1"),
                params![id.get()],
                map_entry,
            )
            .optional()?;
        Ok(entry)
    }

    pub fn require(&self, id: EntryId) -> StoreResult<SynthesisQueueEntry> {
        self.get(id)?
            .ok_or_else(|| StoreError::not_found(format!("queue entry {}", id)))
    }

    /// Entries of a project in sequence order.
    pub fn list(&self, project_id: ProjectId) -> StoreResult<Vec<SynthesisQueueEntry>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM synthesis_queue WHERE project_id = ?1 ORDER BY sequence"
        ))?;
        let entries = stmt
            .query_map(params![project_id.get()], map_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn count(&self, project_id: ProjectId) -> StoreResult<usize> {
        let conn = self.db.lock()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM synthesis_queue WHERE project_id = ?1",
            params![project_id.get()],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn set_status(&self, id: EntryId, status: EntryStatus) -> StoreResult<()> {
        let conn = self.db.lock()?;
        let changed = conn.execute(
            "UPDATE synthesis_queue SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now(), id.get()],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found(format!("queue entry {}", id)));
        }
        Ok(())
    }

    /// Roll every `synthesizing` entry back to pending. Returns rows touched.
    pub fn reset_all_synthesizing(&self) -> StoreResult<usize> {
        let conn = self.db.lock()?;
        let changed = conn.execute(
            "UPDATE synthesis_queue SET status = ?1, updated_at = ?2 WHERE status = ?3",
            params![
                EntryStatus::Pending.as_str(),
                Utc::now(),
                EntryStatus::Synthesizing.as_str()
            ],
        )?;
        Ok(changed)
    }

    /// Remove all entries of a project (re-segmentation).
    pub fn delete_for_project(&self, project_id: ProjectId) -> StoreResult<usize> {
        let conn = self.db.lock()?;
        let changed = conn.execute(
            "DELETE FROM synthesis_queue WHERE project_id = ?1",
            params![project_id.get()],
        )?;
        Ok(changed)
    }
}

fn map_entry(row: &Row<'_>) -> rusqlite::Result<SynthesisQueueEntry> {
    Ok(SynthesisQueueEntry {
        id: EntryId(row.get(0)?),
        project_id: ProjectId(row.get(1)?),
        sequence: row.get(2)?,
        output_path: path_col(row, 3)?,
        clip_ids: json_col(row, 4)?,
        total_duration: row.get(5)?,
        status: parse_col(row, 6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProjectRepository;
    use narrate_models::ProjectConfig;

    #[test]
    fn test_entry_roundtrip_and_rollback() {
        let db = Database::open_in_memory().unwrap();
        let project = ProjectRepository::new(db.clone())
            .create("P", None, &ProjectConfig::default(), Path::new("/p"))
            .unwrap();
        let repo = QueueEntryRepository::new(db);

        let entry = repo
            .get_or_create(project.id, 0, Path::new("/o/P_1.mp4"), &[ClipId(3), ClipId(1)], 9.5)
            .unwrap();
        assert_eq!(entry.clip_ids, vec![ClipId(3), ClipId(1)]);
        assert_eq!(entry.status, EntryStatus::Pending);

        let again = repo
            .get_or_create(project.id, 0, Path::new("/o/other.mp4"), &[], 0.0)
            .unwrap();
        assert_eq!(again.id, entry.id);
        assert_eq!(again.total_duration, 9.5);
        assert_eq!(repo.count(project.id).unwrap(), 1);

        repo.set_status(entry.id, EntryStatus::Synthesizing).unwrap();
        assert_eq!(repo.reset_all_synthesizing().unwrap(), 1);
        assert_eq!(repo.require(entry.id).unwrap().status, EntryStatus::Pending);

        assert_eq!(repo.delete_for_project(project.id).unwrap(), 1);
        assert!(repo.list(project.id).unwrap().is_empty());
    }
}
