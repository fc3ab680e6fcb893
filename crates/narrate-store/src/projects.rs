//! Project repository.

use std::path::Path;

use chrono::Utc;
use metrics::counter;
use rusqlite::{params, OptionalExtension, Row};
use tracing::info;

use narrate_models::{Project, ProjectConfig, ProjectId, ProjectStatus};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::row::{json_col, parse_col, path_col, path_text};

const COLUMNS: &str =
    "id, name, description, status, config_json, output_dir, created_at, updated_at";

/// Repository for project records.
#[derive(Clone)]
pub struct ProjectRepository {
    db: Database,
}

impl ProjectRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new project in `pending` status.
    pub fn create(
        &self,
        name: &str,
        description: Option<&str>,
        config: &ProjectConfig,
        output_dir: &Path,
    ) -> StoreResult<Project> {
        let config_json = serde_json::to_string(config)?;
        let now = Utc::now();
        let conn = self.db.lock()?;
        let inserted = conn.execute(
            "INSERT INTO projects (name, description, status, config_json, output_dir, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                name,
                description,
                ProjectStatus::Pending.as_str(),
                config_json,
                path_text(output_dir),
                now
            ],
        );
        if let Err(e) = inserted {
            let err = StoreError::from(e);
            return Err(if err.is_unique_violation() {
                StoreError::already_exists(format!("project named '{}'", name))
            } else {
                err
            });
        }

        let id = ProjectId(conn.last_insert_rowid());
        counter!("narrate_projects_created_total").increment(1);
        info!(project_id = %id, "Created project record: {}", name);

        Ok(Project {
            id,
            name: name.to_string(),
            description: description.map(str::to_string),
            status: ProjectStatus::Pending,
            config: config.clone(),
            output_dir: output_dir.to_path_buf(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Get a project by ID.
    pub fn get(&self, id: ProjectId) -> StoreResult<Option<Project>> {
        let conn = self.db.lock()?;
        let project = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM projects WHERE id = ?1"),
                params![id.get()],
                map_project,
            )
            .optional()?;
        Ok(project)
    }

    /// Get a project by ID, failing if it does not exist.
    pub fn require(&self, id: ProjectId) -> StoreResult<Project> {
        self.get(id)?
            .ok_or_else(|| StoreError::not_found(format!("project {}", id)))
    }

    pub fn get_by_name(&self, name: &str) -> StoreResult<Option<Project>> {
        let conn = self.db.lock()?;
        let project = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM projects WHERE name = ?1"),
                params![name],
                map_project,
            )
            .optional()?;
        Ok(project)
    }

    /// All projects, newest first.
    pub fn list(&self) -> StoreResult<Vec<Project>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM projects ORDER BY created_at DESC, id DESC"
        ))?;
        let projects = stmt
            .query_map([], map_project)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(projects)
    }

    pub fn list_by_status(&self, status: ProjectStatus) -> StoreResult<Vec<Project>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM projects WHERE status = ?1 ORDER BY id"
        ))?;
        let projects = stmt
            .query_map(params![status.as_str()], map_project)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(projects)
    }

    /// Update project status.
    pub fn update_status(&self, id: ProjectId, status: ProjectStatus) -> StoreResult<()> {
        let conn = self.db.lock()?;
        let changed = conn.execute(
            "UPDATE projects SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now(), id.get()],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found(format!("project {}", id)));
        }
        Ok(())
    }

    /// Replace the stored configuration.
    pub fn update_config(&self, id: ProjectId, config: &ProjectConfig) -> StoreResult<()> {
        let config_json = serde_json::to_string(config)?;
        let conn = self.db.lock()?;
        let changed = conn.execute(
            "UPDATE projects SET config_json = ?1, updated_at = ?2 WHERE id = ?3",
            params![config_json, Utc::now(), id.get()],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found(format!("project {}", id)));
        }
        Ok(())
    }

    /// Delete a project; child rows cascade. Returns false if it did not exist.
    pub fn delete(&self, id: ProjectId) -> StoreResult<bool> {
        let conn = self.db.lock()?;
        let changed = conn.execute("DELETE FROM projects WHERE id = ?1", params![id.get()])?;
        if changed > 0 {
            info!(project_id = %id, "Deleted project record");
        }
        Ok(changed > 0)
    }
}

fn map_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    let config: ProjectConfig = json_col(row, 4)?;
    Ok(Project {
        id: ProjectId(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        status: parse_col(row, 3)?,
        config,
        output_dir: path_col(row, 5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> ProjectRepository {
        ProjectRepository::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_create_and_get() {
        let repo = repo();
        let config = ProjectConfig::default().with_target_duration(120.0);
        let project = repo
            .create("Novel", Some("first"), &config, Path::new("/out/Novel"))
            .unwrap();
        assert_eq!(project.status, ProjectStatus::Pending);

        let loaded = repo.get(project.id).unwrap().unwrap();
        assert_eq!(loaded.name, "Novel");
        assert_eq!(loaded.description.as_deref(), Some("first"));
        assert_eq!(loaded.config, config);
        assert_eq!(loaded.output_dir, Path::new("/out/Novel"));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let repo = repo();
        let config = ProjectConfig::default();
        repo.create("Same", None, &config, Path::new("/o")).unwrap();
        let err = repo
            .create("Same", None, &config, Path::new("/o"))
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn test_update_status_and_filter() {
        let repo = repo();
        let config = ProjectConfig::default();
        let a = repo.create("A", None, &config, Path::new("/a")).unwrap();
        repo.create("B", None, &config, Path::new("/b")).unwrap();

        repo.update_status(a.id, ProjectStatus::Processing).unwrap();
        let processing = repo.list_by_status(ProjectStatus::Processing).unwrap();
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].id, a.id);
        assert_eq!(repo.list().unwrap().len(), 2);

        assert!(matches!(
            repo.update_status(ProjectId(999), ProjectStatus::Failed),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete() {
        let repo = repo();
        let p = repo
            .create("Gone", None, &ProjectConfig::default(), Path::new("/g"))
            .unwrap();
        assert!(repo.delete(p.id).unwrap());
        assert!(!repo.delete(p.id).unwrap());
        assert!(repo.get(p.id).unwrap().is_none());
    }
}
