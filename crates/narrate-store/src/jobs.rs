//! Job repository.

use chrono::Utc;
use metrics::counter;
use rusqlite::{params, OptionalExtension, Row};
use tracing::info;

use narrate_models::{Job, JobId, JobKind, JobStatus, ProjectId};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::row::parse_col;

const COLUMNS: &str =
    "id, project_id, kind, status, progress, error_message, created_at, started_at, completed_at";

/// Repository for job records.
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a job in `pending` status.
    pub fn create(&self, project_id: ProjectId, kind: JobKind) -> StoreResult<Job> {
        let now = Utc::now();
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO jobs (project_id, kind, status, progress, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![
                project_id.get(),
                kind.as_str(),
                JobStatus::Pending.as_str(),
                now
            ],
        )?;
        let id = JobId(conn.last_insert_rowid());
        counter!("narrate_jobs_created_total", "kind" => kind.as_str()).increment(1);
        info!(job_id = %id, project_id = %project_id, "Created {} job", kind);

        Ok(Job {
            id,
            project_id,
            kind,
            status: JobStatus::Pending,
            progress: 0.0,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        })
    }

    pub fn get(&self, id: JobId) -> StoreResult<Option<Job>> {
        let conn = self.db.lock()?;
        let job = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.get()],
                map_job,
            )
            .optional()?;
        Ok(job)
    }

    pub fn require(&self, id: JobId) -> StoreResult<Job> {
        self.get(id)?
            .ok_or_else(|| StoreError::not_found(format!("job {}", id)))
    }

    /// Jobs of one project, oldest first.
    pub fn list_for_project(&self, project_id: ProjectId) -> StoreResult<Vec<Job>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM jobs WHERE project_id = ?1 ORDER BY id"
        ))?;
        let jobs = stmt
            .query_map(params![project_id.get()], map_job)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    pub fn latest_for_project(&self, project_id: ProjectId) -> StoreResult<Option<Job>> {
        let conn = self.db.lock()?;
        let job = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM jobs WHERE project_id = ?1 ORDER BY id DESC LIMIT 1"),
                params![project_id.get()],
                map_job,
            )
            .optional()?;
        Ok(job)
    }

    /// Oldest pending job of `kind` for a project.
    pub fn find_pending(&self, project_id: ProjectId, kind: JobKind) -> StoreResult<Option<Job>> {
        let conn = self.db.lock()?;
        let job = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM jobs
                     WHERE project_id = ?1 AND kind = ?2 AND status = ?3
                     ORDER BY id LIMIT 1"
                ),
                params![project_id.get(), kind.as_str(), JobStatus::Pending.as_str()],
                map_job,
            )
            .optional()?;
        Ok(job)
    }

    pub fn list_by_status(&self, status: JobStatus) -> StoreResult<Vec<Job>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM jobs WHERE status = ?1 ORDER BY id"
        ))?;
        let jobs = stmt
            .query_map(params![status.as_str()], map_job)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Move a pending job to running.
    ///
    /// Returns false if the job is no longer pending (e.g. cancelled while queued).
    pub fn start(&self, id: JobId) -> StoreResult<bool> {
        let conn = self.db.lock()?;
        let changed = conn.execute(
            "UPDATE jobs SET status = ?1, started_at = ?2 WHERE id = ?3 AND status = ?4",
            params![
                JobStatus::Running.as_str(),
                Utc::now(),
                id.get(),
                JobStatus::Pending.as_str()
            ],
        )?;
        Ok(changed > 0)
    }

    /// Record progress (clamped to 0-100).
    pub fn update_progress(&self, id: JobId, progress: f64) -> StoreResult<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "UPDATE jobs SET progress = ?1 WHERE id = ?2",
            params![progress.clamp(0.0, 100.0), id.get()],
        )?;
        Ok(())
    }

    /// Mark job as completed with progress 100.
    pub fn complete(&self, id: JobId) -> StoreResult<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "UPDATE jobs SET status = ?1, progress = 100, completed_at = ?2 WHERE id = ?3",
            params![JobStatus::Completed.as_str(), Utc::now(), id.get()],
        )?;
        Ok(())
    }

    /// Mark job as failed, keeping its last progress.
    pub fn fail(&self, id: JobId, message: &str) -> StoreResult<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "UPDATE jobs SET status = ?1, error_message = ?2, completed_at = ?3 WHERE id = ?4",
            params![JobStatus::Failed.as_str(), message, Utc::now(), id.get()],
        )?;
        Ok(())
    }

    /// Cancel a job that has not been dispatched yet.
    pub fn cancel_if_pending(&self, id: JobId) -> StoreResult<bool> {
        let conn = self.db.lock()?;
        let changed = conn.execute(
            "UPDATE jobs SET status = ?1, completed_at = ?2 WHERE id = ?3 AND status = ?4",
            params![
                JobStatus::Cancelled.as_str(),
                Utc::now(),
                id.get(),
                JobStatus::Pending.as_str()
            ],
        )?;
        Ok(changed > 0)
    }

    /// Fail every running job. Returns the number of jobs touched.
    pub fn fail_all_running(&self, message: &str) -> StoreResult<usize> {
        let conn = self.db.lock()?;
        let changed = conn.execute(
            "UPDATE jobs SET status = ?1, error_message = ?2, completed_at = ?3 WHERE status = ?4",
            params![
                JobStatus::Failed.as_str(),
                message,
                Utc::now(),
                JobStatus::Running.as_str()
            ],
        )?;
        Ok(changed)
    }
}

fn map_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: JobId(row.get(0)?),
        project_id: ProjectId(row.get(1)?),
        kind: parse_col(row, 2)?,
        status: parse_col(row, 3)?,
        progress: row.get(4)?,
        error_message: row.get(5)?,
        created_at: row.get(6)?,
        started_at: row.get(7)?,
        completed_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProjectRepository;
    use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
    use narrate_models::ProjectConfig;
    use std::path::Path;
    use std::sync::Mutex;

    /// Records the name of every metric registered through it.
    #[derive(Default)]
    struct RegisteredNames(Mutex<Vec<String>>);

    impl Recorder for RegisteredNames {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            self.0.lock().unwrap().push(key.name().to_string());
            Counter::noop()
        }

        fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
            self.0.lock().unwrap().push(key.name().to_string());
            Gauge::noop()
        }

        fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
            self.0.lock().unwrap().push(key.name().to_string());
            Histogram::noop()
        }
    }

    fn setup() -> (JobRepository, ProjectId) {
        let db = Database::open_in_memory().unwrap();
        let project = ProjectRepository::new(db.clone())
            .create("P", None, &ProjectConfig::default(), Path::new("/p"))
            .unwrap();
        (JobRepository::new(db), project.id)
    }

    #[test]
    fn test_lifecycle() {
        let (repo, pid) = setup();
        let job = repo.create(pid, JobKind::AudioSynthesis).unwrap();
        assert!(repo.start(job.id).unwrap());
        assert!(!repo.start(job.id).unwrap());

        repo.update_progress(job.id, 150.0).unwrap();
        assert_eq!(repo.require(job.id).unwrap().progress, 100.0);

        repo.fail(job.id, "boom").unwrap();
        let job = repo.require(job.id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("boom"));
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_terminal_updates_leave_job_counters_to_scheduler() {
        let (repo, pid) = setup();
        let done = repo.create(pid, JobKind::AudioSynthesis).unwrap();
        let broken = repo.create(pid, JobKind::VideoGeneration).unwrap();

        let recorder = RegisteredNames::default();
        metrics::with_local_recorder(&recorder, || {
            repo.complete(done.id).unwrap();
            repo.fail(broken.id, "boom").unwrap();
        });
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cancel_only_before_dispatch() {
        let (repo, pid) = setup();
        let queued = repo.create(pid, JobKind::VideoGeneration).unwrap();
        assert!(repo.cancel_if_pending(queued.id).unwrap());
        assert!(!repo.start(queued.id).unwrap());

        let running = repo.create(pid, JobKind::VideoGeneration).unwrap();
        repo.start(running.id).unwrap();
        assert!(!repo.cancel_if_pending(running.id).unwrap());
    }

    #[test]
    fn test_find_pending_by_kind() {
        let (repo, pid) = setup();
        assert!(repo.find_pending(pid, JobKind::AudioSynthesis).unwrap().is_none());

        let running = repo.create(pid, JobKind::AudioSynthesis).unwrap();
        repo.start(running.id).unwrap();
        let waiting = repo.create(pid, JobKind::AudioSynthesis).unwrap();
        repo.create(pid, JobKind::VideoGeneration).unwrap();

        let found = repo.find_pending(pid, JobKind::AudioSynthesis).unwrap().unwrap();
        assert_eq!(found.id, waiting.id);
    }

    #[test]
    fn test_bulk_recovery_updates() {
        let (repo, pid) = setup();
        let a = repo.create(pid, JobKind::AudioSynthesis).unwrap();
        repo.start(a.id).unwrap();
        let b = repo.create(pid, JobKind::VideoGeneration).unwrap();

        assert_eq!(repo.fail_all_running("process restarted").unwrap(), 1);
        assert_eq!(repo.require(a.id).unwrap().status, JobStatus::Failed);
        assert_eq!(repo.require(b.id).unwrap().status, JobStatus::Pending);
        assert_eq!(
            repo.list_by_status(JobStatus::Pending).unwrap().iter().map(|j| j.id).collect::<Vec<_>>(),
            vec![b.id]
        );
        assert_eq!(repo.latest_for_project(pid).unwrap().unwrap().id, b.id);
    }
}
