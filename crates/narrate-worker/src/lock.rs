//! Single-dispatcher lock next to the state store.
//!
//! Only the process holding the lock queues and executes jobs. Other
//! processes record pending job rows for the holder to adopt.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{WorkerError, WorkerResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    created_at: DateTime<Utc>,
    command: String,
}

/// Exclusive claim on job dispatch for one database, released on drop.
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
}

impl ProcessLock {
    /// `<database>.lock`
    pub fn path_for(database_path: &Path) -> PathBuf {
        let mut name = OsString::from(database_path.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Take the lock at `path`.
    ///
    /// A lock left by a process that no longer exists, or one that cannot be
    /// parsed, is replaced. Fails with [`WorkerError::Locked`] while a live
    /// process holds it.
    pub fn acquire(path: &Path, command: &str) -> WorkerResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        match read_info(path)? {
            None => {}
            Some(Ok(info)) if pid_is_alive(info.pid) => {
                return Err(WorkerError::Locked {
                    pid: info.pid,
                    path: path.to_path_buf(),
                });
            }
            Some(Ok(info)) => {
                warn!(
                    "Replacing lock {} left by process {} ({} since {})",
                    path.display(),
                    info.pid,
                    info.command,
                    info.created_at
                );
                remove_if_exists(path)?;
            }
            Some(Err(e)) => {
                warn!("Replacing unreadable lock {}: {}", path.display(), e);
                remove_if_exists(path)?;
            }
        }

        let info = LockInfo {
            pid: std::process::id(),
            created_at: Utc::now(),
            command: command.to_owned(),
        };
        let mut file = match OpenOptions::new().create_new(true).write(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                // Lost the race against another process
                let pid = match read_info(path)? {
                    Some(Ok(holder)) => holder.pid,
                    _ => 0,
                };
                return Err(WorkerError::Locked {
                    pid,
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let contents = serde_json::to_vec_pretty(&info).map_err(std::io::Error::other)?;
        file.write_all(&contents)?;
        file.sync_all()?;

        debug!("Acquired {} for {}", path.display(), command);
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Err(e) = remove_if_exists(&self.path) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

/// Parsed lock contents; `None` when there is no lock file.
fn read_info(path: &Path) -> WorkerResult<Option<Result<LockInfo, serde_json::Error>>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(serde_json::from_str(&contents))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(target_os = "linux")]
fn pid_is_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_is_alive(_pid: u32) -> bool {
    true
}
