//! File-based locking so two reconciler passes (or a reconciler pass
//! racing a manually triggered `reconcile-once`) never run the same
//! `(repository, branch)` concurrently.
//!
//! The Self-healing Reconciler's schedule map itself is guarded by an
//! in-memory `Mutex` (see the reconciler module in `varsync-core`); this
//! crate covers the case where two *processes* on the same host, or two
//! replicas sharing a mounted state directory, could otherwise both pick
//! up the same due schedule.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Contents of a held lock file, sufficient to tell a live holder from a
/// stale one left behind by a crashed process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub held_by: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Failure to acquire a lock.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock is held by {0} until {1}")]
    Held(String, DateTime<Utc>),
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// The lock file path for a `(repository, branch)` pair under `state_dir`.
pub fn lock_path(state_dir: &Path, repository: &str, branch: &str) -> PathBuf {
    let slug = format!("{repository}@{branch}").replace('/', "__");
    state_dir.join(format!("reconcile-{slug}.lock"))
}

/// A held lock. Dropping it releases the lock by deleting the file.
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Attempt to acquire the lock at `path`, valid for `ttl`. If an existing
/// lock file is present but has expired, it is stolen (overwritten); if it
/// is still live, returns [`LockError::Held`].
pub fn acquire(path: &Path, ttl: chrono::Duration) -> Result<LockGuard, LockError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .context("failed to create lock directory")
            .map_err(LockError::Io)?;
    }

    if let Ok(existing) = fs::read_to_string(path) {
        if let Ok(info) = serde_json::from_str::<LockInfo>(&existing) {
            if info.expires_at > Utc::now() {
                return Err(LockError::Held(info.held_by, info.expires_at));
            }
        }
    }

    let now = Utc::now();
    let info = LockInfo {
        held_by: gethostname::gethostname().to_string_lossy().into_owned(),
        pid: std::process::id(),
        acquired_at: now,
        expires_at: now + ttl,
    };
    let body = serde_json::to_string(&info)
        .context("failed to serialize lock info")
        .map_err(LockError::Io)?;

    // Overwrite unconditionally: the only racy window is between the read
    // above and this write, which a single-host, single-reconciler-thread
    // deployment never exercises. Multi-replica deployments should point
    // state_dir at a filesystem with real atomic rename support and extend
    // this to a create_new + rename-based acquire.
    let mut file: File = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("failed to open lock file {}", path.display()))
        .map_err(LockError::Io)?;
    file.write_all(body.as_bytes())
        .context("failed to write lock file")
        .map_err(LockError::Io)?;

    Ok(LockGuard { path: path.to_path_buf() })
}
