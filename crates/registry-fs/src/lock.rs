//! Advisory lock files with bounded, non-blocking acquisition.
//!
//! Writers never block indefinitely on a lock held by another writer. A
//! [`LockFile::acquire`] call polls with `try_lock_exclusive` under an
//! exponential backoff and gives up with [`Error::LockBusy`] once the retry
//! budget is spent.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Retry budget for lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockPolicy {
    /// Delay before the first retry, in milliseconds.
    pub initial_interval_ms: u64,
    /// Upper bound for a single retry delay, in milliseconds.
    pub max_interval_ms: u64,
    /// Total time budget before giving up, in milliseconds.
    pub max_elapsed_ms: u64,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: 10,
            max_interval_ms: 100,
            max_elapsed_ms: 500,
        }
    }
}

impl LockPolicy {
    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self {
            initial_interval_ms: 1,
            max_interval_ms: 1,
            max_elapsed_ms: 0,
        }
    }
}

/// An exclusively held advisory lock. Released when dropped.
#[derive(Debug)]
pub struct LockFile {
    file: File,
    path: PathBuf,
}

impl LockFile {
    /// Acquire an exclusive lock on `path`, creating the file if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockBusy`] when the lock is still contended after the
    /// retry budget, or [`Error::Io`] when the lock file cannot be opened.
    pub fn acquire(path: &Path, policy: &LockPolicy) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::io(path, e))?;

        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(policy.initial_interval_ms))
            .with_max_interval(Duration::from_millis(policy.max_interval_ms))
            .with_max_elapsed_time(Some(Duration::from_millis(policy.max_elapsed_ms)))
            .build();

        let contended = fs2::lock_contended_error().raw_os_error();
        let attempt = || {
            file.try_lock_exclusive().map_err(|e| {
                if e.kind() == std::io::ErrorKind::WouldBlock || e.raw_os_error() == contended {
                    tracing::debug!(path = %path.display(), "lock contended, retrying");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        };

        match backoff::retry(backoff, attempt) {
            Ok(()) => {
                tracing::trace!(path = %path.display(), "lock acquired");
                Ok(Self {
                    file,
                    path: path.to_path_buf(),
                })
            }
            Err(backoff::Error::Permanent(e)) => Err(Error::io(path, e)),
            Err(backoff::Error::Transient { .. }) => {
                tracing::warn!(path = %path.display(), "gave up waiting for lock");
                Err(Error::LockBusy {
                    path: path.to_path_buf(),
                })
            }
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release lock");
        }
    }
}
