//! Run lock - serialises migration runs against one database file
//!
//! Uses an exclusive advisory file lock (flock on Unix, LockFileEx on
//! Windows) on a sidecar file next to the database. The lock is held for the
//! whole run and released when the guard is dropped.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::domain::{MigrationError, Result};

/// Initial poll delay in milliseconds (doubles each attempt up to the cap)
const INITIAL_RETRY_DELAY_MS: u64 = 25;

/// Upper bound for a single poll delay
const MAX_RETRY_DELAY_MS: u64 = 500;

/// Lock file path for a database file: `<db>.lock`
pub fn lock_path_for(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

/// Held exclusive lock; released on drop
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Acquire the lock, polling with exponential backoff until `timeout`
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let start = Instant::now();
        let mut delay = Duration::from_millis(INITIAL_RETRY_DELAY_MS);

        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => {
                    log::debug!("Acquired migration lock {}", path.display());
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    let waited = start.elapsed();
                    if waited >= timeout {
                        return Err(MigrationError::LockTimeout {
                            path: path.display().to_string(),
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    log::debug!(
                        "Migration lock {} is held, retrying in {}ms",
                        path.display(),
                        delay.as_millis()
                    );
                    thread::sleep(delay.min(timeout - waited));
                    delay = (delay * 2).min(Duration::from_millis(MAX_RETRY_DELAY_MS));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            log::warn!("Failed to release migration lock {}: {}", self.path.display(), e);
        }
    }
}
