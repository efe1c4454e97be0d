//! Per-key mutual exclusion
//!
//! Two layers combine so that concurrent producers for the same key
//! serialise and readers only ever observe fully published entries:
//!
//! - In-process: a lock table handing out one `RwLock` per stringified
//!   cache key. The table's own mutex is only held while looking up or
//!   creating an entry, never across I/O.
//! - Cross-process: an advisory file lock on the key directory's `.lock`
//!   file, exclusive for writers and shared for readers.
//!
//! Acquisition order is always table mutex → per-key rwlock → file lock;
//! no caller holds more than one per-key lock at a time.

use crate::error::{CacheError, CacheResult};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::error;

/// Name of the advisory lock file inside each key directory
pub const LOCK_FILE_NAME: &str = ".lock";

/// Poll interval while waiting for a contended file lock
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// In-process lock table keyed by stringified cache key
///
/// Locks are created lazily and retained for the life of the process.
#[derive(Debug, Default)]
pub struct KeyLockTable {
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl KeyLockTable {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the lock for a key
    pub fn lock_for(&self, key: &str) -> Arc<RwLock<()>> {
        let mut map = self.locks.lock();
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Number of keys that have been locked so far
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Whether any key has been locked yet
    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

/// Lock mode for cross-process advisory locks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Parallel readers
    Shared,
    /// Writers, eviction, invalidation
    Exclusive,
}

/// An acquired advisory file lock, released on drop
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire the advisory lock at `path`
    ///
    /// With a timeout the lock is polled; exhausting the timeout yields
    /// [`CacheError::LockTimeout`]. Without one, acquisition blocks
    /// indefinitely — callers must opt into that explicitly.
    pub fn acquire(path: &Path, mode: LockMode, timeout: Option<Duration>) -> CacheResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        match timeout {
            None => match mode {
                LockMode::Exclusive => fs2::FileExt::lock_exclusive(&file)?,
                LockMode::Shared => fs2::FileExt::lock_shared(&file)?,
            },
            Some(limit) => {
                let deadline = Instant::now() + limit;
                loop {
                    let attempt = match mode {
                        LockMode::Exclusive => fs2::FileExt::try_lock_exclusive(&file),
                        LockMode::Shared => fs2::FileExt::try_lock_shared(&file),
                    };
                    match attempt {
                        Ok(()) => break,
                        Err(e)
                            if e.raw_os_error()
                                == fs2::lock_contended_error().raw_os_error() =>
                        {
                            if Instant::now() >= deadline {
                                return Err(CacheError::LockTimeout(
                                    path.display().to_string(),
                                ));
                            }
                            std::thread::sleep(LOCK_POLL_INTERVAL);
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            error!("failed to unlock {}: {e}", self.path.display());
        }
    }
}
