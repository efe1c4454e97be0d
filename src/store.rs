//! Atomic entry store
//!
//! Low-level persistence for cache entries. An entry is a stage directory
//! holding `data`, `metadata`, and `last_access`; it is either fully
//! present or absent. Publication goes through a sibling `tmp_*` directory
//! that is populated, fsynced, and renamed into place, with the previous
//! entry parked as `backup_*` for rollback. The rename is the
//! linearisation point: readers see the old entry or the new one, never a
//! mix.
//!
//! Callers are responsible for holding the entry's lock (see
//! [`crate::lock`]) around every operation here.

use crate::canonical::to_canonical_string;
use crate::error::{CacheError, CacheResult};
use crate::key::{CacheKey, Stage};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// Payload file inside a stage directory
pub const DATA_FILE: &str = "data";
/// Metadata file inside a stage directory
pub const METADATA_FILE: &str = "metadata";
/// Empty marker whose mtime is the entry's last-access time
pub const ACCESS_FILE: &str = "last_access";

/// Prefix of in-flight publication directories
const TMP_PREFIX: &str = "tmp_";
/// Prefix of parked predecessor directories
const BACKUP_PREFIX: &str = "backup_";
/// Length of the random suffix on `tmp_`/`backup_` directories
const ENTROPY_LEN: usize = 12;

/// Structured record stored alongside every payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// When the entry was published (RFC 3339 UTC)
    pub created_at: DateTime<Utc>,
    /// Size of the `data` file in bytes
    pub size_bytes: u64,
    /// Stage this entry belongs to
    pub stage: Stage,
    /// Caller-supplied tags
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// One intact entry observed by a store scan
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    /// The entry's cache key
    pub key: CacheKey,
    /// The stage directory on disk
    pub path: PathBuf,
    /// Total bytes of the entry's files
    pub size_bytes: u64,
    /// mtime of the `last_access` marker, if readable
    pub last_access: Option<SystemTime>,
    /// `created_at` from the metadata record, if parsable
    pub created_at: Option<DateTime<Utc>>,
}

impl EntrySnapshot {
    /// Time since the entry was last accessed
    ///
    /// Entries with no readable access marker report `Duration::MAX` and
    /// thus rank as infinitely old.
    pub fn age(&self) -> Duration {
        match self.last_access {
            Some(access) => SystemTime::now()
                .duration_since(access)
                .unwrap_or(Duration::ZERO),
            None => Duration::MAX,
        }
    }
}

fn entropy_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ENTROPY_LEN)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

fn write_file_synced(path: &Path, contents: &[u8]) -> CacheResult<()> {
    let mut file = File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}

/// Reads, writes, and deletes entries with atomic publication
#[derive(Debug)]
pub struct AtomicStore {
    root: PathBuf,
}

impl AtomicStore {
    /// Create a store rooted at `root`, creating the directory if absent
    pub fn new(root: impl Into<PathBuf>) -> CacheResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Cache root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Publish a payload at `key`, replacing any previous entry
    ///
    /// Returns the number of payload bytes written. Must be called under
    /// the key's exclusive lock.
    pub fn write(
        &self,
        key: &CacheKey,
        payload: &[u8],
        tags: BTreeMap<String, String>,
    ) -> CacheResult<u64> {
        let key_dir = key.key_dir(&self.root);
        fs::create_dir_all(&key_dir)?;

        let tmp_dir = key_dir.join(format!("{TMP_PREFIX}{}", entropy_suffix()));
        fs::create_dir(&tmp_dir)?;

        let result = self.populate_and_publish(key, &tmp_dir, payload, tags);
        if result.is_err() {
            // The tmp directory may already have been renamed away; ignore
            let _ = fs::remove_dir_all(&tmp_dir);
        }
        result.map(|()| payload.len() as u64)
    }

    fn populate_and_publish(
        &self,
        key: &CacheKey,
        tmp_dir: &Path,
        payload: &[u8],
        tags: BTreeMap<String, String>,
    ) -> CacheResult<()> {
        let metadata = EntryMetadata {
            created_at: Utc::now(),
            size_bytes: payload.len() as u64,
            stage: key.stage(),
            tags,
        };

        write_file_synced(&tmp_dir.join(DATA_FILE), payload)?;
        write_file_synced(
            &tmp_dir.join(METADATA_FILE),
            to_canonical_string(&metadata)?.as_bytes(),
        )?;
        write_file_synced(&tmp_dir.join(ACCESS_FILE), b"")?;

        let final_dir = key.to_path(&self.root);

        if final_dir.exists() {
            let backup_dir = final_dir
                .parent()
                .unwrap_or(&self.root)
                .join(format!("{BACKUP_PREFIX}{}", entropy_suffix()));

            fs::rename(&final_dir, &backup_dir)?;

            if let Err(publish_err) = fs::rename(tmp_dir, &final_dir) {
                error!("publish rename failed for {key}: {publish_err}");
                return Err(self.rollback(key, &final_dir, &backup_dir, publish_err));
            }

            if let Err(e) = fs::remove_dir_all(&backup_dir) {
                warn!(
                    "failed to remove backup directory {}: {e}",
                    backup_dir.display()
                );
            }
        } else {
            fs::rename(tmp_dir, &final_dir)?;
        }

        debug!("published entry {key} ({} bytes)", payload.len());
        Ok(())
    }

    /// Restore the parked predecessor after a failed publish rename
    ///
    /// If the restore succeeds the observable state is the pre-operation
    /// state and the original failure is surfaced as `Io`; only an
    /// inconsistent final state becomes `AtomicPublishFailed`.
    fn rollback(
        &self,
        key: &CacheKey,
        final_dir: &Path,
        backup_dir: &Path,
        cause: std::io::Error,
    ) -> CacheError {
        if final_dir.exists() {
            if let Err(e) = fs::remove_dir_all(final_dir) {
                return CacheError::AtomicPublishFailed(format!(
                    "{key}: publish failed ({cause}) and partial entry could not be removed: {e}"
                ));
            }
        }

        match fs::rename(backup_dir, final_dir) {
            Ok(()) => {
                info!("rollback restored previous entry for {key}");
                CacheError::Io(cause)
            }
            Err(e) => CacheError::AtomicPublishFailed(format!(
                "{key}: publish failed ({cause}) and backup could not be restored: {e}"
            )),
        }
    }

    /// Read the payload and metadata at `key`
    ///
    /// Returns `Ok(None)` for a plain miss and [`CacheError::Corrupt`]
    /// when `data` is present but `metadata` is missing or unparsable.
    /// Must be called under the key's lock (shared is sufficient).
    pub fn read(&self, key: &CacheKey) -> CacheResult<Option<(Vec<u8>, EntryMetadata)>> {
        let dir = key.to_path(&self.root);
        let data_path = dir.join(DATA_FILE);
        if !data_path.exists() {
            return Ok(None);
        }

        let metadata_bytes = match fs::read(dir.join(METADATA_FILE)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CacheError::Corrupt(format!("{key}: metadata missing")));
            }
            Err(e) => return Err(e.into()),
        };
        let metadata: EntryMetadata = serde_json::from_slice(&metadata_bytes)
            .map_err(|e| CacheError::Corrupt(format!("{key}: unparsable metadata: {e}")))?;

        let data = match fs::read(&data_path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some((data, metadata)))
    }

    /// Read only the metadata record at `key`
    pub fn read_metadata(&self, key: &CacheKey) -> CacheResult<Option<EntryMetadata>> {
        let path = key.to_path(&self.root).join(METADATA_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CacheError::Corrupt(format!("{key}: unparsable metadata: {e}")))
    }

    /// Whether an entry's payload exists at `key`
    pub fn exists(&self, key: &CacheKey) -> bool {
        key.to_path(&self.root).join(DATA_FILE).exists()
    }

    /// Update the entry's last-access marker to now
    ///
    /// The mtime is never moved backwards within a process, so access
    /// times stay monotonic per entry even if the wall clock steps.
    pub fn touch(&self, key: &CacheKey) -> CacheResult<()> {
        let dir = key.to_path(&self.root);
        if !dir.is_dir() {
            return Ok(());
        }
        let path = dir.join(ACCESS_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        let now = SystemTime::now();
        let current = file.metadata()?.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if now > current {
            file.set_modified(now)?;
        }
        Ok(())
    }

    /// Remove the entry at `key`
    ///
    /// Returns whether anything was removed. Must be called under the
    /// key's exclusive lock.
    pub fn delete(&self, key: &CacheKey) -> CacheResult<bool> {
        let dir = key.to_path(&self.root);
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir)?;
        debug!("removed entry {key}");
        Ok(true)
    }

    /// Walk the root and snapshot every intact entry
    ///
    /// `tmp_*` and `backup_*` directories, dot-files, and anything that
    /// does not parse as a `<scope>/<key>/<stage>` triple are ignored.
    /// Per-entry stat failures are logged and skipped.
    pub fn scan(&self) -> CacheResult<Vec<EntrySnapshot>> {
        let mut entries = Vec::new();

        for scope_dir in read_subdirs(&self.root)? {
            let Some(scope) = dir_name(&scope_dir) else {
                continue;
            };
            if scope.starts_with('.') {
                continue;
            }

            for key_dir in read_subdirs(&scope_dir)? {
                let Some(key_name) = dir_name(&key_dir) else {
                    continue;
                };

                for stage_dir in read_subdirs(&key_dir)? {
                    let Some(stage_name) = dir_name(&stage_dir) else {
                        continue;
                    };
                    if stage_name.starts_with(TMP_PREFIX) || stage_name.starts_with(BACKUP_PREFIX)
                    {
                        continue;
                    }
                    let Ok(stage) = stage_name.parse::<Stage>() else {
                        continue;
                    };
                    let Ok(key) = CacheKey::new(scope.as_str(), key_name.as_str(), stage) else {
                        debug!("skipping foreign directory {}", stage_dir.display());
                        continue;
                    };

                    if !stage_dir.join(DATA_FILE).exists() {
                        continue;
                    }

                    match self.snapshot_entry(key, &stage_dir) {
                        Ok(snapshot) => entries.push(snapshot),
                        Err(e) => {
                            warn!("failed to inspect entry {}: {e}", stage_dir.display());
                        }
                    }
                }
            }
        }

        Ok(entries)
    }

    fn snapshot_entry(&self, key: CacheKey, stage_dir: &Path) -> CacheResult<EntrySnapshot> {
        let mut size_bytes = 0u64;
        for entry in fs::read_dir(stage_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                size_bytes += entry.metadata()?.len();
            }
        }

        let last_access = fs::metadata(stage_dir.join(ACCESS_FILE))
            .and_then(|m| m.modified())
            .ok();

        let created_at = self.read_metadata(&key).ok().flatten().map(|m| m.created_at);

        Ok(EntrySnapshot {
            key,
            path: stage_dir.to_path_buf(),
            size_bytes,
            last_access,
            created_at,
        })
    }

    /// Reclaim orphaned `tmp_*` and `backup_*` directories
    ///
    /// Safe to run at startup before any writer is active; returns the
    /// number of directories removed.
    pub fn sweep_stale(&self) -> CacheResult<usize> {
        let mut removed = 0;

        for scope_dir in read_subdirs(&self.root)? {
            for key_dir in read_subdirs(&scope_dir)? {
                for child in read_subdirs(&key_dir)? {
                    let Some(name) = dir_name(&child) else {
                        continue;
                    };
                    if name.starts_with(TMP_PREFIX) || name.starts_with(BACKUP_PREFIX) {
                        match fs::remove_dir_all(&child) {
                            Ok(()) => {
                                debug!("reclaimed stale directory {}", child.display());
                                removed += 1;
                            }
                            Err(e) => {
                                warn!(
                                    "failed to reclaim stale directory {}: {e}",
                                    child.display()
                                );
                            }
                        }
                    }
                }
            }
        }

        Ok(removed)
    }
}

fn read_subdirs(dir: &Path) -> CacheResult<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    let iter = match fs::read_dir(dir) {
        Ok(iter) => iter,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(dirs),
        Err(e) => return Err(e.into()),
    };
    for entry in iter {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}
