//! Cache manager
//!
//! The owning façade over the store, lock table, metrics, and eviction
//! engine. A manager is constructed with a cache root and configuration,
//! owned by the host, and shared by explicit handle passing (`Arc`); there
//! is no process-global instance.
//!
//! Operation flow for a put: validate payload → per-key exclusive lock →
//! atomic write → metrics → eviction evaluation → periodic metrics export.
//! For a get: per-key shared lock → touch access marker → read → metrics.

use crate::canonical::to_canonical_string;
use crate::error::{CacheError, CacheResult};
use crate::eviction::{CleanupReport, CleanupTrigger, EvictionConfig, EvictionEngine};
use crate::health::HealthReport;
use crate::key::{CacheKey, Stage};
use crate::lock::{FileLock, KeyLockTable, LOCK_FILE_NAME, LockMode};
use crate::metrics::{CacheMetrics, MetricsSnapshot, UsageStats};
use crate::payload;
use crate::store::{AtomicStore, EntrySnapshot};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Periodic stats export under the cache root
pub const METRICS_FILE: &str = "cache_metrics.json";
/// Periodic health export under the cache root
pub const HEALTH_FILE: &str = "cache_health.json";

/// Export cadence in operations
const EXPORT_EVERY_OPS: u64 = 50;
/// How long `force_cleanup` waits for a pass already in flight
const FORCE_CLEANUP_WAIT: Duration = Duration::from_secs(30);
/// Shutdown poll granularity of the maintenance thread
const MAINTENANCE_POLL: Duration = Duration::from_millis(200);

/// Cache-wide configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Eviction policy
    pub eviction: EvictionConfig,
    /// Bound on advisory lock acquisition; `None` blocks indefinitely and
    /// must be chosen explicitly via [`CacheConfig::with_blocking_locks`]
    pub lock_timeout: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            eviction: EvictionConfig::default(),
            lock_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl CacheConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the eviction policy
    pub fn with_eviction(mut self, eviction: EvictionConfig) -> Self {
        self.eviction = eviction;
        self
    }

    /// Set the lock acquisition timeout
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Opt into blocking indefinitely on lock acquisition
    pub fn with_blocking_locks(mut self) -> Self {
        self.lock_timeout = None;
        self
    }
}

/// Combined live-usage and metrics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsReport {
    /// Cache root directory
    pub cache_root: PathBuf,
    /// Configured size bound
    pub max_cache_size_bytes: u64,
    /// Live on-disk usage
    pub usage: UsageStats,
    /// Operation metrics
    pub metrics: MetricsSnapshot,
}

/// Content-addressable cache manager with atomic operations and locking
#[derive(Debug)]
pub struct CacheManager {
    store: AtomicStore,
    locks: KeyLockTable,
    metrics: CacheMetrics,
    eviction: EvictionEngine,
    lock_timeout: Option<Duration>,
}

impl CacheManager {
    /// Create a manager rooted at `cache_root` with a size bound
    pub fn new(cache_root: impl Into<PathBuf>, max_cache_size_bytes: u64) -> CacheResult<Self> {
        Self::with_config(
            cache_root,
            CacheConfig::default()
                .with_eviction(EvictionConfig::default().with_max_cache_size(max_cache_size_bytes)),
        )
    }

    /// Create a manager with full configuration
    ///
    /// Creates the root directory if needed and reclaims any `tmp_*` or
    /// `backup_*` directories orphaned by a previous crash.
    pub fn with_config(cache_root: impl Into<PathBuf>, config: CacheConfig) -> CacheResult<Self> {
        let store = AtomicStore::new(cache_root)?;
        let eviction = EvictionEngine::new(config.eviction)?;

        let swept = store.sweep_stale()?;
        if swept > 0 {
            info!("reclaimed {swept} stale temporary directories");
        }

        info!(
            "cache manager initialized at {} (max size: {} bytes)",
            store.root().display(),
            eviction.config().max_cache_size_bytes
        );

        Ok(Self {
            store,
            locks: KeyLockTable::new(),
            metrics: CacheMetrics::new(),
            eviction,
            lock_timeout: config.lock_timeout,
        })
    }

    /// Cache root directory
    pub fn root(&self) -> &Path {
        self.store.root()
    }

    fn lock_path(&self, key: &CacheKey) -> PathBuf {
        key.key_dir(self.store.root()).join(LOCK_FILE_NAME)
    }

    /// Store a payload at a cache key
    ///
    /// The payload must satisfy its stage's contract (see [`crate::payload`]).
    /// Publication is atomic: concurrent readers observe the previous
    /// entry or the new one, never a mix.
    pub fn put(
        &self,
        key: &CacheKey,
        payload_bytes: &[u8],
        tags: BTreeMap<String, String>,
    ) -> CacheResult<()> {
        payload::validate(key.stage(), payload_bytes)?;

        let start = Instant::now();
        let result = {
            let key_lock = self.locks.lock_for(&key.to_string());
            let _guard = key_lock.write();
            let _file_lock =
                FileLock::acquire(&self.lock_path(key), LockMode::Exclusive, self.lock_timeout)?;
            self.store.write(key, payload_bytes, tags)
        };

        match result {
            Ok(bytes) => {
                self.metrics.record_write(key.stage(), start.elapsed(), bytes);
                debug!("cache write: {key} ({bytes} bytes)");
                self.maybe_cleanup();
                self.maybe_export_metrics();
                Ok(())
            }
            Err(e) => {
                self.metrics.record_error();
                Err(e)
            }
        }
    }

    /// Store a value as canonical JSON
    pub fn put_json<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        tags: BTreeMap<String, String>,
    ) -> CacheResult<()> {
        self.put(key, to_canonical_string(value)?.as_bytes(), tags)
    }

    /// Retrieve the payload at a cache key
    ///
    /// Returns `Ok(None)` on a miss. A corrupt entry counts an error, is
    /// repair-deleted, and surfaces as a miss; it is never served.
    pub fn get(&self, key: &CacheKey) -> CacheResult<Option<Vec<u8>>> {
        let start = Instant::now();

        // Absence is stable under the publication protocol; checking before
        // locking keeps pure misses from creating key directories.
        if !self.store.exists(key) {
            self.metrics.record_miss(key.stage());
            return Ok(None);
        }

        let read_result = {
            let key_lock = self.locks.lock_for(&key.to_string());
            let _guard = key_lock.read();
            let _file_lock =
                FileLock::acquire(&self.lock_path(key), LockMode::Shared, self.lock_timeout)?;

            if !self.store.exists(key) {
                self.metrics.record_miss(key.stage());
                return Ok(None);
            }

            if let Err(e) = self.store.touch(key) {
                warn!("failed to touch access marker for {key}: {e}");
            }

            self.store.read(key)
        };

        // A payload that no longer satisfies its stage contract is corrupt,
        // the same as a missing metadata sibling
        let read_result = read_result.and_then(|entry| match entry {
            Some((data, metadata)) => match payload::validate(key.stage(), &data) {
                Ok(()) => Ok(Some((data, metadata))),
                Err(_) => Err(CacheError::Corrupt(format!("{key}: unparsable payload"))),
            },
            None => Ok(None),
        });

        match read_result {
            Ok(Some((data, _metadata))) => {
                self.metrics
                    .record_hit(key.stage(), start.elapsed(), data.len() as u64);
                debug!("cache hit: {key} ({} bytes)", data.len());
                Ok(Some(data))
            }
            Ok(None) => {
                self.metrics.record_miss(key.stage());
                Ok(None)
            }
            Err(CacheError::Corrupt(message)) => {
                warn!("corrupt cache entry treated as miss: {message}");
                self.metrics.record_error();
                self.metrics.record_miss(key.stage());
                self.repair_delete(key);
                Ok(None)
            }
            Err(e) => {
                self.metrics.record_error();
                Err(e)
            }
        }
    }

    /// Retrieve and deserialize a JSON payload
    pub fn get_json<T: DeserializeOwned>(&self, key: &CacheKey) -> CacheResult<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether an intact payload exists at `key`
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.store.exists(key)
    }

    /// Remove the entry at `key`
    pub fn remove(&self, key: &CacheKey) -> CacheResult<bool> {
        let key_lock = self.locks.lock_for(&key.to_string());
        let _guard = key_lock.write();
        let _file_lock =
            FileLock::acquire(&self.lock_path(key), LockMode::Exclusive, self.lock_timeout)?;
        self.store.delete(key)
    }

    /// Delete a corrupt entry so it can never be served again
    fn repair_delete(&self, key: &CacheKey) {
        let outcome = {
            let key_lock = self.locks.lock_for(&key.to_string());
            let _guard = key_lock.write();
            match FileLock::acquire(&self.lock_path(key), LockMode::Exclusive, self.lock_timeout) {
                Ok(_file_lock) => self.store.delete(key),
                Err(e) => Err(e),
            }
        };
        match outcome {
            Ok(true) => info!("repair-deleted corrupt entry {key}"),
            Ok(false) => {}
            Err(e) => warn!("failed to repair-delete corrupt entry {key}: {e}"),
        }
    }

    /// Record an advisory build-time sample for a stage
    pub fn record_build_time(&self, stage: Stage, seconds: f64) {
        self.metrics.record_build_time(stage, seconds);
        debug!("recorded build time for stage {stage}: {seconds:.3}s");
    }

    /// Remove entries in `scope` whose key matches `pattern`
    ///
    /// `"*"` matches every key; anything else matches as a substring of
    /// the key's hex. Returns the number of entries removed.
    pub fn invalidate(&self, scope: &str, pattern: &str) -> CacheResult<usize> {
        let scope_dir = self.store.root().join(scope);
        if !scope_dir.is_dir() {
            return Ok(0);
        }

        let entries = self.store.scan()?;
        let mut removed = 0usize;

        for entry in entries
            .iter()
            .filter(|e| e.key.scope() == scope)
            .filter(|e| pattern == "*" || e.key.key().contains(pattern))
        {
            match self.remove(&entry.key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("failed to invalidate {}: {e}", entry.key);
                    self.metrics.record_error();
                }
            }
        }

        // Tidy up emptied key directories (and the scope for a full wipe);
        // lock files inside them are recreated on demand.
        if pattern == "*" {
            if let Err(e) = std::fs::remove_dir_all(&scope_dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to remove scope directory {}: {e}", scope_dir.display());
                }
            }
        }

        info!("invalidated {removed} cache entries in scope {scope:?} with pattern {pattern:?}");
        Ok(removed)
    }

    /// Run a cleanup pass now, optionally toward an explicit target
    ///
    /// Waits for an in-flight pass to finish before starting its own.
    pub fn force_cleanup(
        &self,
        target_utilization_percent: Option<f64>,
    ) -> CacheResult<CleanupReport> {
        let deadline = Instant::now() + FORCE_CLEANUP_WAIT;
        while !self.eviction.try_begin() {
            if Instant::now() >= deadline {
                return Err(CacheError::LockTimeout(
                    "eviction pass already in progress".to_string(),
                ));
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let entries = match self.store.scan() {
            Ok(entries) => entries,
            Err(e) => {
                self.eviction.abort();
                return Err(e);
            }
        };
        let usage = UsageStats::from_entries(&entries, self.max_cache_size_bytes());
        info!(
            "force cleanup requested (current utilization: {:.1}%)",
            usage.utilization_percent
        );

        let report = self.eviction.execute_with_target(
            entries,
            usage.utilization_percent,
            target_utilization_percent,
            CleanupTrigger::Manual,
            |entry| self.remove_for_eviction(entry),
        );
        self.metrics
            .record_cleanup(Duration::from_secs_f64(report.duration_seconds));
        self.eviction.finish(report.clone());
        self.export_best_effort();

        Ok(report)
    }

    /// Evaluate eviction triggers and run passes while they keep firing
    ///
    /// Called after every put and by the maintenance timer. Concurrent
    /// triggers coalesce inside the engine's state machine.
    pub fn maybe_cleanup(&self) {
        loop {
            let entries = match self.store.scan() {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("cleanup scan failed: {e}");
                    self.metrics.record_error();
                    return;
                }
            };

            let usage = UsageStats::from_entries(&entries, self.max_cache_size_bytes());
            let has_aged = self.eviction.has_aged_entries(&entries);
            let Some(trigger) = self
                .eviction
                .evaluate_triggers(usage.utilization_percent, has_aged)
            else {
                return;
            };

            if !self.eviction.try_begin() {
                return;
            }

            info!(
                "starting cleanup pass ({trigger:?}, utilization {:.1}%)",
                usage.utilization_percent
            );
            let report = self.eviction.execute(
                entries,
                usage.utilization_percent,
                trigger,
                |entry| self.remove_for_eviction(entry),
            );
            self.metrics
                .record_cleanup(Duration::from_secs_f64(report.duration_seconds));
            let pending = self.eviction.finish(report);
            self.export_best_effort();

            if !pending {
                return;
            }
        }
    }

    /// Remove one entry under its exclusive lock; never aborts a pass
    fn remove_for_eviction(&self, entry: &EntrySnapshot) -> bool {
        let key = &entry.key;
        let key_lock = self.locks.lock_for(&key.to_string());
        let _guard = key_lock.write();

        let file_lock =
            FileLock::acquire(&self.lock_path(key), LockMode::Exclusive, self.lock_timeout);
        let _file_lock = match file_lock {
            Ok(lock) => lock,
            Err(e) => {
                warn!("skipping eviction of {key}: {e}");
                return false;
            }
        };

        match self.store.delete(key) {
            Ok(true) => {
                self.metrics.record_eviction();
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!("failed to evict {key}: {e}");
                self.metrics.record_error();
                false
            }
        }
    }

    fn max_cache_size_bytes(&self) -> u64 {
        self.eviction.config().max_cache_size_bytes
    }

    /// Live usage and operation metrics
    pub fn stats(&self) -> CacheResult<CacheStatsReport> {
        let entries = self.store.scan()?;
        Ok(CacheStatsReport {
            cache_root: self.store.root().to_path_buf(),
            max_cache_size_bytes: self.max_cache_size_bytes(),
            usage: UsageStats::from_entries(&entries, self.max_cache_size_bytes()),
            metrics: self.metrics.snapshot(),
        })
    }

    /// Health status with recommendations and the last cleanup report
    pub fn health_report(&self) -> CacheResult<HealthReport> {
        let entries = self.store.scan()?;
        let usage = UsageStats::from_entries(&entries, self.max_cache_size_bytes());
        Ok(HealthReport::generate(
            self.metrics.snapshot(),
            usage,
            self.eviction.last_report(),
        ))
    }

    /// Serialise stats and health to their files under the cache root
    pub fn export_metrics(&self) -> CacheResult<()> {
        let stats = self.stats()?;
        std::fs::write(
            self.store.root().join(METRICS_FILE),
            to_canonical_string(&stats)?,
        )?;

        let health = HealthReport::generate(
            stats.metrics.clone(),
            stats.usage.clone(),
            self.eviction.last_report(),
        );
        std::fs::write(
            self.store.root().join(HEALTH_FILE),
            to_canonical_string(&health)?,
        )?;

        debug!("cache metrics exported to {}", self.store.root().display());
        Ok(())
    }

    fn maybe_export_metrics(&self) {
        let due = self.metrics.operation_count() % EXPORT_EVERY_OPS == 0
            || !self.store.root().join(METRICS_FILE).exists();
        if due {
            self.export_best_effort();
        }
    }

    fn export_best_effort(&self) {
        if let Err(e) = self.export_metrics() {
            warn!("failed to export cache metrics: {e}");
        }
    }

    /// Start the background maintenance timer
    ///
    /// The thread evaluates eviction triggers every
    /// `cleanup_interval_minutes`; the handle stops and joins it on drop.
    pub fn start_maintenance(manager: &Arc<Self>) -> CacheResult<MaintenanceHandle> {
        let manager = Arc::clone(manager);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let interval = manager.eviction.config().cleanup_interval();

        let thread = std::thread::Builder::new()
            .name("stagecache-maintenance".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::Relaxed) {
                    let mut slept = Duration::ZERO;
                    while slept < interval && !stop_flag.load(Ordering::Relaxed) {
                        let step = MAINTENANCE_POLL.min(interval - slept);
                        std::thread::sleep(step);
                        slept += step;
                    }
                    if stop_flag.load(Ordering::Relaxed) {
                        break;
                    }
                    manager.maybe_cleanup();
                }
            })?;

        Ok(MaintenanceHandle {
            stop,
            thread: Some(thread),
        })
    }
}

/// Handle for the background maintenance thread
///
/// Dropping the handle signals the thread to stop and joins it.
#[derive(Debug)]
pub struct MaintenanceHandle {
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Stop the maintenance thread and wait for it to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> (tempfile::TempDir, CacheManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = CacheManager::new(dir.path(), 1024 * 1024 * 1024).unwrap();
        (dir, manager)
    }

    fn key(hex: char, stage: Stage) -> CacheKey {
        CacheKey::new("compilation", hex.to_string().repeat(64), stage).unwrap()
    }

    #[test]
    fn test_put_get_round_trip() {
        let (_dir, manager) = manager();
        let key = key('a', Stage::Code);
        let payload = serde_json::to_vec(&json!({"x": 1})).unwrap();

        manager.put(&key, &payload, BTreeMap::new()).unwrap();
        assert!(manager.contains(&key));
        assert_eq!(manager.get(&key).unwrap(), Some(payload));
    }

    #[test]
    fn test_json_round_trip() {
        let (_dir, manager) = manager();
        let key = key('b', Stage::Inputs);

        manager
            .put_json(&key, &json!({"b": [1, 2], "a": true}), BTreeMap::new())
            .unwrap();
        let value: serde_json::Value = manager.get_json(&key).unwrap().unwrap();
        assert_eq!(value, json!({"a": true, "b": [1, 2]}));
    }

    #[test]
    fn test_invalid_payload_is_rejected() {
        let (_dir, manager) = manager();
        let code_key = key('c', Stage::Code);
        assert!(manager.put(&code_key, b"not json", BTreeMap::new()).is_err());

        let web_key = key('c', Stage::Web);
        let not_a_manifest = serde_json::to_vec(&json!({"x": 1})).unwrap();
        assert!(manager.put(&web_key, &not_a_manifest, BTreeMap::new()).is_err());
    }

    #[test]
    fn test_miss_and_hit_counters() {
        let (_dir, manager) = manager();
        let code_key = key('d', Stage::Code);
        manager.put_json(&code_key, &json!({"x": 1}), BTreeMap::new()).unwrap();

        assert!(manager.get(&code_key).unwrap().is_some());
        assert!(manager.get(&key('d', Stage::Web)).unwrap().is_none());

        let stats = manager.stats().unwrap();
        assert_eq!(stats.metrics.hits, 1);
        assert_eq!(stats.metrics.misses, 1);
        assert_eq!(stats.metrics.writes, 1);
    }

    #[test]
    fn test_corrupt_entry_surfaces_as_miss_and_is_repaired() {
        let (_dir, manager) = manager();
        let key = key('e', Stage::Assets);
        manager.put_json(&key, &json!({"x": 1}), BTreeMap::new()).unwrap();

        let metadata_path = key.to_path(manager.root()).join(crate::store::METADATA_FILE);
        std::fs::remove_file(&metadata_path).unwrap();

        assert_eq!(manager.get(&key).unwrap(), None);
        // Repair-deleted on first sighting
        assert!(!key.to_path(manager.root()).exists());

        let stats = manager.stats().unwrap();
        assert_eq!(stats.metrics.errors, 1);
        assert_eq!(stats.metrics.misses, 1);
    }

    #[test]
    fn test_truncated_payload_surfaces_as_miss() {
        let (_dir, manager) = manager();
        let key = key('e', Stage::Code);
        manager.put_json(&key, &json!({"x": 1}), BTreeMap::new()).unwrap();

        let data_path = key.to_path(manager.root()).join(crate::store::DATA_FILE);
        std::fs::write(&data_path, br#"{"x":"#).unwrap();

        assert_eq!(manager.get(&key).unwrap(), None);
        assert!(!key.to_path(manager.root()).exists());
        assert_eq!(manager.stats().unwrap().metrics.errors, 1);
    }

    #[test]
    fn test_remove() {
        let (_dir, manager) = manager();
        let key = key('f', Stage::Desktop);
        let manifest = crate::payload::BuildManifest {
            build_dir: PathBuf::from("/builds/desktop/f"),
            entry_point: "game".to_string(),
            files: Vec::new(),
        };
        manager
            .put(&key, &manifest.to_bytes().unwrap(), BTreeMap::new())
            .unwrap();

        assert!(manager.remove(&key).unwrap());
        assert!(!manager.contains(&key));
        assert!(!manager.remove(&key).unwrap());
    }

    #[test]
    fn test_invalidate_scope() {
        let (_dir, manager) = manager();
        for hex in ['0', '1', '2'] {
            manager
                .put_json(&key(hex, Stage::Code), &json!({"n": hex.to_string()}), BTreeMap::new())
                .unwrap();
        }

        assert_eq!(manager.invalidate("compilation", "*").unwrap(), 3);
        for hex in ['0', '1', '2'] {
            assert_eq!(manager.get(&key(hex, Stage::Code)).unwrap(), None);
        }
        assert_eq!(manager.invalidate("compilation", "*").unwrap(), 0);
        assert_eq!(manager.invalidate("missing_scope", "*").unwrap(), 0);

        let stats = manager.stats().unwrap();
        assert_eq!(stats.usage.scope_bytes.get("compilation"), None);
    }

    #[test]
    fn test_invalidate_pattern() {
        let (_dir, manager) = manager();
        manager.put_json(&key('a', Stage::Code), &json!(1), BTreeMap::new()).unwrap();
        manager.put_json(&key('b', Stage::Code), &json!(2), BTreeMap::new()).unwrap();

        assert_eq!(manager.invalidate("compilation", "aaaa").unwrap(), 1);
        assert!(manager.get(&key('a', Stage::Code)).unwrap().is_none());
        assert!(manager.get(&key('b', Stage::Code)).unwrap().is_some());
    }

    #[test]
    fn test_export_metrics_files() {
        let (_dir, manager) = manager();
        manager
            .put_json(&key('a', Stage::Code), &json!({"x": 1}), BTreeMap::new())
            .unwrap();
        manager.export_metrics().unwrap();

        let metrics_text =
            std::fs::read_to_string(manager.root().join(METRICS_FILE)).unwrap();
        assert!(metrics_text.contains("\"writes\":1"));
        let health_text = std::fs::read_to_string(manager.root().join(HEALTH_FILE)).unwrap();
        assert!(health_text.contains("\"status\""));
    }

    #[test]
    fn test_metrics_files_do_not_scan_as_entries() {
        let (_dir, manager) = manager();
        manager.export_metrics().unwrap();
        let stats = manager.stats().unwrap();
        assert_eq!(stats.usage.entry_count, 0);
    }

    #[test]
    fn test_build_time_recording() {
        let (_dir, manager) = manager();
        manager.record_build_time(Stage::Web, 12.5);
        let stats = manager.stats().unwrap();
        assert!((stats.metrics.stages[&Stage::Web].avg_build_time_s - 12.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_force_cleanup_reports_state() {
        let (_dir, manager) = manager();
        manager
            .put_json(&key('a', Stage::Code), &json!({"x": 1}), BTreeMap::new())
            .unwrap();

        let report = manager.force_cleanup(None).unwrap();
        assert_eq!(report.trigger, CleanupTrigger::Manual);
        // Well under every threshold, so nothing is removed
        assert_eq!(report.entries_removed, 0);
        assert!(manager.contains(&key('a', Stage::Code)));
    }

    #[test]
    fn test_maintenance_handle_stops_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(CacheManager::new(dir.path(), 1024 * 1024).unwrap());
        let handle = CacheManager::start_maintenance(&manager).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        handle.stop();
    }
}
