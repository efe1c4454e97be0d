//! Cache performance metrics
//!
//! Hot-path counters are plain atomics so `put`/`get` never contend on a
//! lock just to count themselves. Rolling windows, per-stage breakdowns,
//! and build-time samples live behind a metrics-local mutex that is held
//! only during updates and snapshots, never across I/O.

use crate::key::Stage;
use crate::store::EntrySnapshot;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Rolling-window sizes for read and write durations
const IO_WINDOW: usize = 1000;
/// Rolling-window size for cleanup durations
const CLEANUP_WINDOW: usize = 100;
/// Rolling-window size for per-stage build-time samples
const BUILD_WINDOW: usize = 100;
/// Weight of the newest sample in the per-stage moving averages
const EMA_WEIGHT: f64 = 0.1;

/// Per-stage statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageMetrics {
    /// Cache hits for this stage
    pub hits: u64,
    /// Cache misses for this stage
    pub misses: u64,
    /// Writes for this stage
    pub writes: u64,
    /// Bytes served from this stage
    pub bytes_read: u64,
    /// Bytes written to this stage
    pub bytes_written: u64,
    /// Exponential moving average of read durations, in milliseconds
    pub avg_read_time_ms: f64,
    /// Exponential moving average of write durations, in milliseconds
    pub avg_write_time_ms: f64,
    /// Average of the rolling build-time window, in seconds
    pub avg_build_time_s: f64,
    /// Most recent access to this stage
    pub last_access: Option<DateTime<Utc>>,
}

impl StageMetrics {
    /// Hit rate for this stage as a percentage
    pub fn hit_rate_percent(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        }
    }
}

#[derive(Debug)]
struct MetricsInner {
    read_times: VecDeque<Duration>,
    write_times: VecDeque<Duration>,
    cleanup_times: VecDeque<Duration>,
    total_bytes_read: u64,
    total_bytes_written: u64,
    stage_stats: BTreeMap<Stage, StageMetrics>,
    build_times: BTreeMap<Stage, VecDeque<f64>>,
    last_cleanup: Option<DateTime<Utc>>,
}

impl MetricsInner {
    fn new() -> Self {
        Self {
            read_times: VecDeque::with_capacity(IO_WINDOW),
            write_times: VecDeque::with_capacity(IO_WINDOW),
            cleanup_times: VecDeque::with_capacity(CLEANUP_WINDOW),
            total_bytes_read: 0,
            total_bytes_written: 0,
            stage_stats: BTreeMap::new(),
            build_times: BTreeMap::new(),
            last_cleanup: None,
        }
    }

    fn stage(&mut self, stage: Stage) -> &mut StageMetrics {
        self.stage_stats.entry(stage).or_default()
    }
}

fn push_bounded<T>(window: &mut VecDeque<T>, value: T, cap: usize) {
    if window.len() == cap {
        window.pop_front();
    }
    window.push_back(value);
}

fn ema(current: f64, sample_ms: f64) -> f64 {
    if current == 0.0 {
        sample_ms
    } else {
        (1.0 - EMA_WEIGHT) * current + EMA_WEIGHT * sample_ms
    }
}

fn window_avg_ms(window: &VecDeque<Duration>) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    let total: Duration = window.iter().sum();
    total.as_secs_f64() * 1000.0 / window.len() as f64
}

/// Process-wide cache metrics
#[derive(Debug)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    evictions: AtomicU64,
    errors: AtomicU64,
    session_start: DateTime<Utc>,
    inner: Mutex<MetricsInner>,
}

impl CacheMetrics {
    /// Create empty metrics, stamping the session start
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            session_start: Utc::now(),
            inner: Mutex::new(MetricsInner::new()),
        }
    }

    /// Record a successful read
    pub fn record_hit(&self, stage: Stage, duration: Duration, bytes: u64) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        push_bounded(&mut inner.read_times, duration, IO_WINDOW);
        inner.total_bytes_read += bytes;
        let stats = inner.stage(stage);
        stats.hits += 1;
        stats.bytes_read += bytes;
        stats.avg_read_time_ms = ema(stats.avg_read_time_ms, duration.as_secs_f64() * 1000.0);
        stats.last_access = Some(Utc::now());
    }

    /// Record a miss
    pub fn record_miss(&self, stage: Stage) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().stage(stage).misses += 1;
    }

    /// Record a completed write
    pub fn record_write(&self, stage: Stage, duration: Duration, bytes: u64) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        push_bounded(&mut inner.write_times, duration, IO_WINDOW);
        inner.total_bytes_written += bytes;
        let stats = inner.stage(stage);
        stats.writes += 1;
        stats.bytes_written += bytes;
        stats.avg_write_time_ms = ema(stats.avg_write_time_ms, duration.as_secs_f64() * 1000.0);
    }

    /// Record one evicted entry
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an operational error
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed cleanup pass
    pub fn record_cleanup(&self, duration: Duration) {
        let mut inner = self.inner.lock();
        push_bounded(&mut inner.cleanup_times, duration, CLEANUP_WINDOW);
        inner.last_cleanup = Some(Utc::now());
    }

    /// Record an advisory build-time sample for a stage
    pub fn record_build_time(&self, stage: Stage, seconds: f64) {
        let mut inner = self.inner.lock();
        let window = inner.build_times.entry(stage).or_default();
        push_bounded(window, seconds, BUILD_WINDOW);
    }

    /// Total operations so far (hits + misses + writes)
    pub fn operation_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
            + self.misses.load(Ordering::Relaxed)
            + self.writes.load(Ordering::Relaxed)
    }

    /// Point-in-time snapshot of all counters and windows
    pub fn snapshot(&self) -> MetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);

        let inner = self.inner.lock();
        let mut stages = inner.stage_stats.clone();
        for (stage, window) in &inner.build_times {
            if window.is_empty() {
                continue;
            }
            let avg = window.iter().sum::<f64>() / window.len() as f64;
            stages.entry(*stage).or_default().avg_build_time_s = avg;
        }

        MetricsSnapshot {
            hits,
            misses,
            writes: self.writes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate_percent: if hits + misses == 0 {
                0.0
            } else {
                hits as f64 / (hits + misses) as f64 * 100.0
            },
            avg_read_time_ms: window_avg_ms(&inner.read_times),
            avg_write_time_ms: window_avg_ms(&inner.write_times),
            avg_cleanup_time_ms: window_avg_ms(&inner.cleanup_times),
            total_bytes_read: inner.total_bytes_read,
            total_bytes_written: inner.total_bytes_written,
            stages,
            session_start: self.session_start,
            last_cleanup: inner.last_cleanup,
        }
    }
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable snapshot of [`CacheMetrics`]
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Total writes
    pub writes: u64,
    /// Total evicted entries
    pub evictions: u64,
    /// Total operational errors
    pub errors: u64,
    /// Overall hit rate as a percentage
    pub hit_rate_percent: f64,
    /// Mean of the read-duration window, in milliseconds
    pub avg_read_time_ms: f64,
    /// Mean of the write-duration window, in milliseconds
    pub avg_write_time_ms: f64,
    /// Mean of the cleanup-duration window, in milliseconds
    pub avg_cleanup_time_ms: f64,
    /// Total payload bytes served
    pub total_bytes_read: u64,
    /// Total payload bytes written
    pub total_bytes_written: u64,
    /// Per-stage breakdown
    pub stages: BTreeMap<Stage, StageMetrics>,
    /// When this process started using the cache
    pub session_start: DateTime<Utc>,
    /// When the last cleanup pass completed, if any
    pub last_cleanup: Option<DateTime<Utc>>,
}

/// Live on-disk usage, derived from a store scan
#[derive(Debug, Clone, Serialize)]
pub struct UsageStats {
    /// Sum of all entry bytes
    pub total_size_bytes: u64,
    /// Number of intact entries
    pub entry_count: usize,
    /// `total_size_bytes` over the configured bound, as a percentage
    pub utilization_percent: f64,
    /// Bytes per stage
    pub stage_bytes: BTreeMap<Stage, u64>,
    /// Bytes per scope
    pub scope_bytes: BTreeMap<String, u64>,
    /// Oldest entry access
    pub oldest_access: Option<DateTime<Utc>>,
    /// Newest entry access
    pub newest_access: Option<DateTime<Utc>>,
}

impl UsageStats {
    /// Summarise scanned entries against a size bound
    pub fn from_entries(entries: &[EntrySnapshot], max_cache_size_bytes: u64) -> Self {
        let mut stage_bytes = BTreeMap::new();
        let mut scope_bytes = BTreeMap::new();
        let mut total = 0u64;
        let mut oldest: Option<DateTime<Utc>> = None;
        let mut newest: Option<DateTime<Utc>> = None;

        for entry in entries {
            total += entry.size_bytes;
            *stage_bytes.entry(entry.key.stage()).or_insert(0) += entry.size_bytes;
            *scope_bytes
                .entry(entry.key.scope().to_string())
                .or_insert(0) += entry.size_bytes;

            if let Some(access) = entry.last_access {
                let access: DateTime<Utc> = access.into();
                if oldest.is_none_or(|t| access < t) {
                    oldest = Some(access);
                }
                if newest.is_none_or(|t| access > t) {
                    newest = Some(access);
                }
            }
        }

        Self {
            total_size_bytes: total,
            entry_count: entries.len(),
            utilization_percent: if max_cache_size_bytes == 0 {
                0.0
            } else {
                total as f64 / max_cache_size_bytes as f64 * 100.0
            },
            stage_bytes,
            scope_bytes,
            oldest_access: oldest,
            newest_access: newest,
        }
    }
}
