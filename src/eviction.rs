//! Eviction engine
//!
//! Keeps the cache footprint within bounds while retaining the most
//! valuable entries. A pass is triggered by size pressure, a forced
//! interval, or the presence of aged entries; candidates are ranked by a
//! weighted score of age, size, and stage value, with recently accessed
//! entries shielded; removal happens in pressure-scaled batches, aged
//! entries first.
//!
//! The engine itself owns no filesystem access. The manager scans the
//! store, asks the engine to plan and drive a pass, and performs each
//! removal under the entry's exclusive lock.

use crate::error::{CacheError, CacheResult};
use crate::key::Stage;
use crate::store::EntrySnapshot;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Size baseline for the ranking's size factor
const SIZE_BASELINE_BYTES: f64 = 10.0 * 1024.0 * 1024.0;
/// Penalty applied to recently accessed entries
const RECENT_ACCESS_PENALTY: f64 = -10.0;
/// Debounce between a completed pass and the next idle state
const COOLDOWN_DEBOUNCE: Duration = Duration::from_secs(2);

/// Eviction policy configuration
///
/// All durations are expressed in the units their names carry; defaults
/// match the documented policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvictionConfig {
    /// Hard cap for the utilisation denominator
    pub max_cache_size_bytes: u64,
    /// Utilisation at which proactive cleanup triggers
    pub cleanup_threshold_percent: f64,
    /// Utilisation to reach during a cleanup pass
    pub target_utilization_percent: f64,
    /// Floor on entries removed per pass
    pub min_eviction_batch_size: usize,
    /// Ceiling on entries removed per pass
    pub max_eviction_batch_size: usize,
    /// Entries older than this are aged regardless of size
    pub max_entry_age_hours: u64,
    /// Entries accessed within this window are shielded unless aged
    pub min_access_interval_hours: u64,
    /// Minimum time between opportunistic cleanup checks
    pub cleanup_interval_minutes: u64,
    /// Time after which cleanup runs regardless of thresholds
    pub forced_cleanup_interval_hours: u64,
    /// Concurrent eviction passes; the state machine admits one pass at a
    /// time, so values above 1 behave as 1
    pub max_concurrent_evictions: usize,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            max_cache_size_bytes: 1024 * 1024 * 1024,
            cleanup_threshold_percent: 90.0,
            target_utilization_percent: 75.0,
            min_eviction_batch_size: 5,
            max_eviction_batch_size: 100,
            max_entry_age_hours: 24 * 7,
            min_access_interval_hours: 1,
            cleanup_interval_minutes: 15,
            forced_cleanup_interval_hours: 6,
            max_concurrent_evictions: 1,
        }
    }
}

impl EvictionConfig {
    /// Create a configuration with the documented defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the size bound
    pub fn with_max_cache_size(mut self, bytes: u64) -> Self {
        self.max_cache_size_bytes = bytes;
        self
    }

    /// Set the cleanup trigger threshold
    pub fn with_cleanup_threshold(mut self, percent: f64) -> Self {
        self.cleanup_threshold_percent = percent;
        self
    }

    /// Set the utilisation a pass drives toward
    pub fn with_target_utilization(mut self, percent: f64) -> Self {
        self.target_utilization_percent = percent;
        self
    }

    /// Set the batch bounds
    pub fn with_batch_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_eviction_batch_size = min;
        self.max_eviction_batch_size = max;
        self
    }

    /// Set the maximum entry age in hours
    pub fn with_max_entry_age_hours(mut self, hours: u64) -> Self {
        self.max_entry_age_hours = hours;
        self
    }

    /// Set the recent-access shield window in hours
    pub fn with_min_access_interval_hours(mut self, hours: u64) -> Self {
        self.min_access_interval_hours = hours;
        self
    }

    /// Set the opportunistic check interval in minutes
    pub fn with_cleanup_interval_minutes(mut self, minutes: u64) -> Self {
        self.cleanup_interval_minutes = minutes;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_cache_size_bytes == 0 {
            return Err("max_cache_size_bytes must be greater than 0".to_string());
        }
        if !(0.0..=100.0).contains(&self.cleanup_threshold_percent) {
            return Err("cleanup_threshold_percent must be within 0..=100".to_string());
        }
        if !(0.0..=100.0).contains(&self.target_utilization_percent) {
            return Err("target_utilization_percent must be within 0..=100".to_string());
        }
        if self.target_utilization_percent > self.cleanup_threshold_percent {
            return Err(
                "target_utilization_percent must not exceed cleanup_threshold_percent".to_string(),
            );
        }
        if self.min_eviction_batch_size == 0 {
            return Err("min_eviction_batch_size must be greater than 0".to_string());
        }
        if self.max_eviction_batch_size < self.min_eviction_batch_size {
            return Err(
                "max_eviction_batch_size must be at least min_eviction_batch_size".to_string(),
            );
        }
        if self.max_entry_age_hours == 0 {
            return Err("max_entry_age_hours must be greater than 0".to_string());
        }
        if self.max_concurrent_evictions == 0 {
            return Err("max_concurrent_evictions must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Maximum entry age as a duration
    pub fn max_entry_age(&self) -> Duration {
        Duration::from_secs(self.max_entry_age_hours * 3600)
    }

    /// Recent-access shield window as a duration
    pub fn min_access_interval(&self) -> Duration {
        Duration::from_secs(self.min_access_interval_hours * 3600)
    }

    /// Opportunistic check interval as a duration
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_minutes * 60)
    }

    /// Forced cleanup interval as a duration
    pub fn forced_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.forced_cleanup_interval_hours * 3600)
    }
}

/// Relative cost of regenerating a stage's output; higher keeps longer
pub fn stage_value(stage: Stage) -> f64 {
    match stage {
        Stage::Web => 1.0,
        Stage::Desktop => 1.1,
        Stage::Assets => 1.3,
        Stage::Code => 1.5,
        Stage::Inputs => 2.0,
    }
}

/// What caused a cleanup pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupTrigger {
    /// Utilisation reached the cleanup threshold
    SizeThreshold,
    /// The forced interval elapsed
    ForcedInterval,
    /// Aged entries were present
    AgedEntries,
    /// Explicit `force_cleanup` call
    Manual,
}

/// Record of one completed cleanup pass
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    /// When the pass completed
    pub timestamp: DateTime<Utc>,
    /// What started the pass
    pub trigger: CleanupTrigger,
    /// Pass duration in seconds
    pub duration_seconds: f64,
    /// Utilisation when the pass started
    pub utilization_before_percent: f64,
    /// Utilisation when the pass finished
    pub utilization_after_percent: f64,
    /// Entries removed
    pub entries_removed: usize,
    /// Bytes removed
    pub bytes_removed: u64,
    /// Removed entry counts per stage
    pub removed_by_stage: BTreeMap<Stage, usize>,
    /// Removed bytes per stage
    pub bytes_removed_by_stage: BTreeMap<Stage, u64>,
}

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No pass running or pending
    Idle,
    /// A pass is in progress
    Running,
    /// A pass just finished; debouncing before the next
    Cooldown,
}

#[derive(Debug)]
struct EngineInner {
    state: EngineState,
    pending: bool,
    cooldown_until: Option<Instant>,
    started_at: Instant,
    last_cleanup: Option<Instant>,
    last_check: Option<Instant>,
    last_report: Option<CleanupReport>,
}

/// A ranked eviction candidate
#[derive(Debug, Clone)]
struct Candidate {
    entry: EntrySnapshot,
    is_aged: bool,
    is_recent: bool,
    priority: f64,
}

/// Background eviction policy with an explicit state machine
#[derive(Debug)]
pub struct EvictionEngine {
    config: EvictionConfig,
    inner: Mutex<EngineInner>,
}

impl EvictionEngine {
    /// Create an engine with a validated configuration
    pub fn new(config: EvictionConfig) -> CacheResult<Self> {
        config
            .validate()
            .map_err(CacheError::InvalidConfiguration)?;
        Ok(Self {
            config,
            inner: Mutex::new(EngineInner {
                state: EngineState::Idle,
                pending: false,
                cooldown_until: None,
                started_at: Instant::now(),
                last_cleanup: None,
                last_check: None,
                last_report: None,
            }),
        })
    }

    /// Engine configuration
    pub fn config(&self) -> &EvictionConfig {
        &self.config
    }

    /// Current state, after expiring any elapsed cooldown
    pub fn state(&self) -> EngineState {
        let mut inner = self.inner.lock();
        Self::poll_state(&mut inner);
        inner.state
    }

    /// Report from the most recent completed pass
    pub fn last_report(&self) -> Option<CleanupReport> {
        self.inner.lock().last_report.clone()
    }

    fn poll_state(inner: &mut EngineInner) {
        if inner.state == EngineState::Cooldown {
            let expired = inner
                .cooldown_until
                .is_none_or(|until| Instant::now() >= until);
            // A trigger observed during the pass short-circuits the debounce
            if expired || inner.pending {
                inner.state = EngineState::Idle;
                inner.cooldown_until = None;
            }
        }
    }

    /// Decide whether any trigger fires right now
    ///
    /// `utilization` is the current percentage, `has_aged` whether any
    /// entry exceeds the maximum age. The opportunistic check interval is
    /// enforced for the aged-entries signal only, matching the policy of
    /// checking for aged entries at most once per interval.
    pub fn evaluate_triggers(&self, utilization: f64, has_aged: bool) -> Option<CleanupTrigger> {
        if utilization >= self.config.cleanup_threshold_percent {
            return Some(CleanupTrigger::SizeThreshold);
        }

        let mut inner = self.inner.lock();
        let since_cleanup = inner
            .last_cleanup
            .unwrap_or(inner.started_at)
            .elapsed();
        if since_cleanup >= self.config.forced_cleanup_interval() {
            return Some(CleanupTrigger::ForcedInterval);
        }

        let check_due = inner
            .last_check
            .is_none_or(|at| at.elapsed() >= self.config.cleanup_interval());
        if check_due {
            inner.last_check = Some(Instant::now());
            if has_aged {
                return Some(CleanupTrigger::AgedEntries);
            }
        }

        None
    }

    /// Try to move `Idle → Running`; concurrent triggers coalesce
    ///
    /// Returns `false` and records a pending trigger when a pass is
    /// already running or cooling down.
    pub fn try_begin(&self) -> bool {
        let mut inner = self.inner.lock();
        Self::poll_state(&mut inner);
        match inner.state {
            EngineState::Idle => {
                inner.state = EngineState::Running;
                inner.pending = false;
                true
            }
            EngineState::Running | EngineState::Cooldown => {
                inner.pending = true;
                false
            }
        }
    }

    /// Move `Running → Cooldown`, recording the pass report
    ///
    /// Returns whether a trigger arrived during the pass and should be
    /// re-evaluated immediately.
    pub fn finish(&self, report: CleanupReport) -> bool {
        let mut inner = self.inner.lock();
        debug_assert_eq!(inner.state, EngineState::Running);
        inner.state = EngineState::Cooldown;
        inner.cooldown_until = Some(Instant::now() + COOLDOWN_DEBOUNCE);
        inner.last_cleanup = Some(Instant::now());
        inner.last_report = Some(report);
        // The flag stays set so poll_state skips the debounce; try_begin
        // clears it when the follow-up pass starts.
        inner.pending
    }

    /// Whether any entry in the scan exceeds the maximum age
    pub fn has_aged_entries(&self, entries: &[EntrySnapshot]) -> bool {
        entries
            .iter()
            .any(|e| e.age() >= self.config.max_entry_age())
    }

    /// Batch size for the current pressure level
    fn batch_size(&self, utilization: f64, candidate_count: usize) -> usize {
        let config = &self.config;
        if utilization > 95.0 {
            config.max_eviction_batch_size
        } else if utilization >= 90.0 {
            (candidate_count / 3)
                .max(config.min_eviction_batch_size)
                .min(config.max_eviction_batch_size)
        } else {
            config.min_eviction_batch_size
        }
    }

    fn score(&self, entry: &EntrySnapshot, is_recent: bool) -> f64 {
        let age_hours = entry.age().as_secs_f64() / 3600.0;
        let age_factor = age_hours / self.config.max_entry_age_hours.max(1) as f64;
        let size_factor = entry.size_bytes as f64 / SIZE_BASELINE_BYTES;
        let importance_factor = 1.0 / stage_value(entry.key.stage());
        let recency_penalty = if is_recent { RECENT_ACCESS_PENALTY } else { 0.0 };

        age_factor * 2.0 + size_factor + importance_factor + recency_penalty
    }

    fn rank(&self, entries: Vec<EntrySnapshot>) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = entries
            .into_iter()
            .map(|entry| {
                let age = entry.age();
                let is_aged = age >= self.config.max_entry_age();
                let is_recent = age < self.config.min_access_interval();
                let priority = self.score(&entry, is_recent);
                Candidate {
                    entry,
                    is_aged,
                    is_recent,
                    priority,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entry.last_access.cmp(&b.entry.last_access))
                .then_with(|| a.entry.key.cmp(&b.entry.key))
        });
        candidates
    }

    /// Abandon a pass without a report, returning to `Idle`
    ///
    /// Used when the store scan backing a pass fails before any removal.
    pub fn abort(&self) {
        let mut inner = self.inner.lock();
        debug_assert_eq!(inner.state, EngineState::Running);
        inner.state = EngineState::Idle;
    }

    /// Run one eviction pass over a scan of the store
    ///
    /// `remove` performs the actual locked removal and reports success;
    /// failed removals are skipped without aborting the pass. Callers must
    /// have taken the `Running` state via [`EvictionEngine::try_begin`].
    pub fn execute<F>(
        &self,
        entries: Vec<EntrySnapshot>,
        utilization_before: f64,
        trigger: CleanupTrigger,
        remove: F,
    ) -> CleanupReport
    where
        F: FnMut(&EntrySnapshot) -> bool,
    {
        self.execute_with_target(entries, utilization_before, None, trigger, remove)
    }

    /// Run one eviction pass toward an explicit utilisation target
    ///
    /// `target_percent` overrides the configured target for this pass only;
    /// `force_cleanup` uses this to honour its optional argument.
    pub fn execute_with_target<F>(
        &self,
        entries: Vec<EntrySnapshot>,
        utilization_before: f64,
        target_percent: Option<f64>,
        trigger: CleanupTrigger,
        mut remove: F,
    ) -> CleanupReport
    where
        F: FnMut(&EntrySnapshot) -> bool,
    {
        let start = Instant::now();
        let max_bytes = self.config.max_cache_size_bytes;
        let target_percent = target_percent.unwrap_or(self.config.target_utilization_percent);
        let target_bytes = (max_bytes as f64 * target_percent / 100.0) as u64;

        let mut current_bytes: u64 = entries.iter().map(|e| e.size_bytes).sum();
        let candidates = self.rank(entries);
        let batch = self.batch_size(utilization_before, candidates.len());

        let mut removed = 0usize;
        let mut bytes_removed = 0u64;
        let mut removed_by_stage: BTreeMap<Stage, usize> = BTreeMap::new();
        let mut bytes_by_stage: BTreeMap<Stage, u64> = BTreeMap::new();

        // Phase one: aged entries go first, up to half the batch
        for candidate in candidates.iter().filter(|c| c.is_aged) {
            if removed >= batch / 2 {
                break;
            }
            if !remove(&candidate.entry) {
                debug!("skipping entry that could not be removed: {}", candidate.entry.key);
                continue;
            }
            let stage = candidate.entry.key.stage();
            removed += 1;
            bytes_removed += candidate.entry.size_bytes;
            current_bytes = current_bytes.saturating_sub(candidate.entry.size_bytes);
            *removed_by_stage.entry(stage).or_insert(0) += 1;
            *bytes_by_stage.entry(stage).or_insert(0) += candidate.entry.size_bytes;
        }

        // Phase two: ranked non-recent entries until the target or the batch
        for candidate in candidates.iter().filter(|c| !c.is_aged && !c.is_recent) {
            if removed >= batch || current_bytes <= target_bytes {
                break;
            }
            if !remove(&candidate.entry) {
                debug!("skipping entry that could not be removed: {}", candidate.entry.key);
                continue;
            }
            let stage = candidate.entry.key.stage();
            removed += 1;
            bytes_removed += candidate.entry.size_bytes;
            current_bytes = current_bytes.saturating_sub(candidate.entry.size_bytes);
            *removed_by_stage.entry(stage).or_insert(0) += 1;
            *bytes_by_stage.entry(stage).or_insert(0) += candidate.entry.size_bytes;
        }

        let utilization_after = if max_bytes == 0 {
            0.0
        } else {
            current_bytes as f64 / max_bytes as f64 * 100.0
        };

        let report = CleanupReport {
            timestamp: Utc::now(),
            trigger,
            duration_seconds: start.elapsed().as_secs_f64(),
            utilization_before_percent: utilization_before,
            utilization_after_percent: utilization_after,
            entries_removed: removed,
            bytes_removed,
            removed_by_stage,
            bytes_removed_by_stage: bytes_by_stage,
        };

        info!(
            "cleanup pass removed {removed} entries ({bytes_removed} bytes): \
             {utilization_before:.1}% -> {utilization_after:.1}%"
        );

        report
    }
}
