//! Content-addressable multi-stage build cache
//!
//! `stagecache` fronts a game-compilation pipeline with a disk cache that
//! turns a (template, components, configuration, assets) triple into a
//! stable fingerprint, stores staged intermediate results under a
//! structured layout, serves them back safely under concurrency, and
//! bounds its footprint with a multi-signal eviction policy.
//!
//! # Architecture
//!
//! Five cooperating components, leaves first:
//!
//! 1. **Fingerprint engine** ([`fingerprint`]) — a pure function producing
//!    a 256-bit compilation fingerprint from canonicalised inputs,
//!    including template files walked from disk, component definitions,
//!    asset content hashes, and toolchain versions.
//! 2. **Cache key model** ([`key`]) — the validated `(scope, fingerprint,
//!    stage)` triple mapping to `<root>/<scope>/<fingerprint>/<stage>/`.
//! 3. **Atomic store** ([`store`]) — publishes entries via a staged
//!    temporary directory, fsync, and a rename-based swap with rollback.
//! 4. **Concurrency layer** ([`lock`]) — per-key in-process rwlocks plus
//!    advisory file locks, so writers serialise and readers only observe
//!    fully published entries.
//! 5. **Eviction engine** ([`eviction`]) — ranks entries by age, size, and
//!    stage value, then removes them in pressure-scaled batches to drive
//!    utilisation back to a target.
//!
//! [`CacheManager`] owns all of the above and is the host-facing surface;
//! [`metrics`] and [`health`] provide observability.
//!
//! # Example
//!
//! ```no_run
//! use stagecache::{
//!     CacheKey, CacheManager, CompilationRequest, ComponentRegistry, FingerprintEngine, Stage,
//!     TemplateRegistry,
//! };
//! use std::collections::BTreeMap;
//!
//! # fn main() -> Result<(), stagecache::CacheError> {
//! let manager = CacheManager::new("/var/cache/stagecache", 1024 * 1024 * 1024)?;
//!
//! let request = CompilationRequest {
//!     template_id: "platformer".to_string(),
//!     ..CompilationRequest::default()
//! };
//! let fingerprint = FingerprintEngine::new()
//!     .compute(&request, &TemplateRegistry::new(), &ComponentRegistry::new())
//!     .expect("fingerprint");
//!
//! let key = CacheKey::new("compilation", fingerprint.as_str(), Stage::Code)?;
//! manager.put(&key, br#"{"generated":"code"}"#, BTreeMap::new())?;
//! assert!(manager.get(&key)?.is_some());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod canonical;
pub mod error;
pub mod eviction;
pub mod fingerprint;
pub mod health;
pub mod key;
pub mod lock;
pub mod manager;
pub mod metrics;
pub mod payload;
pub mod store;

pub use error::{CacheError, CacheResult, FingerprintError, FingerprintResult};
pub use eviction::{CleanupReport, CleanupTrigger, EngineState, EvictionConfig, EvictionEngine};
pub use fingerprint::{
    AssetRef, CompilationRequest, ComponentDefinition, ComponentRef, ComponentRegistry,
    Fingerprint, FingerprintEngine, TemplateDefinition, TemplateRegistry,
};
pub use health::{HealthReport, HealthStatus};
pub use key::{CacheKey, Stage};
pub use lock::{FileLock, KeyLockTable, LockMode};
pub use manager::{CacheConfig, CacheManager, CacheStatsReport, MaintenanceHandle};
pub use metrics::{CacheMetrics, MetricsSnapshot, StageMetrics, UsageStats};
pub use payload::BuildManifest;
pub use store::{AtomicStore, EntryMetadata, EntrySnapshot};
