//! Cache health reporting
//!
//! Combines a metrics snapshot, live usage, and the last cleanup report
//! into an overall status with rule-based recommendations.

use crate::eviction::CleanupReport;
use crate::metrics::{MetricsSnapshot, UsageStats};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Overall cache condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Operating normally
    Healthy,
    /// Degraded but functional
    Warning,
    /// Requires intervention
    Critical,
}

/// Stage hit rates are only judged once this many requests were seen
const STAGE_RATE_MIN_REQUESTS: u64 = 50;

/// Snapshot of cache health with recommendations
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// When the report was generated
    pub generated_at: DateTime<Utc>,
    /// Overall condition
    pub status: HealthStatus,
    /// Active warnings
    pub warnings: Vec<String>,
    /// Rule-based recommendations
    pub recommendations: Vec<String>,
    /// Metrics at report time
    pub metrics: MetricsSnapshot,
    /// Live usage at report time
    pub usage: UsageStats,
    /// Most recent cleanup pass, if any
    pub last_cleanup_report: Option<CleanupReport>,
}

impl HealthReport {
    /// Evaluate the health rules over the given snapshots
    pub fn generate(
        metrics: MetricsSnapshot,
        usage: UsageStats,
        last_cleanup_report: Option<CleanupReport>,
    ) -> Self {
        let mut status = HealthStatus::Healthy;
        let mut warnings = Vec::new();
        let mut recommendations = Vec::new();

        let mut warn = |warnings: &mut Vec<String>, status: &mut HealthStatus, message: String| {
            warnings.push(message);
            if *status == HealthStatus::Healthy {
                *status = HealthStatus::Warning;
            }
        };

        let utilization = usage.utilization_percent;
        if utilization > 95.0 {
            status = HealthStatus::Critical;
            warnings.push(format!("cache utilization critical: {utilization:.1}%"));
            recommendations
                .push("immediate cleanup required or increase cache size".to_string());
        } else if utilization > 85.0 {
            warn(
                &mut warnings,
                &mut status,
                format!("cache utilization high: {utilization:.1}%"),
            );
            recommendations.push("consider increasing cleanup frequency".to_string());
        } else if utilization < 30.0 && usage.entry_count > 0 {
            recommendations
                .push("cache is underutilized; consider reducing cache size".to_string());
        }

        let requests = metrics.hits + metrics.misses;
        if requests > 100 {
            if metrics.hit_rate_percent < 60.0 {
                warn(
                    &mut warnings,
                    &mut status,
                    format!("low hit rate: {:.1}%", metrics.hit_rate_percent),
                );
                recommendations.push(
                    "low hit rate suggests cache eviction may be too aggressive".to_string(),
                );
            } else if metrics.hit_rate_percent > 90.0 {
                recommendations
                    .push("excellent hit rate; cache size is well tuned".to_string());
            }
        }

        if metrics.avg_write_time_ms > 500.0 {
            warn(
                &mut warnings,
                &mut status,
                format!("high write latency: {:.0}ms", metrics.avg_write_time_ms),
            );
            recommendations.push("write times are high; investigate fsync cost".to_string());
        }

        for (stage, stats) in &metrics.stages {
            if stats.hits + stats.misses >= STAGE_RATE_MIN_REQUESTS
                && stats.hit_rate_percent() < 40.0
            {
                recommendations.push(format!(
                    "stage {stage} has a low hit rate ({:.1}%); review its caching strategy",
                    stats.hit_rate_percent()
                ));
            }
        }

        let operations = requests + metrics.writes;
        if operations > 0 {
            let error_rate = metrics.errors as f64 / operations as f64 * 100.0;
            if error_rate > 5.0 {
                warn(
                    &mut warnings,
                    &mut status,
                    format!("high error rate: {error_rate:.1}%"),
                );
                recommendations.push("investigate cache storage issues".to_string());
            }
        }

        if let Some(last_cleanup) = metrics.last_cleanup {
            let hours_since = (Utc::now() - last_cleanup).num_minutes() as f64 / 60.0;
            if hours_since > 24.0 {
                warn(
                    &mut warnings,
                    &mut status,
                    format!("no cleanup for {hours_since:.1} hours"),
                );
                recommendations.push("check cleanup scheduling".to_string());
            }
        }

        Self {
            generated_at: Utc::now(),
            status,
            warnings,
            recommendations,
            metrics,
            usage,
            last_cleanup_report,
        }
    }
}
