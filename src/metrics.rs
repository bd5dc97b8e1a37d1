//! Vendor-agnostic metrics collection via a pluggable sink.
//!
//! The decision façade and the entitlement-policy cache report to a global
//! [`MetricsSink`]. Without an installed sink a no-op sink is used, so
//! reporting costs nothing when metrics are not wanted.
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use tdf_authz_core::metrics::{DecisionStats, MetricsSink, RefreshStats};
//!
//! struct Counter {
//!     decisions: AtomicU64,
//! }
//!
//! impl MetricsSink for Counter {
//!     fn on_decision(&self, _stats: &DecisionStats) {
//!         self.decisions.fetch_add(1, Ordering::Relaxed);
//!     }
//!
//!     fn on_refresh(&self, _stats: &RefreshStats) {}
//! }
//!
//! tdf_authz_core::metrics::set_sink(Arc::new(Counter { decisions: AtomicU64::new(0) }));
//! ```

use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};
use tracing::warn;

/// One decision call, passed to [`MetricsSink::on_decision`].
#[derive(Debug, Clone, Serialize)]
pub struct DecisionStats {
    /// Wall-clock time for the whole call, including entity resolution.
    pub duration: Duration,
    /// `true` only if every resource in the call was permitted.
    pub permitted: bool,
    /// Number of resources evaluated.
    pub resources: usize,
    /// Requested action name.
    pub action: String,
}

/// Decision time broken down by phase, in milliseconds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DecisionPhases {
    pub resolve_entities_ms: f64,
    pub entitlements_ms: f64,
    pub evaluate_ms: f64,
    pub obligations_ms: f64,
    pub total_ms: f64,
}

impl DecisionPhases {
    /// Time not accounted for by any measured phase.
    pub fn overhead_ms(&self) -> f64 {
        self.total_ms
            - (self.resolve_entities_ms + self.entitlements_ms + self.evaluate_ms + self.obligations_ms)
    }
}

/// One pass of the entitlement-policy cache.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshStats {
    pub refreshed_at: SystemTime,
    pub attributes: usize,
    pub subject_mappings: usize,
    pub registered_resources: usize,
    pub obligations: usize,
    /// `false` when the pass failed and the previous snapshot was kept.
    pub succeeded: bool,
}

/// Consumer of decision and refresh metrics.
///
/// Called synchronously in the request path, so implementations must be
/// thread-safe and must not block.
pub trait MetricsSink: Send + Sync {
    fn on_decision(&self, stats: &DecisionStats);

    fn on_refresh(&self, stats: &RefreshStats);

    /// Optional per-phase breakdown of a decision.
    fn on_decision_phases(&self, _stats: &DecisionStats, _phases: &DecisionPhases) {}
}

struct NoOpSink;

impl MetricsSink for NoOpSink {
    fn on_decision(&self, _stats: &DecisionStats) {}
    fn on_refresh(&self, _stats: &RefreshStats) {}
}

static SINK: OnceLock<Arc<dyn MetricsSink>> = OnceLock::new();

fn sink() -> Arc<dyn MetricsSink> {
    SINK.get_or_init(|| Arc::new(NoOpSink)).clone()
}

/// Install the global metrics sink. Only the first call takes effect; call it
/// at startup before serving requests.
pub fn set_sink(sink: Arc<dyn MetricsSink>) {
    if SINK.set(sink).is_err() {
        warn!(
            event = "Metrics",
            "Metrics sink was already initialized. Ignoring subsequent set_sink call."
        );
    }
}

pub(crate) fn record_decision(permitted: bool, duration: Duration, resources: usize, action: &str) {
    sink().on_decision(&DecisionStats {
        duration,
        permitted,
        resources,
        action: action.to_string(),
    });
}

pub(crate) fn record_decision_phases(
    permitted: bool,
    resources: usize,
    action: &str,
    phases: DecisionPhases,
) {
    let stats = DecisionStats {
        duration: Duration::from_secs_f64(phases.total_ms.max(0.0) / 1000.0),
        permitted,
        resources,
        action: action.to_string(),
    };
    sink().on_decision_phases(&stats, &phases);
}

pub(crate) fn record_refresh(stats: RefreshStats) {
    sink().on_refresh(&stats);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_stats_serialization() {
        let stats = DecisionStats {
            duration: Duration::from_millis(42),
            permitted: true,
            resources: 3,
            action: "read".to_string(),
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["permitted"], true);
        assert_eq!(json["resources"], 3);
        assert_eq!(json["action"], "read");
    }

    #[test]
    fn test_phases_overhead() {
        let phases = DecisionPhases {
            resolve_entities_ms: 1.0,
            entitlements_ms: 2.0,
            evaluate_ms: 3.0,
            obligations_ms: 0.5,
            total_ms: 7.0,
        };
        assert!((phases.overhead_ms() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_record_with_no_op_sink() {
        record_decision(true, Duration::from_millis(1), 1, "read");
        record_decision_phases(false, 2, "read", DecisionPhases::default());
        record_refresh(RefreshStats {
            refreshed_at: SystemTime::now(),
            attributes: 0,
            subject_mappings: 0,
            registered_resources: 0,
            obligations: 0,
            succeeded: false,
        });
    }
}
