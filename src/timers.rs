//! RAII phase timing for decision pipelines.

use std::time::{Duration, Instant};

/// Adds the elapsed time to `slot` when dropped, including on early return.
pub struct PhaseTimer<'a> {
    start: Instant,
    slot: &'a mut Duration,
}

impl<'a> PhaseTimer<'a> {
    pub fn new(slot: &'a mut Duration) -> Self {
        Self {
            start: Instant::now(),
            slot,
        }
    }
}

impl Drop for PhaseTimer<'_> {
    fn drop(&mut self) {
        *self.slot += self.start.elapsed();
    }
}

/// Per-phase accumulators for a single decision call.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct DecisionTimings {
    pub resolve_entities: Duration,
    pub entitlements: Duration,
    pub evaluate: Duration,
    pub obligations: Duration,
}

impl DecisionTimings {
    pub fn into_phases(self, total: Duration) -> crate::metrics::DecisionPhases {
        crate::metrics::DecisionPhases {
            resolve_entities_ms: ms(self.resolve_entities),
            entitlements_ms: ms(self.entitlements),
            evaluate_ms: ms(self.evaluate),
            obligations_ms: ms(self.obligations),
            total_ms: ms(total),
        }
    }
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
