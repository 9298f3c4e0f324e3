//! Cost accounting for LLM usage.
//!
//! Tracks the cumulative USD spent across all calls of one orchestrator
//! instance. The running total is a single atomic so concurrent calls never
//! lose an increment and the total is monotonically non-decreasing.

use relay_core::BindingKey;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Cumulative cost counter.
///
/// The total is stored as `f64` bits in an atomic and updated with a
/// compare-and-swap loop; additions are non-negative so the total never
/// decreases.
#[derive(Debug, Default)]
pub struct CostTracker {
    total_bits: AtomicU64,
    calls: AtomicU64,
}

impl CostTracker {
    /// Create a tracker at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the cost of one completed call.
    ///
    /// Negative values are ignored.
    pub fn record(&self, binding: &BindingKey, cost_usd: f64) {
        if !cost_usd.is_finite() || cost_usd < 0.0 {
            return;
        }
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut current = self.total_bits.load(Ordering::Acquire);
        loop {
            let next = (f64::from_bits(current) + cost_usd).to_bits();
            match self.total_bits.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        debug!(binding = %binding, cost_usd, "call cost recorded");
    }

    /// Cumulative USD spent.
    #[must_use]
    pub fn total_usd(&self) -> f64 {
        f64::from_bits(self.total_bits.load(Ordering::Acquire))
    }

    /// Snapshot for reporting.
    #[must_use]
    pub fn report(&self) -> CostReport {
        CostReport {
            total_usd: self.total_usd(),
            calls: self.calls.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time cost summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostReport {
    /// Cumulative USD spent.
    pub total_usd: f64,
    /// Calls that contributed to the total.
    pub calls: u64,
}
