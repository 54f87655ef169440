//! Allocator metrics — counters, gauges, and run-latency percentiles.
//!
//! The snapshot is produced by an ordinary queued event, so it always
//! observes a consistent state.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use serde::Serialize;

/// Run-latency samples are bounded so the snapshot stays O(1) in memory.
const MAX_LATENCY_SAMPLES: usize = 8192;

/// Latency distribution of allocation runs, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub count: u64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub p999_ms: f64,
    pub p9999_ms: f64,
}

/// Per-role quota gauges.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuotaMetrics {
    /// Guaranteed quantity per resource kind.
    pub guarantee: BTreeMap<String, f64>,
    /// Quantity charged toward the guarantee per resource kind.
    pub offered_or_allocated: BTreeMap<String, f64>,
}

/// A consistent read-only view of the allocator's gauges and counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Completed allocation runs.
    pub allocation_runs: u64,
    pub allocation_run_ms: LatencyStats,
    /// Cluster capacity per resource kind.
    pub total: BTreeMap<String, f64>,
    /// Offered-or-allocated quantity per resource kind.
    pub offered_or_allocated: BTreeMap<String, f64>,
    /// Dominant share per role; a role disappears with its last framework
    /// unless it holds quota or a non-default weight.
    pub dominant_shares: BTreeMap<String, f64>,
    pub quota: BTreeMap<String, QuotaMetrics>,
    /// Active offer filters per role.
    pub active_offer_filters: BTreeMap<String, u64>,
}

/// Internal counter state feeding [`MetricsSnapshot`].
#[derive(Debug, Default)]
pub(crate) struct AllocatorMetrics {
    pub allocation_runs: u64,
    latencies: VecDeque<Duration>,
}

impl AllocatorMetrics {
    pub fn record_run(&mut self, elapsed: Duration) {
        self.allocation_runs += 1;
        if self.latencies.len() == MAX_LATENCY_SAMPLES {
            self.latencies.pop_front();
        }
        self.latencies.push_back(elapsed);
    }

    pub fn latency_stats(&self) -> LatencyStats {
        compute_latency_stats(self.latencies.iter().copied())
    }
}

fn compute_latency_stats(samples: impl Iterator<Item = Duration>) -> LatencyStats {
    let mut sorted: Vec<f64> = samples.map(|d| d.as_secs_f64() * 1000.0).collect();
    if sorted.is_empty() {
        return LatencyStats::default();
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let percentile = |q: f64| {
        let index = ((sorted.len() as f64) * q) as usize;
        sorted[index.min(sorted.len() - 1)]
    };

    LatencyStats {
        count: sorted.len() as u64,
        min_ms: sorted[0],
        max_ms: sorted[sorted.len() - 1],
        p50_ms: percentile(0.50),
        p95_ms: percentile(0.95),
        p99_ms: percentile(0.99),
        p999_ms: percentile(0.999),
        p9999_ms: percentile(0.9999),
    }
}
