//! Fleet-level stats aggregation.
//!
//! Shards stream [`ShardStats`] snapshots; the manager keeps the latest per
//! shard and merges them with its own monotonic counters and response-time
//! percentiles into one serializable snapshot for the `/stats` surface.

use crate::metrics::ResponseTimeStats;
use crate::queue::QueueMetrics;
use crate::shard::{ShardStats, StateCounts};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic fleet counters.
#[derive(Debug, Default)]
pub struct Counters {
    pub success: AtomicU64,
    pub cached: AtomicU64,
    pub failed: AtomicU64,
    pub timeouts: AtomicU64,
    pub retried: AtomicU64,
    pub success_after_retry: AtomicU64,
}

impl Counters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            success: self.success.load(Ordering::Relaxed),
            cached: self.cached.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            success_after_retry: self.success_after_retry.load(Ordering::Relaxed),
        }
    }
}

/// Counter values at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub success: u64,
    pub cached: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub retried: u64,
    pub success_after_retry: u64,
}

/// The full `/stats` payload.
#[derive(Debug, Clone, Serialize)]
pub struct FleetStats {
    pub uptime_secs: u64,
    /// Bot counts aggregated over every shard's latest snapshot.
    pub fleet: StateCounts,
    pub counters: CounterSnapshot,
    pub response_times: ResponseTimeStats,
    pub queue: QueueMetrics,
    pub shards: Vec<ShardStats>,
}

/// Merges per-shard snapshots into fleet-wide counts.
pub fn aggregate_counts(shards: &[ShardStats]) -> StateCounts {
    let mut counts = StateCounts::default();
    for shard in shards {
        counts.merge(&shard.counts);
    }
    counts
}
