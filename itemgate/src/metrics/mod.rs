//! Response-time metrics.
//!
//! The manager records one sample per completed inspect, measured from
//! admission to completion. Two views are kept: a 5-minute sliding window
//! (age-pruned on every record and snapshot) and an all-time buffer capped
//! at [`ALL_TIME_CAPACITY`] samples, after which the oldest samples roll
//! off. Percentiles are computed at snapshot time; recording stays O(1).

use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Cap on retained all-time samples.
pub const ALL_TIME_CAPACITY: usize = 100_000;

/// Width of the sliding window.
pub const WINDOW_DURATION: Duration = Duration::from_secs(5 * 60);

/// Percentile summary over one sample set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PercentileSet {
    pub count: u64,
    pub avg_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

/// Snapshot of both views.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ResponseTimeStats {
    pub all_time: PercentileSet,
    pub window_5m: PercentileSet,
}

/// Accumulates response-time samples.
#[derive(Debug)]
pub struct ResponseTimeRecorder {
    window: VecDeque<(Instant, u64)>,
    all_time: VecDeque<u64>,
    total_recorded: u64,
    window_duration: Duration,
}

impl ResponseTimeRecorder {
    pub fn new() -> Self {
        Self::with_window(WINDOW_DURATION)
    }

    pub fn with_window(window_duration: Duration) -> Self {
        Self {
            window: VecDeque::new(),
            all_time: VecDeque::new(),
            total_recorded: 0,
            window_duration,
        }
    }

    /// Records one completed request.
    pub fn record(&mut self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        let now = Instant::now();

        self.window.push_back((now, ms));
        self.prune_window(now);

        if self.all_time.len() >= ALL_TIME_CAPACITY {
            self.all_time.pop_front();
        }
        self.all_time.push_back(ms);
        self.total_recorded += 1;
    }

    /// Total samples ever recorded (not limited by the buffer cap).
    pub fn total_recorded(&self) -> u64 {
        self.total_recorded
    }

    pub fn snapshot(&mut self) -> ResponseTimeStats {
        self.prune_window(Instant::now());
        let window_samples: Vec<u64> = self.window.iter().map(|(_, ms)| *ms).collect();
        let all_samples: Vec<u64> = self.all_time.iter().copied().collect();
        ResponseTimeStats {
            all_time: summarize(all_samples),
            window_5m: summarize(window_samples),
        }
    }

    fn prune_window(&mut self, now: Instant) {
        while let Some((at, _)) = self.window.front() {
            if now.duration_since(*at) > self.window_duration {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for ResponseTimeRecorder {
    fn default() -> Self {
        Self::new()
    }
}

fn summarize(mut samples: Vec<u64>) -> PercentileSet {
    if samples.is_empty() {
        return PercentileSet::default();
    }
    samples.sort_unstable();
    let count = samples.len() as u64;
    let sum: u64 = samples.iter().sum();
    PercentileSet {
        count,
        avg_ms: sum / count,
        p50_ms: nearest_rank(&samples, 50.0),
        p95_ms: nearest_rank(&samples, 95.0),
        p99_ms: nearest_rank(&samples, 99.0),
    }
}

/// Nearest-rank percentile over a sorted slice.
fn nearest_rank(sorted: &[u64], percentile: f64) -> u64 {
    let rank = ((percentile / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
