//! Sliding-window outcome and latency metrics for a pool (spec.md §6
//! "Observable surface"). Grounded on the teacher's
//! `PoolMetricsCollector` (`fc-router/src/metrics.rs`): an all-time
//! atomic counter set plus a bounded sample window used to compute
//! 5-minute/30-minute windowed counts and latency percentiles.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::RwLock;
use waypoint_core::{PoolMetricsSnapshot, ProcessingTimeMetrics, WindowedCounters};

const SHORT_WINDOW: Duration = Duration::from_secs(5 * 60);
const LONG_WINDOW: Duration = Duration::from_secs(30 * 60);
const MAX_SAMPLES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleOutcome {
    Success,
    Failure,
    Transient,
}

struct MetricSample {
    timestamp: Instant,
    duration_ms: u64,
    outcome: SampleOutcome,
}

/// Per-pool metrics collector: all-time counters plus a bounded sliding
/// window of per-message durations used for percentiles and windowed
/// rates. Thread-safe for concurrent recording from every group worker.
pub struct PoolMetricsCollector {
    submitted: AtomicU64,
    total_success: AtomicU64,
    total_failure: AtomicU64,
    total_transient: AtomicU64,
    total_rate_limited: AtomicU64,
    samples: RwLock<VecDeque<MetricSample>>,
    rate_limited_events: RwLock<VecDeque<Instant>>,
}

impl Default for PoolMetricsCollector {
    fn default() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            total_success: AtomicU64::new(0),
            total_failure: AtomicU64::new(0),
            total_transient: AtomicU64::new(0),
            total_rate_limited: AtomicU64::new(0),
            samples: RwLock::new(VecDeque::new()),
            rate_limited_events: RwLock::new(VecDeque::new()),
        }
    }
}

impl PoolMetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Message delivered successfully; `duration_ms` is the time spent in
    /// `Mediator::mediate`.
    pub fn record_success(&self, duration_ms: u64) {
        self.total_success.fetch_add(1, Ordering::Relaxed);
        self.add_sample(duration_ms, SampleOutcome::Success);
    }

    /// Message rejected permanently (config error, acked anyway).
    pub fn record_failure(&self, duration_ms: u64) {
        self.total_failure.fetch_add(1, Ordering::Relaxed);
        self.add_sample(duration_ms, SampleOutcome::Failure);
    }

    /// Message rejected transiently (process/connection error, nacked for
    /// retry).
    pub fn record_transient(&self, duration_ms: u64) {
        self.total_transient.fetch_add(1, Ordering::Relaxed);
        self.add_sample(duration_ms, SampleOutcome::Transient);
    }

    pub fn record_rate_limited(&self) {
        self.total_rate_limited.fetch_add(1, Ordering::Relaxed);
        let mut events = self.rate_limited_events.write();
        let now = Instant::now();
        let cutoff = now.checked_sub(LONG_WINDOW).unwrap_or(now);
        while events.front().map(|t| *t < cutoff).unwrap_or(false) {
            events.pop_front();
        }
        events.push_back(now);
    }

    fn add_sample(&self, duration_ms: u64, outcome: SampleOutcome) {
        let mut samples = self.samples.write();
        let now = Instant::now();
        let cutoff = now.checked_sub(LONG_WINDOW).unwrap_or(now);
        while samples.front().map(|s| s.timestamp < cutoff).unwrap_or(false) {
            samples.pop_front();
        }
        samples.push_back(MetricSample {
            timestamp: now,
            duration_ms,
            outcome,
        });
        while samples.len() > MAX_SAMPLES {
            samples.pop_front();
        }
    }

    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        let samples = self.samples.read();
        let rate_limited_events = self.rate_limited_events.read();
        let now = Instant::now();

        let total_success = self.total_success.load(Ordering::Relaxed);
        let total_failure = self.total_failure.load(Ordering::Relaxed);
        let total_transient = self.total_transient.load(Ordering::Relaxed);
        let total_rate_limited = self.total_rate_limited.load(Ordering::Relaxed);
        let total = total_success + total_failure + total_transient;
        let success_rate = if total > 0 {
            total_success as f64 / total as f64
        } else {
            1.0
        };

        let all_durations: Vec<u64> = samples.iter().map(|s| s.duration_ms).collect();
        let processing_time = Self::processing_time_metrics(&all_durations);

        let short_cutoff = now.checked_sub(SHORT_WINDOW).unwrap_or(now);
        let long_cutoff = now.checked_sub(LONG_WINDOW).unwrap_or(now);

        let last_5_min = Self::windowed(&samples, &rate_limited_events, short_cutoff, SHORT_WINDOW);
        let last_30_min = Self::windowed(&samples, &rate_limited_events, long_cutoff, LONG_WINDOW);

        PoolMetricsSnapshot {
            total_success,
            total_failure,
            total_transient,
            total_rate_limited,
            success_rate,
            avg_latency_ms: processing_time.avg_ms,
            processing_time,
            last_5_min,
            last_30_min,
        }
    }

    fn windowed(
        samples: &VecDeque<MetricSample>,
        rate_limited_events: &VecDeque<Instant>,
        cutoff: Instant,
        window_duration: Duration,
    ) -> WindowedCounters {
        let windowed: Vec<&MetricSample> = samples.iter().filter(|s| s.timestamp >= cutoff).collect();
        let success_count = windowed
            .iter()
            .filter(|s| s.outcome == SampleOutcome::Success)
            .count() as u64;
        let failure_count = windowed
            .iter()
            .filter(|s| s.outcome == SampleOutcome::Failure)
            .count() as u64;
        let transient_count = windowed
            .iter()
            .filter(|s| s.outcome == SampleOutcome::Transient)
            .count() as u64;
        let rate_limited_count = rate_limited_events.iter().filter(|t| **t >= cutoff).count() as u64;

        let total = success_count + failure_count + transient_count;
        let success_rate = if total > 0 {
            success_count as f64 / total as f64
        } else {
            1.0
        };
        let window_secs = window_duration.as_secs_f64();
        let throughput_per_sec = if window_secs > 0.0 {
            total as f64 / window_secs
        } else {
            0.0
        };

        let durations: Vec<u64> = windowed.iter().map(|s| s.duration_ms).collect();
        let processing_time = Self::processing_time_metrics(&durations);

        WindowedCounters {
            success_count,
            failure_count,
            transient_count,
            rate_limited_count,
            success_rate,
            throughput_per_sec,
            processing_time,
            window_start: Utc::now() - chrono::Duration::seconds(window_duration.as_secs() as i64),
            window_duration_secs: window_duration.as_secs(),
        }
    }

    fn processing_time_metrics(durations: &[u64]) -> ProcessingTimeMetrics {
        if durations.is_empty() {
            return ProcessingTimeMetrics::default();
        }
        let mut sorted = durations.to_vec();
        sorted.sort_unstable();
        let sum: u64 = sorted.iter().sum();
        let count = sorted.len() as u64;
        ProcessingTimeMetrics {
            avg_ms: sum as f64 / count as f64,
            min_ms: sorted[0],
            max_ms: sorted[sorted.len() - 1],
            p50_ms: Self::percentile(&sorted, 50.0),
            p95_ms: Self::percentile(&sorted, 95.0),
            p99_ms: Self::percentile(&sorted, 99.0),
            sample_count: count,
        }
    }

    fn percentile(sorted: &[u64], p: f64) -> u64 {
        if sorted.is_empty() {
            return 0;
        }
        if sorted.len() == 1 {
            return sorted[0];
        }
        let idx = (p / 100.0 * (sorted.len() - 1) as f64).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_collector_reports_full_success_rate() {
        let collector = PoolMetricsCollector::new();
        let snapshot = collector.snapshot();
        assert_eq!(snapshot.total_success, 0);
        assert_eq!(snapshot.success_rate, 1.0);
        assert_eq!(snapshot.processing_time.sample_count, 0);
    }

    #[test]
    fn records_success_latency_and_percentiles() {
        let collector = PoolMetricsCollector::new();
        collector.record_success(100);
        collector.record_success(200);
        collector.record_success(300);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.total_success, 3);
        assert_eq!(snapshot.processing_time.sample_count, 3);
        assert!((snapshot.avg_latency_ms - 200.0).abs() < 0.01);
        assert_eq!(snapshot.processing_time.min_ms, 100);
        assert_eq!(snapshot.processing_time.max_ms, 300);
    }

    #[test]
    fn mixed_outcomes_affect_success_rate() {
        let collector = PoolMetricsCollector::new();
        collector.record_success(50);
        collector.record_transient(75);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.total_success, 1);
        assert_eq!(snapshot.total_transient, 1);
        assert_eq!(snapshot.success_rate, 0.5);
    }

    #[test]
    fn windowed_counts_include_recent_samples() {
        let collector = PoolMetricsCollector::new();
        for _ in 0..5 {
            collector.record_success(10);
        }
        collector.record_rate_limited();

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.last_5_min.success_count, 5);
        assert_eq!(snapshot.last_5_min.rate_limited_count, 1);
        assert!(snapshot.last_5_min.throughput_per_sec > 0.0);
    }

    #[test]
    fn percentile_matches_nearest_rank() {
        let sorted: Vec<u64> = (1..=10).collect();
        assert_eq!(PoolMetricsCollector::percentile(&sorted, 50.0), 6);
        assert_eq!(PoolMetricsCollector::percentile(&sorted, 95.0), 10);
        assert_eq!(PoolMetricsCollector::percentile(&sorted, 0.0), 1);
    }
}
