//! Per-pool statistics exposed on the monitoring API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latency distribution over some set of samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingTimeMetrics {
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub sample_count: u64,
}

impl Default for ProcessingTimeMetrics {
    fn default() -> Self {
        Self {
            avg_ms: 0.0,
            min_ms: 0,
            max_ms: 0,
            p50_ms: 0,
            p95_ms: 0,
            p99_ms: 0,
            sample_count: 0,
        }
    }
}

/// Outcome counts and latency distribution over a trailing time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowedCounters {
    pub success_count: u64,
    pub failure_count: u64,
    pub transient_count: u64,
    pub rate_limited_count: u64,
    pub success_rate: f64,
    pub throughput_per_sec: f64,
    pub processing_time: ProcessingTimeMetrics,
    pub window_start: DateTime<Utc>,
    pub window_duration_secs: u64,
}

impl WindowedCounters {
    /// An empty window of the given duration, anchored at `now`.
    pub fn empty(window_duration_secs: u64) -> Self {
        Self {
            success_count: 0,
            failure_count: 0,
            transient_count: 0,
            rate_limited_count: 0,
            success_rate: 1.0,
            throughput_per_sec: 0.0,
            processing_time: ProcessingTimeMetrics::default(),
            window_start: Utc::now(),
            window_duration_secs,
        }
    }
}

impl Default for WindowedCounters {
    fn default() -> Self {
        Self::empty(0)
    }
}

/// All-time and windowed outcome/latency metrics for one pool, as
/// maintained by `waypoint_engine::metrics::PoolMetricsCollector`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolMetricsSnapshot {
    pub total_success: u64,
    pub total_failure: u64,
    pub total_transient: u64,
    pub total_rate_limited: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub processing_time: ProcessingTimeMetrics,
    pub last_5_min: WindowedCounters,
    pub last_30_min: WindowedCounters,
}

impl Default for PoolMetricsSnapshot {
    fn default() -> Self {
        Self {
            total_success: 0,
            total_failure: 0,
            total_transient: 0,
            total_rate_limited: 0,
            success_rate: 1.0,
            avg_latency_ms: 0.0,
            processing_time: ProcessingTimeMetrics::default(),
            last_5_min: WindowedCounters::empty(5 * 60),
            last_30_min: WindowedCounters::empty(30 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub pool_code: String,
    pub concurrency: u32,
    pub active_workers: u32,
    pub available_permits: u32,
    pub queue_size: u32,
    pub queue_capacity: u32,
    pub message_group_count: u32,
    pub rate_limit_per_minute: Option<u32>,
    pub draining: bool,
    pub submitted: u64,
    pub metrics: PoolMetricsSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StalledMessageInfo {
    pub message_id: String,
    pub message_group_id: Option<String>,
    pub pool_code: String,
    pub queue_identifier: String,
    pub elapsed_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InFlightMessageInfo {
    pub message_id: String,
    pub broker_message_id: Option<String>,
    pub queue_id: String,
    pub pool_code: String,
    pub elapsed_seconds: u64,
}
