//! Aggregated liveness/readiness reporting for the monitoring API.

use serde::Serialize;

use crate::manager::QueueManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub in_flight_count: u32,
    pub pool_count: usize,
    pub stalled_message_count: usize,
}

/// A message is considered stalled for health-reporting purposes past this
/// many seconds in flight — matches the default stall-detection threshold.
const STALL_THRESHOLD_SECONDS: u64 = 300;

pub fn build_health_report(manager: &QueueManager) -> HealthReport {
    let stalled = manager.stalled_messages(STALL_THRESHOLD_SECONDS);
    let pool_count = manager.pool_snapshot().len();
    let status = if !stalled.is_empty() {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };
    HealthReport {
        status,
        in_flight_count: manager.in_flight_count(),
        pool_count,
        stalled_message_count: stalled.len(),
    }
}
