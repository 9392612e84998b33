//! Configuration descriptors exchanged between the engine and whatever
//! fetches them (a config-sync HTTP client, a TOML file, or a test harness).

use serde::{Deserialize, Serialize};

/// Default concurrency assigned to a pool created on demand (unknown
/// `poolCode` routed to the default pool, or first-seen pool with no
/// explicit config). spec.md §6.
pub const DEFAULT_POOL_CONCURRENCY: u32 = 20;
/// Queue capacity multiplier applied to concurrency. spec.md §6:
/// `queueCapacity = max(20 * concurrency, 50)`.
pub const QUEUE_CAPACITY_MULTIPLIER: u32 = 20;
pub const MIN_QUEUE_CAPACITY: u32 = 50;

/// Compute a pool's queue capacity from its concurrency, per spec.md §6.
pub fn queue_capacity_for(concurrency: u32) -> u32 {
    (concurrency * QUEUE_CAPACITY_MULTIPLIER).max(MIN_QUEUE_CAPACITY)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    pub code: String,
    pub concurrency: u32,
    #[serde(default)]
    pub rate_limit_per_minute: Option<u32>,
}

impl PoolConfig {
    pub fn default_for(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            concurrency: DEFAULT_POOL_CONCURRENCY,
            rate_limit_per_minute: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    pub uri: String,
}

/// The full configuration payload a config source hands to the manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub processing_pools: Vec<PoolConfig>,
    #[serde(default)]
    pub queues: Vec<QueueConfig>,
}

/// Stall-detection configuration: a supplement to the spec's leak detector,
/// grounded on the teacher's `StallConfig` (see SPEC_FULL.md §2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StallConfig {
    pub enabled: bool,
    pub stall_threshold_seconds: u64,
    pub force_nack_stalled: bool,
    pub force_nack_after_seconds: u64,
    pub nack_delay_seconds: u32,
}

impl Default for StallConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stall_threshold_seconds: 300,
            force_nack_stalled: false,
            force_nack_after_seconds: 600,
            nack_delay_seconds: 30,
        }
    }
}
