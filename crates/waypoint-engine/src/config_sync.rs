//! Fetching router configuration from whatever serves it, and driving the
//! manager's reconciliation on a schedule (spec.md §4.2 "Config sync").

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use waypoint_core::RouterConfig;

use crate::manager::QueueManager;
use crate::standby::{LeadershipStatus, StandbyGate};
use crate::warning::SharedWarnings;

/// Injected so the manager never depends on a concrete transport; an HTTP
/// client against a central config service is the expected production
/// implementation, a static/test source fits everything else.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<RouterConfig>;
}

/// A config source that always returns the same snapshot — used by
/// standalone deployments and tests that don't run a config service.
pub struct StaticConfigSource(pub RouterConfig);

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn fetch(&self) -> anyhow::Result<RouterConfig> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigSyncConfig {
    pub initial_attempts: u32,
    pub initial_interval: Duration,
    pub periodic_interval: Duration,
    pub fail_hard_on_initial: bool,
}

impl Default for ConfigSyncConfig {
    fn default() -> Self {
        Self {
            initial_attempts: 12,
            initial_interval: Duration::from_secs(5),
            periodic_interval: Duration::from_secs(5 * 60),
            fail_hard_on_initial: false,
        }
    }
}

/// Attempt the initial sync up to `config.initial_attempts` times, 5s
/// apart. If a standby gate reports this instance isn't primary, the sync
/// is skipped entirely and the manager stays passive. Returns `false` only
/// when every attempt failed (the caller decides whether that's fatal).
pub async fn run_initial_sync(
    manager: &Arc<QueueManager>,
    source: &dyn ConfigSource,
    standby: &dyn StandbyGate,
    config: &ConfigSyncConfig,
    warnings: &SharedWarnings,
) -> bool {
    if standby.status().await == LeadershipStatus::Standby {
        tracing::info!("instance is standby; skipping initial config sync");
        return true;
    }

    for attempt in 1..=config.initial_attempts {
        match source.fetch().await {
            Ok(desired) => {
                manager.sync_config(desired).await;
                return true;
            }
            Err(err) => {
                tracing::warn!(attempt, error = %err, "initial config sync attempt failed");
                if attempt < config.initial_attempts {
                    tokio::time::sleep(config.initial_interval).await;
                }
            }
        }
    }

    warnings.critical(
        waypoint_core::WarningCategory::Configuration,
        format!(
            "initial config sync failed after {} attempts",
            config.initial_attempts
        ),
    );
    false
}

/// Runs forever, reconciling on `config.periodic_interval`. Intended to be
/// spawned as a background task.
pub async fn run_periodic_sync(
    manager: Arc<QueueManager>,
    source: Arc<dyn ConfigSource>,
    standby: Arc<dyn StandbyGate>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; the initial sync already ran.
    loop {
        ticker.tick().await;
        if standby.status().await == LeadershipStatus::Standby {
            continue;
        }
        match source.fetch().await {
            Ok(desired) => manager.sync_config(desired).await,
            Err(err) => tracing::warn!(error = %err, "periodic config sync failed"),
        }
    }
}
