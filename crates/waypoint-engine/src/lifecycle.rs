//! Spawns the manager's periodic passes as background tasks and holds the
//! handles needed to pause them on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::manager::QueueManager;

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub visibility_extension_interval: Duration,
    pub leak_check_interval: Duration,
    pub consumer_health_interval: Duration,
    pub stall_check_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            visibility_extension_interval: Duration::from_secs(55),
            leak_check_interval: Duration::from_secs(30),
            consumer_health_interval: Duration::from_secs(60),
            stall_check_interval: Duration::from_secs(30),
        }
    }
}

/// Holds the background tasks a [`QueueManager`] needs running alongside it.
/// Dropping (or calling [`Lifecycle::stop`]) aborts them; it does not itself
/// drain pools or stop consumers — that's [`QueueManager::shutdown`].
pub struct Lifecycle {
    handles: Vec<JoinHandle<()>>,
}

impl Lifecycle {
    pub fn start(manager: Arc<QueueManager>, config: LifecycleConfig) -> Self {
        let mut handles = Vec::with_capacity(4);

        let visibility_manager = Arc::clone(&manager);
        let visibility_interval = config.visibility_extension_interval;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(visibility_interval);
            loop {
                ticker.tick().await;
                visibility_manager.run_visibility_extension_pass().await;
            }
        }));

        let leak_manager = Arc::clone(&manager);
        let leak_interval = config.leak_check_interval;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(leak_interval);
            loop {
                ticker.tick().await;
                leak_manager.run_leak_detection_pass();
            }
        }));

        let health_manager = Arc::clone(&manager);
        let health_interval = config.consumer_health_interval;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(health_interval);
            loop {
                ticker.tick().await;
                health_manager.run_consumer_health_pass().await;
            }
        }));

        let stall_manager = Arc::clone(&manager);
        let stall_interval = config.stall_check_interval;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(stall_interval);
            loop {
                ticker.tick().await;
                stall_manager.run_stall_detection_pass().await;
            }
        }));

        Self { handles }
    }

    pub fn stop(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        self.stop();
    }
}
