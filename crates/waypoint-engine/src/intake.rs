//! Drives one consumer's poll loop: poll, route whatever comes back,
//! pace the next poll by how full the last batch was (spec.md §4.1
//! "Polling pacing"). Grounded on the teacher's per-consumer task
//! spawned from `QueueManager::start`, with the fixed 100ms/1s sleeps
//! replaced by `waypoint_queue::poll_pace`'s three-tier backoff.

use std::sync::Arc;

use waypoint_queue::{poll_pace, QueueConsumer};

use crate::manager::QueueManager;

/// Runs until `consumer.fully_stopped()` — i.e. until something else
/// (shutdown, consumer-health restart) calls `consumer.stop()`.
pub async fn run_poll_loop(
    manager: Arc<QueueManager>,
    consumer: Arc<dyn QueueConsumer>,
    batch_size: u32,
) {
    while !consumer.fully_stopped() {
        match consumer.poll(batch_size).await {
            Ok(messages) => {
                let received = messages.len();
                if !messages.is_empty() {
                    manager.route_batch(consumer.clone(), messages).await;
                }
                if let Some(sleep) = poll_pace(received, batch_size).sleep {
                    tokio::time::sleep(sleep).await;
                }
            }
            Err(err) => {
                tracing::error!(error = %err, consumer = %consumer.identifier(), "poll failed");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}
