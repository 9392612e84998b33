//! The Queue Consumer contract (spec.md §4.1).
//!
//! This crate defines the boundary the manager drives and the behavior any
//! backing queue driver (SQS, AMQP, embedded SQLite, ...) must honor. Real
//! wire-protocol drivers are out of scope (spec.md §1 "external
//! collaborators") — only [`MemoryQueue`], an in-process double used by the
//! engine's own tests and by standalone/dev deployments, is implemented here.

pub mod error;
pub mod memory;
pub mod pacing;

pub use error::{QueueError, Result};
pub use memory::MemoryQueue;
pub use pacing::{poll_pace, PollOutcome};

use async_trait::async_trait;
use std::time::Instant;
use waypoint_core::QueuedMessage;

/// Queue-level metrics for monitoring (spec.md §6 "Observable surface").
#[derive(Debug, Clone, Default)]
pub struct QueueMetrics {
    pub queue_identifier: String,
    pub pending_messages: u64,
    pub in_flight_messages: u64,
    pub total_polled: u64,
    pub total_acked: u64,
    pub total_nacked: u64,
}

/// The contract a queue consumer must satisfy (spec.md §4.1).
///
/// `ack`/`nack`/`extend_visibility` are addressed by receipt handle rather
/// than by message, per the design note in spec.md §9: the manager is the
/// only thing that knows which receipt handle is *current* for a given
/// pipeline key (it may have been refreshed by a physical redelivery), so
/// callers must always fetch the latest handle from the in-flight tracker
/// before invoking these.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Stable identifier for this consumer (queue name or URI).
    fn identifier(&self) -> &str;

    /// Begin polling. Idempotent.
    async fn start(&self);

    /// Stop polling and let in-flight polls finish.
    async fn stop(&self);

    /// Timestamp of the last successful poll, used by consumer health
    /// monitoring (spec.md §4.2, 60s cadence, 60s staleness threshold).
    fn last_poll_at(&self) -> Instant;

    /// True once the consumer's poll loop has fully exited after `stop()`.
    fn fully_stopped(&self) -> bool;

    /// Poll for up to `max_messages`. Decoding failures are never surfaced
    /// as a batch error — a poison message is ACKed by the driver and
    /// dropped before this returns (spec.md §4.1 "Failure semantics").
    async fn poll(&self, max_messages: u32) -> Result<Vec<QueuedMessage>>;

    /// Destructive, idempotent acknowledgement.
    async fn ack(&self, receipt_handle: &str) -> Result<()>;

    /// Return the message to visibility after the default delay.
    async fn nack(&self, receipt_handle: &str) -> Result<()> {
        self.nack_with_delay(receipt_handle, None).await
    }

    /// Return the message to visibility after `delay_seconds` (or the
    /// driver's default when `None`).
    async fn nack_with_delay(&self, receipt_handle: &str, delay_seconds: Option<u32>)
        -> Result<()>;

    /// Extend the broker-side visibility timeout for a message still being
    /// processed (spec.md §4.2 visibility extender).
    async fn extend_visibility(&self, receipt_handle: &str, seconds: u32) -> Result<()>;

    /// Whether the consumer considers itself healthy (distinct from the
    /// manager's own stall detection, which is based on `last_poll_at`).
    fn is_healthy(&self) -> bool {
        true
    }

    async fn metrics(&self) -> Option<QueueMetrics> {
        None
    }
}

/// Factory for creating consumers from queue configuration, injected into
/// the manager so it can (re)create consumers during config sync without
/// depending on any concrete driver (spec.md §4.2 "Config sync").
#[async_trait]
pub trait ConsumerFactory: Send + Sync {
    async fn create_consumer(
        &self,
        config: &waypoint_core::QueueConfig,
    ) -> Result<std::sync::Arc<dyn QueueConsumer>>;
}
