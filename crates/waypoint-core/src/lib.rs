//! Domain types shared across the waypoint message dispatch engine.
//!
//! No I/O lives here: queue drivers, HTTP clients, and background tasks are
//! defined in `waypoint-queue` and `waypoint-engine`. This crate is the
//! vocabulary they share.

pub mod config;
pub mod error;
pub mod message;
pub mod metrics;
pub mod outcome;
pub mod warning;

pub use config::{queue_capacity_for, PoolConfig, QueueConfig, RouterConfig, StallConfig};
pub use error::CoreError;
pub use message::{
    AckDecision, Batch, InFlightRecord, MediationType, Message, PoolTask, QueuedMessage,
    DEFAULT_GROUP,
};
pub use metrics::{
    InFlightMessageInfo, PoolMetricsSnapshot, PoolStats, ProcessingTimeMetrics, StalledMessageInfo,
    WindowedCounters,
};
pub use outcome::{effective_delay, Outcome, OutcomeResult, TypedError, DEFAULT_DELAY_SECONDS, FAST_FAIL_DELAY_SECONDS, MAX_DELAY_SECONDS};
pub use warning::{Warning, WarningCategory, WarningSeverity};
