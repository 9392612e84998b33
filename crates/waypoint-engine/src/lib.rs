//! Routing, pooling and HTTP mediation for the dispatch engine.
//!
//! [`manager::QueueManager`] owns batch routing and in-flight tracking,
//! [`pool::ProcessPool`] owns per-group scheduling and the concurrency/rate
//! gates, [`mediator::HttpMediator`] owns delivery. [`lifecycle`] wires the
//! manager's periodic passes into spawned background tasks.

pub mod api;
pub mod config;
pub mod config_sync;
pub mod error;
pub mod health;
pub mod intake;
pub mod lifecycle;
pub mod manager;
pub mod mediator;
pub mod metrics;
pub mod pool;
pub mod standby;
pub mod warning;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use intake::run_poll_loop;
pub use lifecycle::{Lifecycle, LifecycleConfig};
pub use manager::{QueueManager, DEFAULT_POOL_CODE};
pub use mediator::{FixedMediator, HttpMediator, Mediator};
pub use metrics::PoolMetricsCollector;
pub use pool::ProcessPool;
pub use standby::{AlwaysPrimary, LeadershipStatus, StandbyGate};
pub use warning::{SharedWarnings, WarningService};
