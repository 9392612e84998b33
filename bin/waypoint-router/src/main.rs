//! Standalone dispatch engine process: wires together the in-memory
//! queue driver, the HTTP mediator, the manager and its periodic
//! background passes, and the monitoring HTTP API into one binary.
//!
//! A real deployment would swap [`waypoint_queue::MemoryQueue`] for a
//! broker-backed driver (SQS, AMQP, ...) via the same [`ConsumerFactory`]
//! seam, and [`StaticConfigSource`] for one that calls a central config
//! service; both are out of scope here (spec.md §1 treats them as
//! external collaborators) but the seams are exercised end to end.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use waypoint_core::{QueueConfig, RouterConfig};
use waypoint_engine::api::{self, ApiState};
use waypoint_engine::config_sync::{run_initial_sync, run_periodic_sync, ConfigSyncConfig, StaticConfigSource};
use waypoint_engine::mediator::HttpMediator;
use waypoint_engine::{AlwaysPrimary, EngineConfig, Lifecycle, LifecycleConfig, QueueManager, WarningService};
use waypoint_queue::{ConsumerFactory, MemoryQueue, QueueConsumer, Result as QueueResult};

/// Hands out an in-process [`MemoryQueue`] for every queue name the
/// config names. Stands in for a broker-backed factory in this
/// standalone build.
struct MemoryConsumerFactory;

#[async_trait]
impl ConsumerFactory for MemoryConsumerFactory {
    async fn create_consumer(&self, config: &QueueConfig) -> QueueResult<Arc<dyn QueueConsumer>> {
        Ok(Arc::new(MemoryQueue::new(config.name.clone())))
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_thread_ids(false)
                    .with_target(true)
                    .flatten_event(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// A bare default config for a process started with no config file:
/// one default pool, no queues. Real queues arrive via config sync or
/// are added to the config file before startup.
fn default_dev_config() -> RouterConfig {
    RouterConfig {
        processing_pools: vec![waypoint_core::PoolConfig::default_for(
            waypoint_engine::DEFAULT_POOL_CODE,
        )],
        queues: vec![],
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    info!("starting waypoint-router");

    let config_path = std::env::var("WAYPOINT_CONFIG_PATH").unwrap_or_else(|_| "waypoint.toml".to_string());
    let mut config = match EngineConfig::load_from_file(&config_path) {
        Ok(config) => {
            info!(path = %config_path, "loaded configuration file");
            config
        }
        Err(err) => {
            warn!(path = %config_path, error = %err, "no configuration file found; using defaults");
            EngineConfig::default()
        }
    };
    config.apply_env_overrides();

    let warnings = Arc::new(WarningService::new("waypoint-router"));
    let mediator = Arc::new(HttpMediator::with_timeout(
        warnings.clone(),
        config.request_timeout(),
    ));
    let consumer_factory = Arc::new(MemoryConsumerFactory);
    let manager = QueueManager::with_limits(
        mediator,
        warnings.clone(),
        consumer_factory.clone(),
        config.max_pools,
        config.pool_warning_threshold,
    );
    manager.update_stall_config(config.stall.clone());

    let standby = Arc::new(AlwaysPrimary);
    let initial_router_config = if config.router.queues.is_empty() && config.router.processing_pools.is_empty() {
        default_dev_config()
    } else {
        config.router.clone()
    };
    let config_source: Arc<dyn waypoint_engine::config_sync::ConfigSource> =
        Arc::new(StaticConfigSource(initial_router_config));

    let sync_config = ConfigSyncConfig {
        fail_hard_on_initial: config.fail_hard_on_initial_sync,
        ..ConfigSyncConfig::default()
    };
    let synced = run_initial_sync(&manager, &*config_source, &*standby, &sync_config, &warnings).await;
    if !synced && sync_config.fail_hard_on_initial {
        return Err(anyhow::anyhow!("initial config sync failed"));
    }

    let mut poll_handles = Vec::new();
    for queue_config in &manager.config_snapshot().queues {
        let consumer = consumer_factory.create_consumer(queue_config).await?;
        consumer.start().await;
        manager.register_consumer(consumer.clone());
        let manager = manager.clone();
        poll_handles.push(tokio::spawn(async move {
            waypoint_engine::run_poll_loop(manager, consumer, 10).await;
        }));
    }

    tokio::spawn(run_periodic_sync(
        manager.clone(),
        config_source,
        standby,
        sync_config.periodic_interval,
    ));

    let lifecycle = Lifecycle::start(manager.clone(), LifecycleConfig::default());

    let app = api::router(ApiState {
        manager: manager.clone(),
        warnings: warnings.clone(),
    })
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let listener = tokio::net::TcpListener::bind(&config.http.bind).await?;
    info!(bind = %config.http.bind, "HTTP API listening");
    let server_task = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!(error = %err, "HTTP server exited with an error");
        }
    });

    info!("waypoint-router started; press Ctrl+C to shut down");
    shutdown_signal().await;
    info!("shutdown signal received");

    lifecycle.stop();
    manager.shutdown().await;
    server_task.abort();
    for handle in poll_handles {
        handle.abort();
    }

    info!("waypoint-router shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
