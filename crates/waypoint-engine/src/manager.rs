//! Batch routing, in-flight tracking, visibility extension, leak detection,
//! consumer health monitoring and config sync.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;
use tokio::sync::oneshot;
use uuid::Uuid;
use waypoint_core::{
    AckDecision, InFlightMessageInfo, InFlightRecord, PoolConfig, PoolTask, QueuedMessage,
    RouterConfig, StallConfig, StalledMessageInfo, WarningCategory, WarningSeverity,
};
use waypoint_queue::{ConsumerFactory, QueueConsumer};

use crate::mediator::Mediator;
use crate::pool::ProcessPool;
use crate::warning::SharedWarnings;

pub const DEFAULT_POOL_CODE: &str = "default";
const VISIBILITY_EXTEND_THRESHOLD_SECONDS: u64 = 50;
const VISIBILITY_EXTEND_SECONDS: u32 = 120;
const CONSUMER_STALL_THRESHOLD_SECONDS: u64 = 60;
const MAX_CONSUMER_RESTART_ATTEMPTS: u32 = 3;
/// Default ceiling on concurrently live pools, guarding against an
/// attacker/operator-controlled `poolCode` growing the pool map without
/// bound. spec.md doesn't name a number; grounded on the teacher's
/// `QueueManager::with_limits` default.
const DEFAULT_MAX_POOLS: usize = 100;
const DEFAULT_POOL_WARNING_THRESHOLD: usize = 80;

enum RoutingAction {
    Route(QueuedMessage),
    ImmediateAck(QueuedMessage),
    ImmediateNack(QueuedMessage, Option<u32>),
}

fn pipeline_key(qm: &QueuedMessage) -> String {
    qm.broker_message_id
        .clone()
        .unwrap_or_else(|| qm.message.id.clone())
}

/// The manager's three collaborators: the pool map, the in-flight tracker,
/// and the registry of consumers it drives and can restart.
pub struct QueueManager {
    mediator: Arc<dyn Mediator>,
    warnings: SharedWarnings,
    consumer_factory: Arc<dyn ConsumerFactory>,

    pools: DashMap<String, Arc<ProcessPool>>,
    draining_pools: DashMap<String, Arc<ProcessPool>>,

    in_flight: DashMap<String, InFlightRecord>,
    id_index: DashMap<String, String>,

    consumers: DashMap<String, Arc<dyn QueueConsumer>>,
    consumer_restart_attempts: DashMap<String, u32>,
    consumer_gave_up: DashMap<String, ()>,

    config: RwLock<RouterConfig>,
    tracked_count: AtomicU32,

    max_pools: usize,
    pool_warning_threshold: usize,
    stall_config: RwLock<StallConfig>,
}

impl QueueManager {
    pub fn new(
        mediator: Arc<dyn Mediator>,
        warnings: SharedWarnings,
        consumer_factory: Arc<dyn ConsumerFactory>,
    ) -> Arc<Self> {
        Self::with_limits(
            mediator,
            warnings,
            consumer_factory,
            DEFAULT_MAX_POOLS,
            DEFAULT_POOL_WARNING_THRESHOLD,
        )
    }

    /// Like [`QueueManager::new`] but with explicit pool-count limits,
    /// grounded on the teacher's `QueueManager::with_limits`.
    pub fn with_limits(
        mediator: Arc<dyn Mediator>,
        warnings: SharedWarnings,
        consumer_factory: Arc<dyn ConsumerFactory>,
        max_pools: usize,
        pool_warning_threshold: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            mediator,
            warnings,
            consumer_factory,
            pools: DashMap::new(),
            draining_pools: DashMap::new(),
            in_flight: DashMap::new(),
            id_index: DashMap::new(),
            consumers: DashMap::new(),
            consumer_restart_attempts: DashMap::new(),
            consumer_gave_up: DashMap::new(),
            config: RwLock::new(RouterConfig::default()),
            tracked_count: AtomicU32::new(0),
            max_pools,
            pool_warning_threshold,
            stall_config: RwLock::new(StallConfig::default()),
        })
    }

    pub fn stall_config(&self) -> StallConfig {
        self.stall_config.read().clone()
    }

    pub fn update_stall_config(&self, config: StallConfig) {
        *self.stall_config.write() = config;
    }

    /// The router config as of the last [`QueueManager::sync_config`] call.
    pub fn config_snapshot(&self) -> RouterConfig {
        self.config.read().clone()
    }

    pub fn register_consumer(&self, consumer: Arc<dyn QueueConsumer>) {
        self.consumers
            .insert(consumer.identifier().to_string(), consumer);
    }

    pub fn pool_snapshot(&self) -> Vec<Arc<ProcessPool>> {
        self.pools.iter().map(|e| e.value().clone()).collect()
    }

    pub fn in_flight_count(&self) -> u32 {
        self.tracked_count.load(Ordering::SeqCst)
    }

    pub fn in_flight_snapshot(&self) -> Vec<InFlightMessageInfo> {
        self.in_flight
            .iter()
            .map(|e| InFlightMessageInfo {
                message_id: e.id.clone(),
                broker_message_id: e.broker_message_id.clone(),
                queue_id: e.source_queue_id.clone(),
                pool_code: e.pool_code.clone(),
                elapsed_seconds: e.elapsed_seconds(),
            })
            .collect()
    }

    /// Gets or creates the pool for `code`, guarding against an unbounded
    /// pool map: `poolCode` is attacker/operator-controlled input, so
    /// a brand-new code is refused once `max_pools` is already reached
    /// and falls back to the default pool instead. Grounded on the
    /// teacher's pool-count guard in `reload_config`.
    fn get_or_create_pool(self: &Arc<Self>, code: &str) -> Arc<ProcessPool> {
        if let Some(pool) = self.pools.get(code) {
            return pool.clone();
        }

        let current = self.pools.len();
        let code = if current >= self.max_pools {
            self.warnings.critical(
                WarningCategory::PoolLimit,
                format!(
                    "refusing to create pool {code}: at limit of {} pools; routing to default pool",
                    self.max_pools
                ),
            );
            DEFAULT_POOL_CODE
        } else {
            if current >= self.pool_warning_threshold {
                self.warnings.warn(
                    WarningCategory::PoolLimit,
                    format!(
                        "pool count ({current}) approaching limit of {}",
                        self.max_pools
                    ),
                );
            }
            code
        };

        if let Some(pool) = self.pools.get(code) {
            return pool.clone();
        }
        let config = PoolConfig::default_for(code);
        let pool = ProcessPool::new(
            config.code.clone(),
            config.concurrency,
            config.rate_limit_per_minute,
            self.mediator.clone(),
            self.warnings.clone(),
        );
        self.pools.insert(code.to_string(), pool.clone());
        pool
    }

    /// Entry point from a consumer's poll loop. Mirrors spec.md §4.2's
    /// three-phase algorithm: dedup, per-pool capacity check, then a
    /// per-group FIFO submission barrier.
    pub async fn route_batch(self: &Arc<Self>, consumer: Arc<dyn QueueConsumer>, messages: Vec<QueuedMessage>) {
        if messages.is_empty() {
            return;
        }
        let batch_id = Uuid::new_v4().to_string();
        let mut actions = Vec::with_capacity(messages.len());

        // Phase 1: dedup.
        for qm in messages {
            let key = pipeline_key(&qm);
            if self.in_flight.contains_key(&key) {
                if let Some(mut existing) = self.in_flight.get_mut(&key) {
                    existing.receipt_handle = qm.receipt_handle.clone();
                }
                actions.push(RoutingAction::ImmediateNack(qm, None));
                continue;
            }

            if let Some(pointed) = self.id_index.get(&qm.message.id).map(|v| v.clone()) {
                if self.in_flight.contains_key(&pointed) {
                    if pointed != key {
                        // external requeue: the older delivery is still
                        // processing, drop this duplicate.
                        actions.push(RoutingAction::ImmediateAck(qm));
                        continue;
                    }
                } else {
                    // stale secondary entry: the primary already completed
                    // and cleaned up, but this pointer lagged. Self-heal.
                    self.id_index.remove(&qm.message.id);
                }
            }

            actions.push(RoutingAction::Route(qm));
        }

        // Phase 2: per-pool capacity check, grouped by pool code.
        let mut by_pool: IndexMap<String, Vec<QueuedMessage>> = IndexMap::new();
        let mut final_actions = Vec::with_capacity(actions.len());
        for action in actions {
            match action {
                RoutingAction::Route(qm) => {
                    let mut pool_code = qm.message.pool_code.clone();
                    if pool_code.trim().is_empty() {
                        self.warnings.warn(
                            WarningCategory::Routing,
                            format!(
                                "message {} has no poolCode, routing to default pool",
                                qm.message.id
                            ),
                        );
                        pool_code = DEFAULT_POOL_CODE.to_string();
                    }
                    by_pool.entry(pool_code).or_default().push(qm);
                }
                other => final_actions.push(other),
            }
        }

        let mut routable: IndexMap<String, Vec<QueuedMessage>> = IndexMap::new();
        for (pool_code, qms) in by_pool {
            let pool = self.get_or_create_pool(&pool_code);
            if pool.available_capacity() < qms.len() as u32 {
                self.warnings.warn(
                    WarningCategory::QueueFull,
                    format!(
                        "pool {} full ({} available, {} requested); NACKing sub-batch",
                        pool_code,
                        pool.available_capacity(),
                        qms.len()
                    ),
                );
                for qm in qms {
                    final_actions.push(RoutingAction::ImmediateNack(qm, None));
                }
            } else {
                routable.insert(pool_code, qms);
            }
        }

        // Phase 3: per-group FIFO submission barrier, pool by pool.
        for (pool_code, qms) in routable {
            let pool = self.get_or_create_pool(&pool_code);
            let mut by_group: IndexMap<String, Vec<QueuedMessage>> = IndexMap::new();
            for qm in qms {
                by_group
                    .entry(qm.message.group_id().to_string())
                    .or_default()
                    .push(qm);
            }

            let mut nack_remaining: HashSet<String> = HashSet::new();
            for (group_id, group_qms) in by_group {
                for qm in group_qms {
                    if nack_remaining.contains(&group_id) {
                        final_actions.push(RoutingAction::ImmediateNack(qm, None));
                        continue;
                    }

                    let key = pipeline_key(&qm);
                    let record = InFlightRecord {
                        pipeline_key: key.clone(),
                        id: qm.message.id.clone(),
                        broker_message_id: qm.broker_message_id.clone(),
                        source_queue_id: qm.queue_identifier.clone(),
                        pool_code: pool_code.clone(),
                        message_group_id: qm.message.message_group_id.clone(),
                        batch_id: batch_id.clone(),
                        receipt_handle: qm.receipt_handle.clone(),
                        tracked_at: Instant::now(),
                    };
                    self.in_flight.insert(key.clone(), record);
                    self.id_index.insert(qm.message.id.clone(), key.clone());
                    self.tracked_count.fetch_add(1, Ordering::SeqCst);

                    let (ack_tx, ack_rx) = oneshot::channel();
                    let task = PoolTask {
                        message: qm.message.clone(),
                        receipt_handle: qm.receipt_handle.clone(),
                        broker_message_id: qm.broker_message_id.clone(),
                        queue_identifier: qm.queue_identifier.clone(),
                        batch_id: batch_id.clone(),
                        ack_tx,
                    };

                    if pool.submit(task) {
                        self.spawn_completion_watcher(consumer.clone(), key, ack_rx);
                    } else {
                        self.untrack(&key, &qm.message.id);
                        final_actions.push(RoutingAction::ImmediateNack(qm, None));
                        nack_remaining.insert(group_id.clone());
                    }
                }
            }
        }

        for action in final_actions {
            match action {
                RoutingAction::Route(_) => unreachable!("routed messages are handled above"),
                RoutingAction::ImmediateAck(qm) => {
                    if let Err(err) = consumer.ack(&qm.receipt_handle).await {
                        tracing::warn!(error = %err, message_id = %qm.message.id, "ack failed for duplicate delivery");
                    }
                }
                RoutingAction::ImmediateNack(qm, delay) => {
                    if let Err(err) = consumer.nack_with_delay(&qm.receipt_handle, delay).await {
                        tracing::warn!(error = %err, message_id = %qm.message.id, "nack failed");
                    }
                }
            }
        }
    }

    fn untrack(&self, pipeline_key: &str, id: &str) {
        if self.in_flight.remove(pipeline_key).is_some() {
            self.tracked_count.fetch_sub(1, Ordering::SeqCst);
        }
        self.id_index.remove_if(id, |_, v| v == pipeline_key);
    }

    fn spawn_completion_watcher(
        self: &Arc<Self>,
        consumer: Arc<dyn QueueConsumer>,
        pipeline_key: String,
        ack_rx: oneshot::Receiver<AckDecision>,
    ) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let decision = ack_rx
                .await
                .unwrap_or(AckDecision::Nack { delay_seconds: None });

            let record = manager.in_flight.get(&pipeline_key).map(|r| r.clone());
            let Some(record) = record else {
                return;
            };
            manager.untrack(&pipeline_key, &record.id);

            let result = match decision {
                AckDecision::Ack => consumer.ack(&record.receipt_handle).await,
                AckDecision::Nack { delay_seconds } => {
                    consumer.nack_with_delay(&record.receipt_handle, delay_seconds).await
                }
                AckDecision::ExtendVisibility { seconds } => {
                    consumer.extend_visibility(&record.receipt_handle, seconds).await
                }
            };
            if let Err(err) = result {
                tracing::warn!(error = %err, message_id = %record.id, "ack/nack callback failed");
            }
        });
    }

    /// Periodic task (55s cadence per spec.md §4.2): extend visibility for
    /// every message whose tracked age exceeds the threshold.
    pub async fn run_visibility_extension_pass(&self) {
        for entry in self.in_flight.iter() {
            let record = entry.value();
            if record.elapsed_seconds() < VISIBILITY_EXTEND_THRESHOLD_SECONDS {
                continue;
            }
            if let Some(consumer) = self.consumers.get(&record.source_queue_id) {
                if let Err(err) = consumer
                    .extend_visibility(&record.receipt_handle, VISIBILITY_EXTEND_SECONDS)
                    .await
                {
                    tracing::warn!(error = %err, message_id = %record.id, "visibility extension failed");
                }
            }
        }
    }

    /// Periodic task (30s cadence): compare in-flight count against total
    /// pool capacity; emits a leak warning if tracking has outgrown the
    /// pools it's supposed to be bounded by.
    pub fn run_leak_detection_pass(&self) {
        let tracked = self.tracked_count.load(Ordering::SeqCst);
        let total_capacity: u32 = self
            .pools
            .iter()
            .map(|p| p.value().queue_capacity())
            .sum();
        if tracked > total_capacity {
            self.warnings.critical(
                WarningCategory::PipelineMapLeak,
                format!(
                    "in-flight tracker has {tracked} entries but total pool capacity is only {total_capacity}"
                ),
            );
        }
    }

    pub fn stalled_messages(&self, threshold_seconds: u64) -> Vec<StalledMessageInfo> {
        self.in_flight
            .iter()
            .filter(|e| e.elapsed_seconds() >= threshold_seconds)
            .map(|e| StalledMessageInfo {
                message_id: e.id.clone(),
                message_group_id: e.message_group_id.clone(),
                pool_code: e.pool_code.clone(),
                queue_identifier: e.source_queue_id.clone(),
                elapsed_seconds: e.elapsed_seconds(),
            })
            .collect()
    }

    /// Periodic task (60s cadence): detect consumers that haven't polled
    /// recently and restart them via the injected factory, bounded to
    /// [`MAX_CONSUMER_RESTART_ATTEMPTS`] attempts per consumer.
    pub async fn run_consumer_health_pass(self: &Arc<Self>) {
        let stalled: Vec<Arc<dyn QueueConsumer>> = self
            .consumers
            .iter()
            .filter(|e| {
                e.value().last_poll_at().elapsed().as_secs() > CONSUMER_STALL_THRESHOLD_SECONDS
            })
            .map(|e| e.value().clone())
            .collect();

        for consumer in stalled {
            let id = consumer.identifier().to_string();
            if self.consumer_gave_up.contains_key(&id) {
                continue;
            }

            let attempts = {
                let mut entry = self.consumer_restart_attempts.entry(id.clone()).or_insert(0);
                *entry += 1;
                *entry
            };

            if attempts > MAX_CONSUMER_RESTART_ATTEMPTS {
                self.consumer_gave_up.insert(id.clone(), ());
                self.warnings.critical(
                    WarningCategory::ConsumerRestartFailed,
                    format!("consumer {id} exceeded {MAX_CONSUMER_RESTART_ATTEMPTS} restart attempts; giving up"),
                );
                continue;
            }

            self.warnings.warn(
                WarningCategory::ConsumerRestart,
                format!("consumer {id} stalled (attempt {attempts}); restarting"),
            );
            consumer.stop().await;

            let queue_config = {
                let config = self.config.read();
                config.queues.iter().find(|q| q.name == id).cloned()
            };
            if let Some(queue_config) = queue_config {
                match self.consumer_factory.create_consumer(&queue_config).await {
                    Ok(new_consumer) => {
                        new_consumer.start().await;
                        self.consumers.insert(id.clone(), new_consumer);
                    }
                    Err(err) => {
                        tracing::error!(error = %err, consumer = %id, "failed to recreate consumer");
                    }
                }
            }
        }
    }

    /// Periodic task: log every in-flight message older than
    /// `stall_threshold_seconds`, and, if `force_nack_stalled` is enabled,
    /// force-NACK anything older than `force_nack_after_seconds` so a
    /// wedged downstream target doesn't hold a slot forever. Grounded on
    /// the teacher's `check_and_handle_stalled_messages`.
    pub async fn run_stall_detection_pass(&self) {
        let stall_config = self.stall_config();
        if !stall_config.enabled {
            return;
        }

        let stalled = self.stalled_messages(stall_config.stall_threshold_seconds);
        if stalled.is_empty() {
            return;
        }
        for info in &stalled {
            self.warnings.warn(
                WarningCategory::StalledMessage,
                format!(
                    "message {} in pool {} has been in-flight for {}s",
                    info.message_id, info.pool_code, info.elapsed_seconds
                ),
            );
        }

        if !stall_config.force_nack_stalled {
            return;
        }

        let to_force_nack: Vec<(String, InFlightRecord)> = self
            .in_flight
            .iter()
            .filter(|e| e.elapsed_seconds() >= stall_config.force_nack_after_seconds)
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        for (key, record) in to_force_nack {
            if let Some(consumer) = self.consumers.get(&record.source_queue_id) {
                if let Err(err) = consumer
                    .nack_with_delay(&record.receipt_handle, Some(stall_config.nack_delay_seconds))
                    .await
                {
                    self.warnings.emit(
                        WarningCategory::StalledMessage,
                        WarningSeverity::Error,
                        format!("failed to force-NACK stalled message {}: {err}", record.id),
                    );
                }
            }
            self.untrack(&key, &record.id);
        }
    }

    /// Reconcile live pools against `desired`: create missing pools, drain
    /// pools no longer present, and update concurrency/rate limit in place
    /// for pools whose config changed.
    pub async fn sync_config(self: &Arc<Self>, desired: RouterConfig) {
        let desired_codes: HashSet<String> = desired
            .processing_pools
            .iter()
            .map(|p| p.code.clone())
            .collect();

        for pool_config in &desired.processing_pools {
            match self.pools.get(&pool_config.code) {
                Some(pool) => {
                    if pool.concurrency() != pool_config.concurrency {
                        pool.update_concurrency(
                            pool_config.concurrency,
                            std::time::Duration::from_secs(30),
                        )
                        .await;
                    }
                    if pool.rate_limit_per_minute() != pool_config.rate_limit_per_minute {
                        pool.update_rate_limit(pool_config.rate_limit_per_minute);
                    }
                }
                None => {
                    let current = self.pools.len();
                    if current >= self.max_pools {
                        self.warnings.critical(
                            WarningCategory::PoolLimit,
                            format!(
                                "refusing to create pool {} from config: at limit of {} pools",
                                pool_config.code, self.max_pools
                            ),
                        );
                        continue;
                    }
                    if current >= self.pool_warning_threshold {
                        self.warnings.warn(
                            WarningCategory::PoolLimit,
                            format!(
                                "pool count ({current}) approaching limit of {}",
                                self.max_pools
                            ),
                        );
                    }
                    let pool = ProcessPool::new(
                        pool_config.code.clone(),
                        pool_config.concurrency,
                        pool_config.rate_limit_per_minute,
                        self.mediator.clone(),
                        self.warnings.clone(),
                    );
                    self.pools.insert(pool_config.code.clone(), pool);
                }
            }
        }

        let to_drain: Vec<String> = self
            .pools
            .iter()
            .map(|e| e.key().clone())
            .filter(|code| !desired_codes.contains(code) && code != DEFAULT_POOL_CODE)
            .collect();
        for code in to_drain {
            if let Some((_, pool)) = self.pools.remove(&code) {
                pool.drain();
                self.draining_pools.insert(code, pool);
            }
        }

        *self.config.write() = desired;
    }

    /// Pause intake, stop consumers, drain pools, then NACK whatever is
    /// still tracked. Mirrors spec.md §4.2's shutdown sequence.
    pub async fn shutdown(&self) {
        for entry in self.consumers.iter() {
            entry.value().stop().await;
        }
        let deadline = Instant::now() + std::time::Duration::from_secs(25);
        while Instant::now() < deadline
            && self.consumers.iter().any(|e| !e.value().fully_stopped())
        {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }

        for entry in self.pools.iter() {
            entry.value().drain();
        }
        let deadline = Instant::now() + std::time::Duration::from_secs(30);
        while Instant::now() < deadline && self.pools.iter().any(|e| !e.value().fully_drained()) {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }

        let stragglers: Vec<(String, InFlightRecord)> = self
            .in_flight
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (key, record) in stragglers {
            if let Some(consumer) = self.consumers.get(&record.source_queue_id) {
                if let Err(err) = consumer
                    .nack_with_delay(&record.receipt_handle, None)
                    .await
                {
                    self.warnings.emit(
                        WarningCategory::ShutdownCleanupErrors,
                        waypoint_core::WarningSeverity::Error,
                        format!("failed to NACK {key} during shutdown: {err}"),
                    );
                }
            }
            self.untrack(&key, &record.id);
        }
    }
}
