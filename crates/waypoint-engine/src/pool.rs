//! Per-group cooperative worker pool: two priority tiers, a pool-wide
//! concurrency gate, a cooperative rate-limit gate, and batch+group
//! cascade-NACK bookkeeping.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify, Semaphore};
use tokio::time::timeout;
use waypoint_core::{
    queue_capacity_for, AckDecision, Outcome, OutcomeResult, PoolStats, PoolTask, WarningCategory,
};

use crate::mediator::Mediator;
use crate::metrics::PoolMetricsCollector;
use crate::warning::SharedWarnings;

/// How long a per-group worker waits on an empty regular queue before
/// exiting, provided the high-priority queue is also empty at that point.
pub const IDLE_GROUP_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Poll interval for the cooperative rate-limit wait loop.
const RATE_LIMIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const FAST_FAIL_DELAY_SECONDS: u32 = 10;

type Governor = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

struct GroupChannels {
    hi_tx: mpsc::UnboundedSender<PoolTask>,
    hi_rx: AsyncMutex<mpsc::UnboundedReceiver<PoolTask>>,
    reg_tx: mpsc::UnboundedSender<PoolTask>,
    reg_rx: AsyncMutex<mpsc::UnboundedReceiver<PoolTask>>,
    worker_alive: AtomicBool,
}

impl GroupChannels {
    fn new() -> Self {
        let (hi_tx, hi_rx) = mpsc::unbounded_channel();
        let (reg_tx, reg_rx) = mpsc::unbounded_channel();
        Self {
            hi_tx,
            hi_rx: AsyncMutex::new(hi_rx),
            reg_tx,
            reg_rx: AsyncMutex::new(reg_rx),
            worker_alive: AtomicBool::new(false),
        }
    }

    /// Best-effort: only meaningful once the owning worker has exited, so
    /// there is no contention left on either receiver.
    fn has_pending(&self) -> bool {
        let hi_empty = self.hi_rx.try_lock().map(|g| g.is_empty()).unwrap_or(true);
        let reg_empty = self.reg_rx.try_lock().map(|g| g.is_empty()).unwrap_or(true);
        !hi_empty || !reg_empty
    }
}

#[derive(Default)]
struct BatchGroupState {
    failed: AtomicBool,
    outstanding: AtomicU32,
}

pub struct ProcessPool {
    code: String,
    concurrency: AtomicU32,
    semaphore: Arc<Semaphore>,
    queue_capacity: AtomicU32,
    total_enqueued: AtomicU32,
    groups: DashMap<String, Arc<GroupChannels>>,
    rate_limiter: RwLock<Option<Arc<Governor>>>,
    rate_limit_per_minute: RwLock<Option<u32>>,
    draining: AtomicBool,
    drain_notify: Notify,
    batch_groups: DashMap<(String, String), Arc<BatchGroupState>>,
    mediator: Arc<dyn Mediator>,
    warnings: SharedWarnings,
    metrics: PoolMetricsCollector,
}

impl ProcessPool {
    pub fn new(
        code: impl Into<String>,
        concurrency: u32,
        rate_limit_per_minute: Option<u32>,
        mediator: Arc<dyn Mediator>,
        warnings: SharedWarnings,
    ) -> Arc<Self> {
        let pool = Arc::new(Self {
            code: code.into(),
            concurrency: AtomicU32::new(concurrency),
            semaphore: Arc::new(Semaphore::new(concurrency as usize)),
            queue_capacity: AtomicU32::new(queue_capacity_for(concurrency)),
            total_enqueued: AtomicU32::new(0),
            groups: DashMap::new(),
            rate_limiter: RwLock::new(rate_limit_per_minute.and_then(build_limiter)),
            rate_limit_per_minute: RwLock::new(rate_limit_per_minute),
            draining: AtomicBool::new(false),
            drain_notify: Notify::new(),
            batch_groups: DashMap::new(),
            mediator,
            warnings,
            metrics: PoolMetricsCollector::new(),
        });
        pool
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn concurrency(&self) -> u32 {
        self.concurrency.load(Ordering::SeqCst)
    }

    pub fn queue_capacity(&self) -> u32 {
        self.queue_capacity.load(Ordering::SeqCst)
    }

    pub fn queue_size(&self) -> u32 {
        self.total_enqueued.load(Ordering::SeqCst)
    }

    pub fn available_capacity(&self) -> u32 {
        self.queue_capacity()
            .saturating_sub(self.queue_size())
    }

    pub fn active_workers(&self) -> u32 {
        self.concurrency()
            .saturating_sub(self.semaphore.available_permits() as u32)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Registers the batch+group as admitting one more message, marks it as
    /// eligible for cascade-NACK bookkeeping on first sight.
    fn batch_group_entry(&self, batch_id: &str, group_id: &str) -> Arc<BatchGroupState> {
        self.batch_groups
            .entry((batch_id.to_string(), group_id.to_string()))
            .or_insert_with(|| Arc::new(BatchGroupState::default()))
            .clone()
    }

    /// `true` if this batch+group has already been marked failed by an
    /// earlier sibling in the same batch — callers must cascade-NACK.
    pub fn batch_group_failed(&self, batch_id: &str, group_id: &str) -> bool {
        self.batch_groups
            .get(&(batch_id.to_string(), group_id.to_string()))
            .map(|s| s.failed.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    fn mark_batch_group_failed(&self, batch_id: &str, group_id: &str) {
        if let Some(state) = self.batch_groups.get(&(batch_id.to_string(), group_id.to_string())) {
            state.failed.store(true, Ordering::SeqCst);
        }
    }

    fn complete_batch_group(&self, batch_id: &str, group_id: &str) {
        let key = (batch_id.to_string(), group_id.to_string());
        let remove = if let Some(state) = self.batch_groups.get(&key) {
            let remaining = state.outstanding.fetch_sub(1, Ordering::SeqCst) - 1;
            remaining == 0
        } else {
            false
        };
        if remove {
            self.batch_groups.remove(&key);
        }
    }

    /// Admit `task` into the pool. Returns `false` when draining or at
    /// capacity — the caller (the manager's FIFO barrier) must NACK on a
    /// `false` return and stop submitting further messages for this
    /// batch+group.
    pub fn submit(self: &Arc<Self>, task: PoolTask) -> bool {
        if self.draining.load(Ordering::SeqCst) {
            return false;
        }
        loop {
            let current = self.total_enqueued.load(Ordering::SeqCst);
            if current >= self.queue_capacity.load(Ordering::SeqCst) {
                return false;
            }
            if self
                .total_enqueued
                .compare_exchange_weak(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break;
            }
            std::hint::spin_loop();
        }

        let batch_group = self.batch_group_entry(&task.batch_id, task.message.group_id());
        batch_group.outstanding.fetch_add(1, Ordering::SeqCst);

        let group_id = task.message.group_id().to_string();
        let channels = self
            .groups
            .entry(group_id.clone())
            .or_insert_with(|| Arc::new(GroupChannels::new()))
            .clone();

        let high_priority = task.message.high_priority;
        let send_result = if high_priority {
            channels.hi_tx.send(task)
        } else {
            channels.reg_tx.send(task)
        };
        if send_result.is_err() {
            self.total_enqueued.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        self.metrics.record_submitted();
        self.ensure_worker(group_id, channels);
        true
    }

    fn ensure_worker(self: &Arc<Self>, group_id: String, channels: Arc<GroupChannels>) {
        if channels
            .worker_alive
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let inner_pool = Arc::clone(&pool);
            let inner_group = group_id.clone();
            let inner_channels = Arc::clone(&channels);
            let handle = tokio::spawn(async move {
                inner_pool.run_worker(inner_group, inner_channels).await;
            });
            if let Err(join_err) = handle.await {
                channels.worker_alive.store(false, Ordering::SeqCst);
                if channels.has_pending() {
                    pool.warnings.warn(
                        WarningCategory::GroupThreadRestart,
                        format!(
                            "worker for pool {} group {} exited abnormally ({join_err}); restarting",
                            pool.code, group_id
                        ),
                    );
                    pool.ensure_worker(group_id, channels);
                }
            }
        });
    }

    /// Priority policy (non-blocking HI poll, then a bounded blocking REG
    /// poll): a HI message that arrives while the worker is already
    /// blocked on REG is not seen until the REG wait resolves. This is the
    /// documented tradeoff of a single worker per group, not a bug.
    async fn run_worker(self: Arc<Self>, group_id: String, channels: Arc<GroupChannels>) {
        loop {
            if self.draining.load(Ordering::SeqCst) {
                break;
            }

            let hi_task = channels.hi_rx.lock().await.try_recv().ok();
            let task = match hi_task {
                Some(task) => task,
                None => {
                    tokio::select! {
                        biased;
                        _ = self.drain_notify.notified() => break,
                        res = timeout(IDLE_GROUP_TIMEOUT, async {
                            let mut guard = channels.reg_rx.lock().await;
                            guard.recv().await
                        }) => {
                            match res {
                                Ok(Some(task)) => task,
                                Ok(None) => break,
                                Err(_elapsed) => {
                                    if !channels.has_pending() {
                                        break;
                                    }
                                    continue;
                                }
                            }
                        }
                    }
                }
            };

            self.process_task(&group_id, task).await;
        }
        channels.worker_alive.store(false, Ordering::SeqCst);
    }

    async fn process_task(&self, group_id: &str, task: PoolTask) {
        let batch_id = task.batch_id.clone();
        let group_id = group_id.to_string();

        if self.batch_group_failed(&batch_id, &group_id) {
            let _ = task.ack_tx.send(AckDecision::Nack {
                delay_seconds: Some(FAST_FAIL_DELAY_SECONDS),
            });
            self.complete_batch_group(&batch_id, &group_id);
            self.total_enqueued.fetch_sub(1, Ordering::SeqCst);
            return;
        }

        self.wait_for_rate_limit().await;

        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let started_at = Instant::now();
        let outcome = self.mediator.mediate(&task.message).await;
        drop(permit);
        let duration_ms = started_at.elapsed().as_millis() as u64;

        self.record_outcome_metrics(&outcome, duration_ms);
        let decision = self.apply_outcome(&batch_id, &group_id, outcome);
        let _ = task.ack_tx.send(decision);
        self.total_enqueued.fetch_sub(1, Ordering::SeqCst);
    }

    fn record_outcome_metrics(&self, outcome: &Outcome, duration_ms: u64) {
        match outcome.result {
            OutcomeResult::Success => self.metrics.record_success(duration_ms),
            OutcomeResult::ErrorConfig => self.metrics.record_failure(duration_ms),
            OutcomeResult::ErrorProcess | OutcomeResult::ErrorConnection => {
                self.metrics.record_transient(duration_ms)
            }
        }
    }

    fn apply_outcome(&self, batch_id: &str, group_id: &str, outcome: Outcome) -> AckDecision {
        let decision = match outcome.result {
            OutcomeResult::Success => AckDecision::Ack,
            OutcomeResult::ErrorConfig => AckDecision::Ack,
            OutcomeResult::ErrorProcess | OutcomeResult::ErrorConnection => {
                self.mark_batch_group_failed(batch_id, group_id);
                AckDecision::Nack {
                    delay_seconds: Some(waypoint_core::effective_delay(outcome.delay_seconds)),
                }
            }
        };
        self.complete_batch_group(batch_id, group_id);
        decision
    }

    async fn wait_for_rate_limit(&self) {
        loop {
            let limiter = self.rate_limiter.read().clone();
            match limiter {
                None => return,
                Some(limiter) => {
                    if limiter.check().is_ok() {
                        return;
                    }
                    self.metrics.record_rate_limited();
                    tokio::time::sleep(RATE_LIMIT_POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Stop accepting new submissions, drop everything still queued, and
    /// wake idle workers so they notice drain and exit once their current
    /// call (if any) finishes.
    pub fn drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
        for entry in self.groups.iter() {
            let channels = entry.value();
            if let Ok(mut hi) = channels.hi_rx.try_lock() {
                while hi.try_recv().is_ok() {
                    self.total_enqueued.fetch_sub(1, Ordering::SeqCst);
                }
            }
            if let Ok(mut reg) = channels.reg_rx.try_lock() {
                while reg.try_recv().is_ok() {
                    self.total_enqueued.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }
        self.drain_notify.notify_waiters();
    }

    pub fn fully_drained(&self) -> bool {
        self.semaphore.available_permits() as u32 == self.concurrency()
    }

    /// Increase concurrency immediately, or try to reduce it by acquiring
    /// the delta's worth of permits within `timeout`. A decrease that can't
    /// complete in time leaves concurrency unchanged and returns `false`.
    pub async fn update_concurrency(&self, new_value: u32, timeout_duration: Duration) -> bool {
        let current = self.concurrency.load(Ordering::SeqCst);
        if new_value == current {
            return true;
        }
        if new_value > current {
            let delta = new_value - current;
            self.semaphore.add_permits(delta as usize);
            self.concurrency.store(new_value, Ordering::SeqCst);
            return true;
        }
        let delta = current - new_value;
        match timeout(
            timeout_duration,
            self.semaphore.clone().acquire_many_owned(delta),
        )
        .await
        {
            Ok(Ok(permits)) => {
                permits.forget();
                self.concurrency.store(new_value, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    /// Atomically replace the rate limiter. `None` disables limiting.
    pub fn update_rate_limit(&self, per_minute: Option<u32>) {
        {
            let current = self.rate_limit_per_minute.read();
            if *current == per_minute {
                return;
            }
        }
        *self.rate_limit_per_minute.write() = per_minute;
        *self.rate_limiter.write() = per_minute.and_then(build_limiter);
    }

    pub fn rate_limit_per_minute(&self) -> Option<u32> {
        *self.rate_limit_per_minute.read()
    }

    /// Permits not currently held by an in-flight mediator call.
    pub fn available_permits(&self) -> u32 {
        self.semaphore.available_permits() as u32
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            pool_code: self.code.clone(),
            concurrency: self.concurrency(),
            active_workers: self.active_workers(),
            available_permits: self.available_permits(),
            queue_size: self.queue_size(),
            queue_capacity: self.queue_capacity(),
            message_group_count: self.groups.len() as u32,
            rate_limit_per_minute: self.rate_limit_per_minute(),
            draining: self.is_draining(),
            submitted: self.metrics.submitted(),
            metrics: self.metrics.snapshot(),
        }
    }
}

fn build_limiter(per_minute: u32) -> Option<Arc<Governor>> {
    NonZeroU32::new(per_minute).map(|n| Arc::new(RateLimiter::direct(Quota::per_minute(n))))
}
