use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;
use uuid::Uuid;
use waypoint_core::{MediationType, Message, Outcome, PoolConfig, QueueConfig, RouterConfig};
use waypoint_engine::mediator::FixedMediator;
use waypoint_engine::{Mediator, QueueManager, WarningService};
use waypoint_queue::{ConsumerFactory, MemoryQueue, QueueConsumer, Result as QueueResult};

fn message(group: &str, pool_code: &str) -> Message {
    Message {
        id: Uuid::new_v4().to_string(),
        pool_code: pool_code.to_string(),
        auth_token: "tok".into(),
        mediation_type: MediationType::Http,
        mediation_target: "https://example.invalid/hook".into(),
        message_group_id: Some(group.to_string()),
        high_priority: false,
        payload: None,
    }
}

struct MemoryConsumerFactory;

#[async_trait]
impl ConsumerFactory for MemoryConsumerFactory {
    async fn create_consumer(
        &self,
        config: &waypoint_core::QueueConfig,
    ) -> QueueResult<Arc<dyn QueueConsumer>> {
        Ok(Arc::new(MemoryQueue::new(config.name.clone())))
    }
}

fn manager_with(mediator: Arc<dyn Mediator>) -> Arc<QueueManager> {
    QueueManager::new(
        mediator,
        Arc::new(WarningService::new("test")),
        Arc::new(MemoryConsumerFactory),
    )
}

async fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !predicate() {
        if Instant::now() >= deadline {
            panic!("condition was not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn happy_path_single_message_is_acked_and_untracked() {
    let manager = manager_with(Arc::new(FixedMediator::always(Outcome::success())));
    let consumer = MemoryQueue::new("q1");
    consumer.enqueue(message("g1", "p"));
    let consumer_arc: Arc<dyn QueueConsumer> = Arc::new(consumer.clone());
    manager.register_consumer(consumer_arc.clone());

    let batch = consumer.poll(10).await.unwrap();
    manager.route_batch(consumer_arc, batch).await;

    wait_until(Duration::from_secs(2), || manager.in_flight_count() == 0).await;
    assert_eq!(consumer.inflight_len(), 0);
    assert_eq!(consumer.pending_len(), 0);
}

#[tokio::test]
async fn full_pool_nacks_the_whole_oversized_sub_batch() {
    let manager = manager_with(Arc::new(FixedMediator::always(Outcome::success())));
    manager
        .sync_config(RouterConfig {
            processing_pools: vec![PoolConfig {
                code: "p".into(),
                concurrency: 1,
                rate_limit_per_minute: None,
            }],
            queues: vec![QueueConfig {
                name: "q1".into(),
                uri: "memory://q1".into(),
            }],
        })
        .await;

    let consumer = MemoryQueue::new("q1");
    // Pool "p" has concurrency 1 -> queueCapacity = max(20, 50) = 50.
    for i in 0..51 {
        consumer.enqueue(message(&format!("g{i}"), "p"));
    }
    let consumer_arc: Arc<dyn QueueConsumer> = Arc::new(consumer.clone());
    manager.register_consumer(consumer_arc.clone());

    let batch = consumer.poll(100).await.unwrap();
    assert_eq!(batch.len(), 51);
    manager.route_batch(consumer_arc, batch).await;

    // The whole 51-message sub-batch was rejected up front and redelivered;
    // none of it was ever tracked as in-flight.
    assert_eq!(manager.in_flight_count(), 0);
    assert_eq!(consumer.pending_len(), 51);
}

struct CountingMediator {
    calls: AtomicUsize,
}

#[async_trait]
impl Mediator for CountingMediator {
    async fn mediate(&self, _message: &Message) -> Outcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 {
            Outcome::error_process(None, None)
        } else {
            Outcome::success()
        }
    }
}

#[tokio::test]
async fn a_failing_first_message_cascades_nacks_to_its_group_siblings() {
    let manager = manager_with(Arc::new(CountingMediator {
        calls: AtomicUsize::new(0),
    }));
    let consumer = MemoryQueue::new("q1");
    for _ in 0..3 {
        consumer.enqueue(message("g1", "p"));
    }
    let consumer_arc: Arc<dyn QueueConsumer> = Arc::new(consumer.clone());
    manager.register_consumer(consumer_arc.clone());

    let batch = consumer.poll(10).await.unwrap();
    assert_eq!(batch.len(), 3);
    manager.route_batch(consumer_arc, batch).await;

    wait_until(Duration::from_secs(2), || manager.in_flight_count() == 0).await;
    // All three were redelivered: the first on its own failure, the other
    // two fast-failed by the cascade without ever reaching the mediator.
    assert_eq!(consumer.pending_len(), 3);
}

struct GatedMediator {
    notify: Arc<Notify>,
}

#[async_trait]
impl Mediator for GatedMediator {
    async fn mediate(&self, _message: &Message) -> Outcome {
        self.notify.notified().await;
        Outcome::success()
    }
}

#[tokio::test]
async fn physical_redelivery_of_an_in_flight_message_is_nacked_without_double_tracking() {
    let notify = Arc::new(Notify::new());
    let manager = manager_with(Arc::new(GatedMediator {
        notify: notify.clone(),
    }));
    let consumer = MemoryQueue::new("q1");
    consumer.enqueue(message("g1", "p"));
    consumer.enqueue(message("g1", "p"));
    let consumer_arc: Arc<dyn QueueConsumer> = Arc::new(consumer.clone());
    manager.register_consumer(consumer_arc.clone());

    let mut first = consumer.poll(1).await.unwrap();
    first[0].broker_message_id = Some("bm1".into());
    let mut second = consumer.poll(1).await.unwrap();
    second[0].broker_message_id = Some("bm1".into());

    manager.route_batch(consumer_arc.clone(), first).await;
    wait_until(Duration::from_secs(1), || manager.in_flight_count() == 1).await;

    let pending_before = consumer.pending_len();
    manager.route_batch(consumer_arc, second).await;

    // The redelivery was immediately nacked rather than routed a second
    // time; the tracker still shows exactly the one original message.
    assert_eq!(manager.in_flight_count(), 1);
    assert_eq!(consumer.pending_len(), pending_before + 1);

    notify.notify_one();
    wait_until(Duration::from_secs(2), || manager.in_flight_count() == 0).await;
}

#[tokio::test]
async fn sync_config_is_a_no_op_for_an_unchanged_pool() {
    let manager = manager_with(Arc::new(FixedMediator::always(Outcome::success())));
    let config = RouterConfig {
        processing_pools: vec![PoolConfig {
            code: "p".into(),
            concurrency: 4,
            rate_limit_per_minute: None,
        }],
        queues: vec![],
    };
    manager.sync_config(config.clone()).await;
    let pool_before = manager
        .pool_snapshot()
        .into_iter()
        .find(|p| p.code() == "p")
        .unwrap();

    manager.sync_config(config).await;
    let pool_after = manager
        .pool_snapshot()
        .into_iter()
        .find(|p| p.code() == "p")
        .unwrap();

    assert!(Arc::ptr_eq(&pool_before, &pool_after));
    assert_eq!(pool_after.concurrency(), 4);
}

#[tokio::test]
async fn a_pool_code_beyond_the_limit_falls_back_to_the_default_pool() {
    let manager = QueueManager::with_limits(
        Arc::new(FixedMediator::always(Outcome::success())),
        Arc::new(WarningService::new("test")),
        Arc::new(MemoryConsumerFactory),
        2,
        2,
    );
    let consumer = MemoryQueue::new("q1");
    // Seed the default pool and one named pool so both count against the
    // limit of 2 before the overflow case arrives.
    consumer.enqueue(message("g1", waypoint_engine::DEFAULT_POOL_CODE));
    consumer.enqueue(message("g2", "first-pool"));
    let consumer_arc: Arc<dyn QueueConsumer> = Arc::new(consumer.clone());
    manager.register_consumer(consumer_arc.clone());
    let batch = consumer.poll(10).await.unwrap();
    manager.route_batch(consumer_arc.clone(), batch).await;
    wait_until(Duration::from_secs(1), || manager.in_flight_count() == 0).await;
    assert_eq!(manager.pool_snapshot().len(), 2);

    // A third, distinct pool code arrives once the manager is already at
    // its limit of 2 pools: it must fall back to the pre-existing default
    // pool rather than growing the pool map further.
    consumer.enqueue(message("g3", "second-pool"));
    let batch = consumer.poll(10).await.unwrap();
    manager.route_batch(consumer_arc, batch).await;
    wait_until(Duration::from_secs(1), || manager.in_flight_count() == 0).await;

    let pools = manager.pool_snapshot();
    assert_eq!(pools.len(), 2);
    assert!(pools.iter().any(|p| p.code() == waypoint_engine::DEFAULT_POOL_CODE));
    assert!(!pools.iter().any(|p| p.code() == "second-pool"));
}

#[tokio::test]
async fn stall_detection_force_nacks_messages_past_the_configured_age() {
    let notify = Arc::new(Notify::new());
    let manager = manager_with(Arc::new(GatedMediator {
        notify: notify.clone(),
    }));
    manager.update_stall_config(waypoint_core::StallConfig {
        enabled: true,
        stall_threshold_seconds: 0,
        force_nack_stalled: true,
        force_nack_after_seconds: 0,
        nack_delay_seconds: 5,
    });

    let consumer = MemoryQueue::new("q1");
    consumer.enqueue(message("g1", "p"));
    let consumer_arc: Arc<dyn QueueConsumer> = Arc::new(consumer.clone());
    manager.register_consumer(consumer_arc.clone());
    let batch = consumer.poll(1).await.unwrap();
    manager.route_batch(consumer_arc, batch).await;
    wait_until(Duration::from_secs(1), || manager.in_flight_count() == 1).await;

    manager.run_stall_detection_pass().await;

    assert_eq!(manager.in_flight_count(), 0);
    assert_eq!(consumer.pending_len(), 1);

    notify.notify_one();
}
