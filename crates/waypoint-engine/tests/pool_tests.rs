use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use uuid::Uuid;
use waypoint_core::{AckDecision, MediationType, Message, Outcome, PoolTask};
use waypoint_engine::mediator::FixedMediator;
use waypoint_engine::{ProcessPool, WarningService};

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

fn task(message: Message, batch_id: &str) -> (PoolTask, oneshot::Receiver<AckDecision>) {
    let (tx, rx) = oneshot::channel();
    (
        PoolTask {
            receipt_handle: Uuid::new_v4().to_string(),
            broker_message_id: None,
            queue_identifier: "q1".into(),
            batch_id: batch_id.to_string(),
            message,
            ack_tx: tx,
        },
        rx,
    )
}

fn success_pool(concurrency: u32) -> Arc<ProcessPool> {
    let mediator = Arc::new(FixedMediator::always(Outcome::success()));
    let warnings = Arc::new(WarningService::new("test"));
    ProcessPool::new("p", concurrency, None, mediator, warnings)
}

#[tokio::test]
async fn pool_at_exact_capacity_accepts_and_capacity_plus_one_rejects() {
    // concurrency=1 -> queue capacity = max(20*1, 50) = 50.
    let pool = success_pool(1);
    let batch_id = Uuid::new_v4().to_string();
    let mut receivers = Vec::new();
    for _ in 0..pool.queue_capacity() {
        let (t, rx) = task(message("g1", "p"), &batch_id);
        assert!(pool.submit(t));
        receivers.push(rx);
    }
    let (overflow, _rx) = task(message("g1", "p"), &batch_id);
    assert!(!pool.submit(overflow));

    for rx in receivers {
        let _ = rx.await;
    }
}

#[tokio::test]
async fn cascade_nack_marks_later_siblings_after_a_failure() {
    let mediator = Arc::new(FixedMediator::from_fn(|| {
        Outcome::error_process(None, None)
    }));
    let warnings = Arc::new(WarningService::new("test"));
    let pool = ProcessPool::new("p", 1, None, mediator, warnings);

    // Submit both siblings before either is processed, the way a batch
    // barrier submits a whole group up front: outstanding must already
    // count both when the first failure lands, or the batch+group entry
    // gets removed the instant the first one finishes.
    let batch_id = Uuid::new_v4().to_string();
    let (t1, rx1) = task(message("g1", "p"), &batch_id);
    let (t2, rx2) = task(message("g1", "p"), &batch_id);
    assert!(pool.submit(t1));
    assert!(pool.submit(t2));

    let decision1 = rx1.await.unwrap();
    assert!(matches!(decision1, AckDecision::Nack { .. }));

    let decision2 = rx2.await.unwrap();
    match decision2 {
        AckDecision::Nack { delay_seconds } => assert_eq!(delay_seconds, Some(10)),
        other => panic!("expected fast-fail nack, got {other:?}"),
    }
}

#[tokio::test]
async fn update_concurrency_increase_is_immediate() {
    let pool = success_pool(2);
    assert!(pool.update_concurrency(5, Duration::from_secs(1)).await);
    assert_eq!(pool.concurrency(), 5);
}

#[tokio::test]
async fn update_concurrency_decrease_leaves_value_unchanged_on_timeout() {
    // Occupy both permits with messages that never complete: use a
    // mediator that sleeps far longer than the shrink timeout.
    let slow_pool = {
        let mediator = Arc::new(SlowMediator);
        let warnings = Arc::new(WarningService::new("test"));
        ProcessPool::new("slow", 2, None, mediator, warnings)
    };
    let batch_id = Uuid::new_v4().to_string();
    let (t1, _rx1) = task(message("g1", "slow"), &batch_id);
    let (t2, _rx2) = task(message("g2", "slow"), &batch_id);
    assert!(slow_pool.submit(t1));
    assert!(slow_pool.submit(t2));
    tokio::time::sleep(Duration::from_millis(20)).await;

    let shrank = slow_pool
        .update_concurrency(0, Duration::from_millis(50))
        .await;
    assert!(!shrank);
    assert_eq!(slow_pool.concurrency(), 2);
}

struct SlowMediator;

#[async_trait::async_trait]
impl waypoint_engine::Mediator for SlowMediator {
    async fn mediate(&self, _message: &Message) -> Outcome {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Outcome::success()
    }
}

#[tokio::test]
async fn rate_limit_replacement_unblocks_a_waiting_worker() {
    let mediator = Arc::new(FixedMediator::always(Outcome::success()));
    let warnings = Arc::new(WarningService::new("test"));
    let pool = ProcessPool::new("p", 1, Some(1), mediator, warnings);
    // Exhaust the single-per-minute quota immediately.
    pool.update_rate_limit(Some(1));

    let batch_id = Uuid::new_v4().to_string();
    let (t1, rx1) = task(message("g1", "p"), &batch_id);
    assert!(pool.submit(t1));
    let _ = tokio::time::timeout(Duration::from_secs(2), rx1).await;

    let (t2, rx2) = task(message("g1", "p"), &batch_id);
    assert!(pool.submit(t2));

    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.update_rate_limit(None);

    let decision = tokio::time::timeout(Duration::from_millis(500), rx2)
        .await
        .expect("rate limit replacement should unblock the waiting worker within 500ms")
        .unwrap();
    assert!(matches!(decision, AckDecision::Ack));
}
