use uuid::Uuid;
use waypoint_core::{MediationType, Message};
use waypoint_queue::{poll_pace, MemoryQueue, QueueConsumer};

fn msg(group: Option<&str>, high_priority: bool) -> Message {
    Message {
        id: Uuid::new_v4().to_string(),
        pool_code: "default".into(),
        auth_token: "tok".into(),
        mediation_type: MediationType::Http,
        mediation_target: "https://example.invalid/hook".into(),
        message_group_id: group.map(|s| s.to_string()),
        high_priority,
        payload: None,
    }
}

#[tokio::test]
async fn poll_respects_max_messages_and_preserves_order() {
    let q = MemoryQueue::new("orders");
    for i in 0..5 {
        q.enqueue(msg(Some(&format!("g{i}")), false));
    }
    let first = q.poll(3).await.unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(q.pending_len(), 2);

    let second = q.poll(10).await.unwrap();
    assert_eq!(second.len(), 2);
    assert_eq!(q.pending_len(), 0);
}

#[tokio::test]
async fn extend_visibility_on_unknown_handle_errors() {
    let q = MemoryQueue::new("orders");
    let err = q.extend_visibility("missing", 30).await.unwrap_err();
    assert!(matches!(err, waypoint_queue::QueueError::UnknownReceipt(_)));
}

#[tokio::test]
async fn full_batch_paces_with_no_backoff_then_drains_to_empty_backoff() {
    let q = MemoryQueue::new("orders");
    for _ in 0..4 {
        q.enqueue(msg(None, false));
    }
    let batch = q.poll(4).await.unwrap();
    assert_eq!(poll_pace(batch.len(), 4).sleep, None);

    let drained = q.poll(4).await.unwrap();
    assert!(drained.is_empty());
    assert!(poll_pace(drained.len(), 4).sleep.is_some());
}

#[tokio::test]
async fn high_priority_flag_round_trips() {
    let q = MemoryQueue::new("orders");
    q.enqueue(msg(None, true));
    let batch = q.poll(1).await.unwrap();
    assert!(batch[0].message.high_priority);
}
