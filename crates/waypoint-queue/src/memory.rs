//! An in-process [`QueueConsumer`] double with no broker behind it.
//!
//! Used by the engine's own test suite and by standalone/dev deployments
//! that don't need a real broker (spec.md §1 treats the broker as an
//! external collaborator; this is the seam that lets tests push messages
//! directly instead of standing one up).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;
use waypoint_core::QueuedMessage;

use crate::error::{QueueError, Result};
use crate::{QueueConsumer, QueueMetrics};

struct Inflight {
    message: QueuedMessage,
    visibility_extensions: u32,
}

struct Inner {
    identifier: String,
    pending: Mutex<VecDeque<QueuedMessage>>,
    inflight: Mutex<std::collections::HashMap<String, Inflight>>,
    last_poll_at: Mutex<Instant>,
    started: AtomicBool,
    stopped: AtomicBool,
    total_polled: AtomicU64,
    total_acked: AtomicU64,
    total_nacked: AtomicU64,
}

/// An embedded, broker-free queue: [`enqueue`](MemoryQueue::enqueue) pushes
/// messages in, [`poll`](QueueConsumer::poll) hands them out with a
/// freshly minted receipt handle each time.
#[derive(Clone)]
pub struct MemoryQueue {
    inner: Arc<Inner>,
}

impl MemoryQueue {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                identifier: identifier.into(),
                pending: Mutex::new(VecDeque::new()),
                inflight: Mutex::new(std::collections::HashMap::new()),
                last_poll_at: Mutex::new(Instant::now()),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                total_polled: AtomicU64::new(0),
                total_acked: AtomicU64::new(0),
                total_nacked: AtomicU64::new(0),
            }),
        }
    }

    /// Push a message onto the tail of the queue, as a real broker would
    /// once something published to it.
    pub fn enqueue(&self, message: waypoint_core::Message) {
        let receipt_handle = Uuid::new_v4().to_string();
        let queue_identifier = self.inner.identifier.clone();
        self.inner.pending.lock().push_back(QueuedMessage {
            message,
            receipt_handle,
            broker_message_id: None,
            queue_identifier,
        });
    }

    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn inflight_len(&self) -> usize {
        self.inner.inflight.lock().len()
    }
}

#[async_trait]
impl QueueConsumer for MemoryQueue {
    fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    async fn start(&self) {
        self.inner.started.store(true, Ordering::SeqCst);
        self.inner.stopped.store(false, Ordering::SeqCst);
    }

    async fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
    }

    fn last_poll_at(&self) -> Instant {
        *self.inner.last_poll_at.lock()
    }

    fn fully_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    async fn poll(&self, max_messages: u32) -> Result<Vec<QueuedMessage>> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        *self.inner.last_poll_at.lock() = Instant::now();
        let mut pending = self.inner.pending.lock();
        let take = (max_messages as usize).min(pending.len());
        let mut out = Vec::with_capacity(take);
        for _ in 0..take {
            if let Some(qm) = pending.pop_front() {
                out.push(qm);
            }
        }
        drop(pending);
        self.inner
            .total_polled
            .fetch_add(out.len() as u64, Ordering::Relaxed);
        let mut inflight = self.inner.inflight.lock();
        for qm in &out {
            inflight.insert(
                qm.receipt_handle.clone(),
                Inflight {
                    message: qm.clone(),
                    visibility_extensions: 0,
                },
            );
        }
        Ok(out)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<()> {
        let removed = self.inner.inflight.lock().remove(receipt_handle);
        if removed.is_none() {
            return Err(QueueError::UnknownReceipt(receipt_handle.to_string()));
        }
        self.inner.total_acked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn nack_with_delay(
        &self,
        receipt_handle: &str,
        _delay_seconds: Option<u32>,
    ) -> Result<()> {
        let removed = self.inner.inflight.lock().remove(receipt_handle);
        let Some(entry) = removed else {
            return Err(QueueError::UnknownReceipt(receipt_handle.to_string()));
        };
        self.inner.total_nacked.fetch_add(1, Ordering::Relaxed);
        // A real broker would honor delay_seconds before redelivering; the
        // double redelivers immediately since tests don't want to wait.
        let new_handle = Uuid::new_v4().to_string();
        let queue_identifier = self.inner.identifier.clone();
        self.inner.pending.lock().push_back(QueuedMessage {
            message: entry.message.message,
            receipt_handle: new_handle,
            broker_message_id: None,
            queue_identifier,
        });
        Ok(())
    }

    async fn extend_visibility(&self, receipt_handle: &str, _seconds: u32) -> Result<()> {
        let mut inflight = self.inner.inflight.lock();
        match inflight.get_mut(receipt_handle) {
            Some(entry) => {
                entry.visibility_extensions += 1;
                Ok(())
            }
            None => Err(QueueError::UnknownReceipt(receipt_handle.to_string())),
        }
    }

    async fn metrics(&self) -> Option<QueueMetrics> {
        Some(QueueMetrics {
            queue_identifier: self.inner.identifier.clone(),
            pending_messages: self.pending_len() as u64,
            in_flight_messages: self.inflight_len() as u64,
            total_polled: self.inner.total_polled.load(Ordering::Relaxed),
            total_acked: self.inner.total_acked.load(Ordering::Relaxed),
            total_nacked: self.inner.total_nacked.load(Ordering::Relaxed),
        })
    }
}
