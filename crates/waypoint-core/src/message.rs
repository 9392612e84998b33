//! The message types that flow through the dispatch pipeline.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// The default FIFO partition key when a message carries no `messageGroupId`.
pub const DEFAULT_GROUP: &str = "__DEFAULT__";

/// The mediation strategy for a message. Only HTTP is specified; this is kept
/// as an enum (rather than a bare constant) so a decode of an unsupported
/// value is a typed configuration error instead of a silent default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MediationType {
    #[serde(rename = "HTTP")]
    Http,
}

/// The application-level message decoded off a queue envelope.
///
/// Field names mirror the wire envelope in spec.md §6: `id`, `poolCode`,
/// `authToken`, `mediationType`, `mediationTarget`, `messageGroupId`,
/// `highPriority`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub pool_code: String,
    pub auth_token: String,
    pub mediation_type: MediationType,
    pub mediation_target: String,
    #[serde(default)]
    pub message_group_id: Option<String>,
    #[serde(default)]
    pub high_priority: bool,
    /// Opaque application payload, carried end-to-end but not sent downstream
    /// in the minimum contract (only `id` is POSTed).
    #[serde(default, with = "payload_base64")]
    pub payload: Option<Vec<u8>>,
}

impl Message {
    /// The FIFO partition key, substituting the default group when absent.
    pub fn group_id(&self) -> &str {
        self.message_group_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_GROUP)
    }
}

mod payload_base64 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .encode(bytes)
                    .serialize(s)
            }
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        use base64::Engine;
        let raw: Option<String> = Option::deserialize(d)?;
        match raw {
            Some(s) => base64::engine::general_purpose::STANDARD
                .decode(s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// A message as handed to the manager by a queue consumer: the decoded
/// [`Message`] plus the queue-specific tracking metadata needed to
/// acknowledge it later.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub message: Message,
    pub receipt_handle: String,
    pub broker_message_id: Option<String>,
    pub queue_identifier: String,
}

/// One poll's worth of messages, given a single fresh `batch_id` by the
/// manager when it enters routing.
#[derive(Debug, Clone)]
pub struct Batch {
    pub batch_id: String,
    pub messages: Vec<QueuedMessage>,
}

/// A message queued for delivery inside a process pool, carrying the
/// channel the manager uses to learn the terminal ack/nack decision.
pub struct PoolTask {
    pub message: Message,
    pub receipt_handle: String,
    pub broker_message_id: Option<String>,
    pub queue_identifier: String,
    pub batch_id: String,
    pub ack_tx: tokio::sync::oneshot::Sender<AckDecision>,
}

/// The decision the pool communicates back to the manager for a message.
#[derive(Debug, Clone)]
pub enum AckDecision {
    Ack,
    Nack { delay_seconds: Option<u32> },
    ExtendVisibility { seconds: u32 },
}

/// An in-flight tracking record: one per message admitted to routing, kept
/// until ack or nack. `pipeline_key` is the primary index key
/// (`brokerMessageId` if present, else `id`).
#[derive(Debug, Clone)]
pub struct InFlightRecord {
    pub pipeline_key: String,
    pub id: String,
    pub broker_message_id: Option<String>,
    pub source_queue_id: String,
    pub pool_code: String,
    pub message_group_id: Option<String>,
    pub batch_id: String,
    pub receipt_handle: String,
    pub tracked_at: Instant,
}

impl InFlightRecord {
    pub fn elapsed_seconds(&self) -> u64 {
        self.tracked_at.elapsed().as_secs()
    }
}
