//! Message queue abstraction
//!
//! The consumer only needs two operations from a subscription: pull exactly
//! one message and acknowledge it. Publishing and cursor seeks live behind a
//! separate trait used by the batch producer.

pub mod memory;
pub mod pubsub;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use thiserror::Error;
use time::OffsetDateTime;

pub use memory::MemoryQueue;
pub use pubsub::{PubSubClient, PubSubSettings, PubSubSubscription};

/// Attribute carrying the publisher's view of the queue depth
pub const BACKLOG_ATTRIBUTE: &str = "numJobs";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unknown or expired ack id: {0}")]
    UnknownAckId(String),
}

impl QueueError {
    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::Transport(_) | QueueError::Timeout | QueueError::Auth(_) => true,
            QueueError::Status { status, .. } => *status == 429 || *status >= 500,
            QueueError::Decode(_) | QueueError::NotFound(_) | QueueError::UnknownAckId(_) => false,
        }
    }
}

impl From<reqwest::Error> for QueueError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            QueueError::Timeout
        } else if value.is_decode() {
            QueueError::Decode(value.to_string())
        } else {
            QueueError::Transport(value.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// A message leased from a subscription, outstanding until acknowledged
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message_id: String,
    pub attributes: HashMap<String, String>,
    pub data: Bytes,
    pub publish_time: Option<OffsetDateTime>,
    pub delivery_attempt: Option<u32>,
}

/// A message about to be published to a topic
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingMessage {
    pub data: Bytes,
    pub attributes: HashMap<String, String>,
}

impl OutgoingMessage {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Subscription side of a queue
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Wait for and lease the next message
    ///
    /// Blocks until a message is available. Callers must `ack` it before
    /// calling `pull` again to keep at most one message outstanding.
    async fn pull(&self) -> Result<ReceivedMessage>;

    /// Acknowledge a leased message so it is not redelivered
    async fn ack(&self, ack_id: &str) -> Result<()>;
}

/// Topic side of a queue, used by the batch producer
#[async_trait]
pub trait TopicPublisher: Send + Sync {
    /// Create the topic if it does not exist yet
    async fn ensure_topic(&self, topic: &str) -> Result<()>;

    /// Publish messages, returning the server-assigned ids
    async fn publish(&self, topic: &str, messages: Vec<OutgoingMessage>) -> Result<Vec<String>>;

    /// Move the subscription cursor to `to`
    ///
    /// This does not delete anything: outstanding messages become eligible
    /// for redelivery.
    async fn seek(&self, subscription: &str, to: OffsetDateTime) -> Result<()>;
}

#[async_trait]
impl<Q: MessageQueue + ?Sized> MessageQueue for std::sync::Arc<Q> {
    async fn pull(&self) -> Result<ReceivedMessage> {
        (**self).pull().await
    }

    async fn ack(&self, ack_id: &str) -> Result<()> {
        (**self).ack(ack_id).await
    }
}

#[async_trait]
impl<P: TopicPublisher + ?Sized> TopicPublisher for std::sync::Arc<P> {
    async fn ensure_topic(&self, topic: &str) -> Result<()> {
        (**self).ensure_topic(topic).await
    }

    async fn publish(&self, topic: &str, messages: Vec<OutgoingMessage>) -> Result<Vec<String>> {
        (**self).publish(topic, messages).await
    }

    async fn seek(&self, subscription: &str, to: OffsetDateTime) -> Result<()> {
        (**self).seek(subscription, to).await
    }
}
