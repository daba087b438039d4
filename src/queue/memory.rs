//! In-process queue with Pub/Sub-like lease semantics
//!
//! A pulled message stays leased until it is acknowledged or its ack
//! deadline passes, after which it is put back at the head of the queue and
//! redelivered with an incremented delivery attempt. Backs the consumer and
//! publisher tests.

use super::{MessageQueue, OutgoingMessage, QueueError, ReceivedMessage, Result, TopicPublisher};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    data: Bytes,
    attributes: HashMap<String, String>,
    publish_time: OffsetDateTime,
    delivery_attempt: u32,
}

#[derive(Debug)]
struct Lease {
    message: StoredMessage,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    pending: VecDeque<StoredMessage>,
    leased: HashMap<String, Lease>,
    acked: Vec<String>,
    deliveries: u64,
    max_outstanding: usize,
    failing_acks: usize,
    failing_pulls: VecDeque<QueueError>,
}

impl Inner {
    /// Return expired leases to the head of the queue, oldest publish first
    fn expire_leases(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(ack_id, _)| ack_id.clone())
            .collect();

        let mut returned: Vec<StoredMessage> = expired
            .iter()
            .filter_map(|ack_id| self.leased.remove(ack_id))
            .map(|lease| lease.message)
            .collect();

        returned.sort_by_key(|message| std::cmp::Reverse(message.publish_time));
        for message in returned {
            debug!(message_id = %message.message_id, "Ack deadline expired, message redelivered");
            self.pending.push_front(message);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.leased.values().map(|lease| lease.deadline).min()
    }
}

/// In-memory queue implementing both the subscription and topic sides
#[derive(Debug)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    ack_deadline: Duration,
}

impl MemoryQueue {
    pub fn new(ack_deadline: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            ack_deadline,
        }
    }

    /// Enqueue a message and wake a waiting puller
    pub fn push(&self, message: OutgoingMessage) -> String {
        let message_id = Uuid::now_v7().to_string();
        {
            let mut inner = self.lock();
            inner.pending.push_back(StoredMessage {
                message_id: message_id.clone(),
                data: message.data,
                attributes: message.attributes,
                publish_time: OffsetDateTime::now_utc(),
                delivery_attempt: 0,
            });
        }
        self.notify.notify_waiters();
        message_id
    }

    /// Make the next `count` ack calls fail
    pub fn fail_next_acks(&self, count: usize) {
        self.lock().failing_acks = count;
    }

    /// Make the next pull calls return `errors`, one per call, before any
    /// message is leased
    pub fn fail_next_pulls(&self, errors: impl IntoIterator<Item = QueueError>) {
        self.lock().failing_pulls.extend(errors);
    }

    /// Messages leased and not yet acknowledged
    pub fn outstanding(&self) -> usize {
        self.lock().leased.len()
    }

    /// Highest number of simultaneously outstanding messages ever observed
    pub fn max_outstanding(&self) -> usize {
        self.lock().max_outstanding
    }

    /// Messages waiting to be pulled
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Ids of acknowledged messages, in acknowledgment order
    pub fn acked(&self) -> Vec<String> {
        self.lock().acked.clone()
    }

    /// Total deliveries, redeliveries included
    pub fn deliveries(&self) -> u64 {
        self.lock().deliveries
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_lease(&self) -> std::result::Result<ReceivedMessage, Option<Instant>> {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.expire_leases(now);

        let Some(mut message) = inner.pending.pop_front() else {
            return Err(inner.next_deadline());
        };

        message.delivery_attempt += 1;
        inner.deliveries += 1;

        let ack_id = Uuid::new_v4().to_string();
        let received = ReceivedMessage {
            ack_id: ack_id.clone(),
            message_id: message.message_id.clone(),
            attributes: message.attributes.clone(),
            data: message.data.clone(),
            publish_time: Some(message.publish_time),
            delivery_attempt: Some(message.delivery_attempt),
        };

        inner.leased.insert(
            ack_id,
            Lease {
                message,
                deadline: now + self.ack_deadline,
            },
        );
        inner.max_outstanding = inner.max_outstanding.max(inner.leased.len());

        Ok(received)
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn pull(&self) -> Result<ReceivedMessage> {
        if let Some(error) = self.lock().failing_pulls.pop_front() {
            return Err(error);
        }

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_lease() {
                Ok(message) => return Ok(message),
                Err(Some(deadline)) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                Err(None) => notified.await,
            }
        }
    }

    async fn ack(&self, ack_id: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.expire_leases(Instant::now());

        if inner.failing_acks > 0 {
            inner.failing_acks -= 1;
            return Err(QueueError::Transport("injected ack failure".to_string()));
        }

        match inner.leased.remove(ack_id) {
            Some(lease) => {
                inner.acked.push(lease.message.message_id);
                Ok(())
            }
            None => Err(QueueError::UnknownAckId(ack_id.to_string())),
        }
    }
}

#[async_trait]
impl TopicPublisher for MemoryQueue {
    async fn ensure_topic(&self, _topic: &str) -> Result<()> {
        Ok(())
    }

    async fn publish(&self, _topic: &str, messages: Vec<OutgoingMessage>) -> Result<Vec<String>> {
        Ok(messages.into_iter().map(|message| self.push(message)).collect())
    }

    async fn seek(&self, subscription: &str, to: OffsetDateTime) -> Result<()> {
        let released = {
            let mut inner = self.lock();
            let mut leases: Vec<StoredMessage> =
                inner.leased.drain().map(|(_, lease)| lease.message).collect();
            leases.sort_by_key(|message| std::cmp::Reverse(message.publish_time));

            let released = leases.len();
            for message in leases {
                inner.pending.push_front(message);
            }
            released
        };

        info!(subscription, %to, released, "Subscription cursor reset");
        self.notify.notify_waiters();
        Ok(())
    }
}
