//! Batch producer
//!
//! Puts jobs on the topic the workers consume, each carrying the batch size
//! as its `numJobs` attribute. Also exposes the subscription cursor reset
//! ("purge") and a scripted sequence of bursts for demos.

mod scenario;

pub use scenario::{Burst, Scenario, run_scenario};

use crate::queue::{BACKLOG_ATTRIBUTE, OutgoingMessage, QueueError, TopicPublisher};
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

/// Largest batch accepted by a single Pub/Sub publish request
pub const MAX_MESSAGES_PER_REQUEST: usize = 1000;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to prepare topic '{topic}': {source}")]
    Topic {
        topic: String,
        #[source]
        source: QueueError,
    },

    #[error("failed to publish to topic '{topic}': {source}")]
    Publish {
        topic: String,
        #[source]
        source: QueueError,
    },

    #[error("failed to seek subscription '{subscription}': {source}")]
    Seek {
        subscription: String,
        #[source]
        source: QueueError,
    },

    #[error("failed to encode job body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("no messages accepted for topic '{0}'")]
    NothingPublished(String),
}

pub type Result<T> = std::result::Result<T, PublishError>;

/// Message body of a published job; the worker does not interpret it
#[derive(Debug, Serialize)]
struct JobBody {
    id: u32,
    duration: String,
}

/// Build the messages of one batch: ids `1..=count`, all tagged with
/// `numJobs = count`
pub fn batch_messages(count: u32, work_duration_secs: u64) -> Result<Vec<OutgoingMessage>> {
    let backlog = count.to_string();

    (1..=count)
        .map(|id| {
            let body = serde_json::to_vec(&JobBody {
                id,
                duration: format!("{work_duration_secs}s"),
            })?;
            Ok(OutgoingMessage::new(body).with_attribute(BACKLOG_ATTRIBUTE, backlog.clone()))
        })
        .collect()
}

/// Publish `count` jobs to `topic`, creating the topic if needed
///
/// Messages go out in chunks of [`MAX_MESSAGES_PER_REQUEST`]. A failed chunk
/// is logged and skipped; the number of accepted messages is returned.
pub async fn publish_batch<P: TopicPublisher + ?Sized>(
    publisher: &P,
    topic: &str,
    count: u32,
    work_duration_secs: u64,
) -> Result<usize> {
    info!(topic, count, "Publishing jobs");

    publisher
        .ensure_topic(topic)
        .await
        .map_err(|source| PublishError::Topic {
            topic: topic.to_string(),
            source,
        })?;

    let messages = batch_messages(count, work_duration_secs)?;
    let mut accepted = 0;

    for (chunk_index, chunk) in messages.chunks(MAX_MESSAGES_PER_REQUEST).enumerate() {
        let first = chunk_index * MAX_MESSAGES_PER_REQUEST + 1;
        match publisher.publish(topic, chunk.to_vec()).await {
            Ok(ids) => {
                for (offset, id) in ids.iter().enumerate() {
                    info!(index = first + offset, id = %id, "Published message");
                }
                accepted += ids.len();
            }
            Err(e) => {
                warn!(
                    first,
                    last = first + chunk.len() - 1,
                    error = %e,
                    "Failed to publish messages"
                );
            }
        }
    }

    if accepted == 0 && count > 0 {
        return Err(PublishError::NothingPublished(topic.to_string()));
    }

    info!(topic, accepted, num_jobs = count, "Published messages with numJobs attribute");
    Ok(accepted)
}

/// Publish the end-of-run marker: body `DONE`, `numJobs = 0`
pub async fn publish_done<P: TopicPublisher + ?Sized>(publisher: &P, topic: &str) -> Result<()> {
    publisher
        .ensure_topic(topic)
        .await
        .map_err(|source| PublishError::Topic {
            topic: topic.to_string(),
            source,
        })?;

    let done = OutgoingMessage::new("DONE").with_attribute(BACKLOG_ATTRIBUTE, "0");
    let ids = publisher
        .publish(topic, vec![done])
        .await
        .map_err(|source| PublishError::Publish {
            topic: topic.to_string(),
            source,
        })?;

    if ids.is_empty() {
        return Err(PublishError::NothingPublished(topic.to_string()));
    }
    info!(topic, "Published DONE message");
    Ok(())
}

/// Reset the subscription cursor to now
///
/// This is a seek, not a truncation: messages that are currently leased but
/// unacknowledged get redelivered, and nothing is deleted.
pub async fn purge<P: TopicPublisher + ?Sized>(publisher: &P, subscription: &str) -> Result<()> {
    info!(subscription, "Purging queue");

    publisher
        .seek(subscription, OffsetDateTime::now_utc())
        .await
        .map_err(|source| PublishError::Seek {
            subscription: subscription.to_string(),
            source,
        })?;

    info!("Subscription cursor reset; unacknowledged messages will be redelivered");
    warn!("Seeking does not delete messages; use a future timestamp or recreate the subscription for a full purge");
    Ok(())
}
