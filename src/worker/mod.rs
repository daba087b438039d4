//! Queue consumer
//!
//! Pulls one message at a time, publishes its backlog hint to the shared
//! `MetricState`, performs the simulated work and acknowledges. The next pull
//! is issued only after the previous ack returned, so a worker never holds
//! more than one outstanding message and `numJobs` tracks real backlog.
//!
//! Leases are not extended while a job runs. The subscription's
//! `ackDeadlineSeconds` must exceed `JOB_DURATION_SEC`; with Pub/Sub's
//! default of 10s every job is redelivered before it is acknowledged.

pub mod job;
pub mod workload;

pub use job::{BacklogError, BacklogSource, FALLBACK_BACKLOG, Job, parse_backlog};
pub use workload::{WorkReport, Workload};

use crate::metrics::MetricState;
use crate::queue::{MessageQueue, QueueError, ReceivedMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Consumer configuration
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub job_duration: Duration,
    pub workload: Workload,
    pub pull_retry: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            job_duration: Duration::from_secs(90),
            workload: Workload::default(),
            pull_retry: Duration::from_secs(1),
        }
    }
}

/// Counters reported when the receive loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerSummary {
    pub processed: u64,
    pub fallbacks: u64,
    pub ack_failures: u64,
}

/// Result of handling a single message
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub backlog: f64,
    pub used_fallback: bool,
    pub acked: bool,
}

/// Strictly sequential consumer of one subscription
pub struct Consumer<Q> {
    queue: Q,
    state: Arc<MetricState>,
    config: ConsumerConfig,
}

impl<Q: MessageQueue> Consumer<Q> {
    pub fn new(queue: Q, state: Arc<MetricState>, config: ConsumerConfig) -> Self {
        Self {
            queue,
            state,
            config,
        }
    }

    /// Receive loop; runs until `cancel` fires or the queue fails permanently
    ///
    /// Cancellation is observed only while waiting for the next message: a
    /// job already in progress runs to completion and is acknowledged, and
    /// no further message is fetched.
    pub async fn run(&self, cancel: CancellationToken) -> Result<ConsumerSummary, QueueError> {
        let mut summary = ConsumerSummary::default();

        info!(
            job_duration_secs = self.config.job_duration.as_secs_f64(),
            "Consumer started"
        );

        loop {
            let pulled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                pulled = self.queue.pull() => pulled,
            };

            match pulled {
                Ok(message) => {
                    let outcome = self.handle(message).await;
                    summary.processed += 1;
                    summary.fallbacks += u64::from(outcome.used_fallback);
                    summary.ack_failures += u64::from(!outcome.acked);
                }
                Err(e) if e.is_transient() => {
                    warn!(error = %e, retry_ms = self.config.pull_retry.as_millis() as u64, "Pull failed, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.pull_retry) => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, "Pull failed permanently");
                    return Err(e);
                }
            }
        }

        info!(
            processed = summary.processed,
            fallbacks = summary.fallbacks,
            ack_failures = summary.ack_failures,
            "Consumer stopped"
        );
        Ok(summary)
    }

    /// Process one message end to end: ingest, work, ack
    ///
    /// Never fails: a bad backlog attribute falls back to
    /// [`FALLBACK_BACKLOG`] and an ack error is logged.
    pub async fn handle(&self, message: ReceivedMessage) -> Outcome {
        let job = Job::from_message(&message, self.config.job_duration);

        info!(
            message_id = %job.message_id,
            delivery_attempt = job.delivery_attempt,
            "Received message"
        );

        if let BacklogSource::Fallback(reason) = &job.backlog_source {
            warn!(
                message_id = %job.message_id,
                reason = %reason,
                fallback = FALLBACK_BACKLOG,
                "numJobs attribute missing or invalid"
            );
        }

        // Publish the pre-drain depth before this worker starts consuming it.
        self.state.ingest(job.backlog_hint);
        info!(num_jobs = job.backlog_hint, "Set numJobs metric");

        info!(duration_secs = job.simulated_duration.as_secs_f64(), "Starting work");
        let report = self.config.workload.run(job.simulated_duration).await;
        debug!(bursts = report.bursts, elapsed_ms = report.elapsed.as_millis() as u64, "Work finished");

        let acked = match self.queue.ack(&message.ack_id).await {
            Ok(()) => {
                info!(message_id = %job.message_id, "Message acknowledged");
                true
            }
            Err(e) => {
                warn!(message_id = %job.message_id, error = %e, "Failed to acknowledge message");
                false
            }
        };

        Outcome {
            backlog: job.backlog_hint,
            used_fallback: job.used_fallback(),
            acked,
        }
    }
}
