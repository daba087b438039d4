//! Conversion of a received message into a unit of work

use crate::queue::{BACKLOG_ATTRIBUTE, ReceivedMessage};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Backlog assumed when a message carries no usable `numJobs` attribute:
/// at least this job is pending.
pub const FALLBACK_BACKLOG: f64 = 1.0;

/// Why a message's backlog attribute could not be used
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BacklogError {
    #[error("attribute 'numJobs' missing")]
    Missing,

    #[error("attribute 'numJobs' is not a number: {0:?}")]
    NotANumber(String),

    #[error("attribute 'numJobs' is negative: {0}")]
    Negative(f64),

    #[error("attribute 'numJobs' is not finite: {0}")]
    NotFinite(f64),
}

/// Parse the backlog attribute as a non-negative finite number
pub fn parse_backlog(attributes: &HashMap<String, String>) -> Result<f64, BacklogError> {
    let raw = attributes.get(BACKLOG_ATTRIBUTE).ok_or(BacklogError::Missing)?;
    let value: f64 = raw
        .parse()
        .map_err(|_| BacklogError::NotANumber(raw.clone()))?;

    if !value.is_finite() {
        return Err(BacklogError::NotFinite(value));
    }
    if value < 0.0 {
        return Err(BacklogError::Negative(value));
    }
    // "-0" would otherwise be exported as -0
    if value == 0.0 {
        return Ok(0.0);
    }
    Ok(value)
}

/// Where a job's backlog hint came from
#[derive(Debug, Clone, PartialEq)]
pub enum BacklogSource {
    Attribute,
    Fallback(BacklogError),
}

/// One consumed message, ready to be worked on
#[derive(Debug, Clone)]
pub struct Job {
    pub message_id: String,
    pub backlog_hint: f64,
    pub backlog_source: BacklogSource,
    pub simulated_duration: Duration,
    pub delivery_attempt: Option<u32>,
}

impl Job {
    /// Build a job; an unusable backlog attribute falls back to
    /// [`FALLBACK_BACKLOG`] instead of failing
    pub fn from_message(message: &ReceivedMessage, simulated_duration: Duration) -> Self {
        let (backlog_hint, backlog_source) = match parse_backlog(&message.attributes) {
            Ok(value) => (value, BacklogSource::Attribute),
            Err(reason) => (FALLBACK_BACKLOG, BacklogSource::Fallback(reason)),
        };

        Self {
            message_id: message.message_id.clone(),
            backlog_hint,
            backlog_source,
            simulated_duration,
            delivery_attempt: message.delivery_attempt,
        }
    }

    pub fn used_fallback(&self) -> bool {
        matches!(self.backlog_source, BacklogSource::Fallback(_))
    }
}
