use prometheus::{Gauge, Opts};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Name of the exported gauge, as the autoscaler's metric selector expects it
pub const GAUGE_NAME: &str = "numJobs";

const GAUGE_HELP: &str =
    "The number of pending jobs in the queue as reported by the last message.";

/// Value and timestamp of the last ingest. Always read and written together.
#[derive(Debug, Clone, Copy)]
struct Reading {
    value: f64,
    last_update: Instant,
}

/// Result of a single staleness check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecayOutcome {
    /// An ingest happened within `stale_after`; nothing changed
    Fresh,
    /// The value was non-zero and has just been reset to zero
    Expired { was: f64 },
    /// Already zero; the gauge was re-asserted
    Idle,
}

/// Point-in-time view of the gauge state, taken under one read lock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSnapshot {
    pub value: f64,
    pub since_update: Duration,
    pub stale: bool,
}

/// Shared backlog estimate backing the `numJobs` gauge
///
/// Writers (`ingest`, `decay_check`) take the write lock for the whole
/// update, including the gauge write, so a decay can never zero a value that
/// was ingested after its staleness comparison.
#[derive(Debug)]
pub struct MetricState {
    reading: RwLock<Reading>,
    stale_after: Duration,
    gauge: Gauge,
}

impl MetricState {
    /// Create the state with value `0` and `last_update = now`
    pub fn new(stale_after: Duration) -> Result<Self, prometheus::Error> {
        let gauge = Gauge::with_opts(Opts::new(GAUGE_NAME, GAUGE_HELP))?;
        gauge.set(0.0);

        Ok(Self {
            reading: RwLock::new(Reading {
                value: 0.0,
                last_update: Instant::now(),
            }),
            stale_after,
            gauge,
        })
    }

    /// Record a freshly observed backlog size
    pub fn ingest(&self, value: f64) {
        self.ingest_at(value, Instant::now());
    }

    pub(crate) fn ingest_at(&self, value: f64, now: Instant) {
        debug_assert!(value >= 0.0, "backlog values are clamped by the caller");

        let mut reading = self.reading.write().unwrap_or_else(PoisonError::into_inner);
        reading.value = value;
        reading.last_update = now;
        self.gauge.set(value);
    }

    /// Current backlog estimate
    pub fn read_current(&self) -> f64 {
        self.reading
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .value
    }

    pub fn snapshot(&self) -> MetricSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub(crate) fn snapshot_at(&self, now: Instant) -> MetricSnapshot {
        let reading = *self.reading.read().unwrap_or_else(PoisonError::into_inner);
        let since_update = now.saturating_duration_since(reading.last_update);

        MetricSnapshot {
            value: reading.value,
            since_update,
            stale: since_update > self.stale_after,
        }
    }

    /// Zero the value if nothing was ingested for longer than `stale_after`
    ///
    /// `last_update` is left untouched, so once expired every further check
    /// reports `Idle` until the next ingest.
    pub fn decay_check(&self, now: Instant) -> DecayOutcome {
        let mut reading = self.reading.write().unwrap_or_else(PoisonError::into_inner);

        if now.saturating_duration_since(reading.last_update) <= self.stale_after {
            return DecayOutcome::Fresh;
        }

        let was = reading.value;
        reading.value = 0.0;
        self.gauge.set(0.0);

        if was > 0.0 {
            DecayOutcome::Expired { was }
        } else {
            debug!("numJobs already zero, re-asserted");
            DecayOutcome::Idle
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Handle to the gauge for registration with an exporter registry
    pub fn gauge(&self) -> Gauge {
        self.gauge.clone()
    }
}
