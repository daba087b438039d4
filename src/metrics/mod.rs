//! Backlog gauge state and its staleness decay
//!
//! `MetricState` is the single source of truth for the exported `numJobs`
//! gauge. The consumer writes it on every message, the decay task zeroes it
//! once no message has arrived for `stale_after`, and the exporter reads it.

mod decay;
mod state;

pub use decay::spawn_decay_task;
pub use state::{DecayOutcome, GAUGE_NAME, MetricSnapshot, MetricState};
