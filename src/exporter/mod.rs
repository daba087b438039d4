//! Prometheus exporter for the `numJobs` gauge
//!
//! Serves `GET /metrics` in the Prometheus text exposition format and a small
//! JSON `GET /health`. The exporter only reads; it never takes the write
//! side of `MetricState`'s lock.

mod error;
mod server;
pub mod services;
pub mod state;

pub use error::ExporterError;
pub use server::{router, serve};
pub use state::ExporterState;
