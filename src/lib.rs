pub mod config;
pub mod exporter;
pub mod metrics;
pub mod observability;
pub mod publisher;
pub mod queue;
pub mod worker;
