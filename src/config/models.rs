use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Worker configuration
///
/// Keys map one-to-one to unprefixed environment variables
/// (`JOB_DURATION_SEC` -> `job_duration_sec`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Google Cloud project hosting the subscription (required)
    #[serde(default)]
    pub project_id: String,
    /// Subscription to consume (required)
    #[serde(default)]
    pub subscription_id: String,
    /// Wall-clock duration of one simulated job
    #[serde(default = "default_job_duration_sec")]
    pub job_duration_sec: u64,
    /// Seconds without a message after which `numJobs` decays to zero
    #[serde(default = "default_metric_timeout_sec")]
    pub metric_timeout_sec: u64,
    #[serde(default = "default_decay_interval_sec")]
    pub decay_interval_sec: u64,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: SocketAddr,
    /// Square roots computed per CPU burst during simulated work
    #[serde(default = "default_work_burst_iterations")]
    pub work_burst_iterations: u64,
    /// Sleep between CPU bursts
    #[serde(default = "default_work_rest_ms")]
    pub work_rest_ms: u64,
    /// Backoff after a transient pull failure
    #[serde(default = "default_pull_retry_ms")]
    pub pull_retry_ms: u64,
    /// Pub/Sub emulator `host:port`; plain HTTP, no credentials
    #[serde(default)]
    pub pubsub_emulator_host: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            subscription_id: String::new(),
            job_duration_sec: default_job_duration_sec(),
            metric_timeout_sec: default_metric_timeout_sec(),
            decay_interval_sec: default_decay_interval_sec(),
            metrics_addr: default_metrics_addr(),
            work_burst_iterations: default_work_burst_iterations(),
            work_rest_ms: default_work_rest_ms(),
            pull_retry_ms: default_pull_retry_ms(),
            pubsub_emulator_host: None,
        }
    }
}

impl Config {
    pub fn job_duration(&self) -> Duration {
        Duration::from_secs(self.job_duration_sec)
    }

    pub fn metric_timeout(&self) -> Duration {
        Duration::from_secs(self.metric_timeout_sec)
    }

    pub fn decay_interval(&self) -> Duration {
        Duration::from_secs(self.decay_interval_sec)
    }

    pub fn work_rest(&self) -> Duration {
        Duration::from_millis(self.work_rest_ms)
    }

    pub fn pull_retry(&self) -> Duration {
        Duration::from_millis(self.pull_retry_ms)
    }
}

fn default_job_duration_sec() -> u64 {
    90
}

fn default_metric_timeout_sec() -> u64 {
    120
}

fn default_decay_interval_sec() -> u64 {
    10
}

fn default_metrics_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_work_burst_iterations() -> u64 {
    1_000_000
}

fn default_work_rest_ms() -> u64 {
    50
}

fn default_pull_retry_ms() -> u64 {
    1000
}
