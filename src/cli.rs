use clap::{Parser, Subcommand};
use jobgauge::observability::LogFormat;

#[derive(Parser, Debug)]
#[command(name = "jobgauge")]
#[command(about = "Queue worker exporting a jobs-in-queue gauge, plus a batch publisher", long_about = None)]
pub struct Cli {
    /// Log line format
    #[arg(long, global = true, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Consume the subscription and export numJobs (configured from the environment)
    ///
    /// The subscription's ack deadline must exceed JOB_DURATION_SEC, since
    /// leases are not extended while a job runs.
    Worker,
    /// Publish a batch of jobs tagged with numJobs=<count>
    Publish {
        #[command(flatten)]
        target: Target,
        /// Number of messages to publish
        count: u32,
        /// Work duration written into each message body, in seconds
        duration_sec: u64,
    },
    /// Reset the subscription cursor to now (redelivers, does not delete)
    Purge {
        #[command(flatten)]
        target: Target,
    },
    /// Run the scripted burst scenario, then send a DONE message
    Auto {
        #[command(flatten)]
        target: Target,
    },
}

#[derive(clap::Args, Debug)]
pub struct Target {
    /// Google Cloud project id
    pub project: String,
    /// Topic to publish to
    pub topic: String,
    /// Subscription the workers consume
    pub subscription: String,
    /// Pub/Sub emulator host:port
    #[arg(long, env = "PUBSUB_EMULATOR_HOST")]
    pub emulator_host: Option<String>,
}
