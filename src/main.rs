mod app;
mod cli;

use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    jobgauge::observability::init(cli.log_format);

    let result = match cli.command {
        Commands::Worker => app::run_worker().await,
        Commands::Publish {
            target,
            count,
            duration_sec,
        } => app::run_publish(target, count, duration_sec).await,
        Commands::Purge { target } => app::run_purge(target).await,
        Commands::Auto { target } => app::run_auto(target).await,
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Exiting with error");
    }
    result
}
