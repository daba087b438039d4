use jobgauge::config::Config;
use jobgauge::exporter::{self, ExporterState};
use jobgauge::metrics::{MetricState, spawn_decay_task};
use jobgauge::publisher::{self, Scenario};
use jobgauge::queue::{PubSubClient, PubSubSettings};
use jobgauge::worker::{Consumer, ConsumerConfig, Workload};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::Target;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Run the worker: exporter, decay task and consumer loop until a shutdown
/// signal arrives
pub async fn run_worker() -> Result<(), AnyError> {
    info!("Starting worker");
    let config = Config::load().map_err(|e| format!("Failed to load config: {e}"))?;

    info!(
        subscription = %config.subscription_id,
        job_duration_secs = config.job_duration_sec,
        metric_timeout_secs = config.metric_timeout_sec,
        "Configuration loaded"
    );

    let cancel = CancellationToken::new();
    let state = Arc::new(MetricState::new(config.metric_timeout())?);

    let listener = TcpListener::bind(config.metrics_addr)
        .await
        .map_err(|e| format!("Failed to bind metrics server on {}: {e}", config.metrics_addr))?;
    let exporter = tokio::spawn(exporter::serve(
        listener,
        ExporterState::new(state.clone())?,
        cancel.clone(),
    ));

    let decay = spawn_decay_task(state.clone(), config.decay_interval(), cancel.clone());

    let settings = PubSubSettings::new(&config.project_id)
        .with_emulator_host(config.pubsub_emulator_host.clone());
    let client =
        PubSubClient::new(settings).map_err(|e| format!("Failed to create pubsub client: {e}"))?;
    let subscription = client
        .subscription(&config.subscription_id)
        .await
        .map_err(|e| format!("Failed to open subscription '{}': {e}", config.subscription_id))?;

    if let Some(deadline) = subscription.ack_deadline() {
        if deadline <= config.job_duration() {
            warn!(
                ack_deadline_secs = deadline.as_secs(),
                job_duration_secs = config.job_duration_sec,
                "Subscription ack deadline does not exceed job duration; jobs may be redelivered while still running"
            );
        }
    }

    tokio::spawn(cancel_on_signal(cancel.clone()));

    let consumer = Consumer::new(
        subscription,
        state,
        ConsumerConfig {
            job_duration: config.job_duration(),
            workload: Workload {
                burst_iterations: config.work_burst_iterations,
                rest: config.work_rest(),
            },
            pull_retry: config.pull_retry(),
        },
    );

    info!(subscription = %config.subscription_id, "Listening to subscription");
    let result = consumer.run(cancel.clone()).await;

    cancel.cancel();
    decay.await?;
    exporter.await??;

    result?;
    info!("Worker stopped");
    Ok(())
}

fn publisher_client(target: &Target) -> Result<PubSubClient, AnyError> {
    let settings =
        PubSubSettings::new(&target.project).with_emulator_host(target.emulator_host.clone());
    Ok(PubSubClient::new(settings).map_err(|e| format!("Failed to create pubsub client: {e}"))?)
}

pub async fn run_publish(target: Target, count: u32, duration_sec: u64) -> Result<(), AnyError> {
    let client = publisher_client(&target)?;
    publisher::publish_batch(&client, &target.topic, count, duration_sec).await?;
    Ok(())
}

pub async fn run_purge(target: Target) -> Result<(), AnyError> {
    let client = publisher_client(&target)?;
    publisher::purge(&client, &target.subscription).await?;
    Ok(())
}

pub async fn run_auto(target: Target) -> Result<(), AnyError> {
    let client = publisher_client(&target)?;
    publisher::run_scenario(&client, &target.topic, &Scenario::reference()).await?;
    Ok(())
}

async fn cancel_on_signal(cancel: CancellationToken) {
    tokio::select! {
        _ = shutdown_signal() => cancel.cancel(),
        _ = cancel.cancelled() => {}
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, finishing in-flight job");
}
