use super::state::{DecayOutcome, MetricState};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Spawn the periodic staleness check
///
/// The first check fires one `every` after spawning. The task exits as soon
/// as `cancel` fires; no lock is held across an await point.
pub fn spawn_decay_task(
    state: Arc<MetricState>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = every.as_secs_f64(),
            stale_after_secs = state.stale_after().as_secs_f64(),
            "Metric decay task started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let DecayOutcome::Expired { was } = state.decay_check(Instant::now()) {
                        info!(
                            previous = was,
                            "No jobs received in timeout period, numJobs set to 0"
                        );
                    }
                }
            }
        }

        debug!("Metric decay task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_decay_task_zeroes_stale_value() {
        let state = Arc::new(MetricState::new(Duration::from_secs(120)).unwrap());
        let cancel = CancellationToken::new();
        let handle = spawn_decay_task(state.clone(), Duration::from_secs(10), cancel.clone());

        state.ingest(9.0);

        tokio::time::sleep(Duration::from_secs(115)).await;
        assert_eq!(state.read_current(), 9.0);

        // Ticks at 120s (not yet > timeout) and 130s (stale).
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(state.read_current(), 0.0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_decay_task_stops_on_cancel() {
        let state = Arc::new(MetricState::new(Duration::from_secs(1)).unwrap());
        let cancel = CancellationToken::new();
        let handle = spawn_decay_task(state.clone(), Duration::from_secs(10), cancel.clone());

        cancel.cancel();
        handle.await.unwrap();

        // Nothing left running: a late ingest survives any amount of time.
        state.ingest(5.0);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(state.read_current(), 5.0);
    }
}
