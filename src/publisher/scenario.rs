use super::{Result, publish_batch, publish_done};
use crate::queue::TopicPublisher;
use std::time::Duration;
use tracing::info;

/// One batch of jobs followed by a pause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Burst {
    pub jobs: u32,
    pub job_duration_secs: u64,
    pub pause: Duration,
}

/// Scripted sequence of bursts, optionally ending with a DONE message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub bursts: Vec<Burst>,
    pub finish_with_done: bool,
}

impl Scenario {
    /// Demo sequence: a load, a dip, a spike, a tail, then DONE
    pub fn reference() -> Self {
        let burst = |jobs: u32, pause_mins: u64| Burst {
            jobs,
            job_duration_secs: 90,
            pause: Duration::from_secs(pause_mins * 60),
        };

        Self {
            bursts: vec![burst(9, 2), burst(3, 1), burst(15, 3), burst(7, 3)],
            finish_with_done: true,
        }
    }

    pub fn total_jobs(&self) -> u32 {
        self.bursts.iter().map(|b| b.jobs).sum()
    }
}

/// Publish every burst of `scenario`, sleeping between them
pub async fn run_scenario<P: TopicPublisher + ?Sized>(
    publisher: &P,
    topic: &str,
    scenario: &Scenario,
) -> Result<()> {
    info!(bursts = scenario.bursts.len(), total_jobs = scenario.total_jobs(), "Starting auto mode");

    for (index, burst) in scenario.bursts.iter().enumerate() {
        info!(scenario = index + 1, jobs = burst.jobs, "Publishing burst");
        publish_batch(publisher, topic, burst.jobs, burst.job_duration_secs).await?;

        info!(wait_secs = burst.pause.as_secs(), "Waiting before next burst");
        tokio::time::sleep(burst.pause).await;
    }

    if scenario.finish_with_done {
        info!("Publishing done signal (0 jobs)");
        publish_done(publisher, topic).await?;
    }

    info!("Auto mode finished");
    Ok(())
}
