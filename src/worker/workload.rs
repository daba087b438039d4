//! Simulated long-running, low-CPU work
//!
//! A job alternates short bursts of arithmetic with sleeps, so CPU usage
//! stays low while the job holds the worker for its full duration. This is
//! the load profile a CPU-based autoscaler fails to react to.

use std::hint::black_box;
use std::time::Duration;
use tokio::time::Instant;

/// Shape of the simulated work
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Workload {
    /// Square roots computed per burst
    pub burst_iterations: u64,
    /// Sleep between bursts
    pub rest: Duration,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            burst_iterations: 1_000_000,
            rest: Duration::from_millis(50),
        }
    }
}

/// What a finished run did
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkReport {
    pub bursts: u64,
    pub elapsed: Duration,
}

impl Workload {
    /// Work for `duration`, then return
    ///
    /// The last sleep is clamped to the remaining time, so the run overshoots
    /// `duration` by at most one burst.
    pub async fn run(&self, duration: Duration) -> WorkReport {
        let started = Instant::now();
        let deadline = started + duration;
        let mut bursts = 0;

        while Instant::now() < deadline {
            burn(self.burst_iterations);
            bursts += 1;

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(self.rest.min(remaining)).await;
        }

        WorkReport {
            bursts,
            elapsed: started.elapsed(),
        }
    }
}

fn burn(iterations: u64) -> f64 {
    (0..iterations).fold(0.0, |acc, i| acc + black_box((i as f64).sqrt()))
}
