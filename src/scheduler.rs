// src/scheduler.rs
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge};
use tokio_util::sync::CancellationToken;

use crate::metrics::describe_pipeline_metrics;
use crate::supervisor::sleep_or_cancelled;

/// One iteration of a background loop.
///
/// Implementations check `cancel` between their own steps and return early
/// with whatever they managed; they never abandon a write half-way.
#[async_trait]
pub trait PollingJob: Send {
    type Report: Debug + Send;

    fn name(&self) -> &'static str;

    /// Sleep between the end of one cycle and the start of the next.
    fn interval(&self) -> Duration;

    async fn run_cycle(&mut self, cancel: &CancellationToken) -> Self::Report;
}

/// Run `job` until cancelled: cycle, sleep the interval, repeat. The first
/// cycle starts immediately. Hands the job back once stopped.
pub async fn run_forever<J: PollingJob>(mut job: J, cancel: CancellationToken) -> J {
    describe_pipeline_metrics();
    let name = job.name();
    tracing::info!(target: "pipeline", job = name, interval_secs = job.interval().as_secs(), "loop started");

    while !cancel.is_cancelled() {
        let report = job.run_cycle(&cancel).await;

        let now = chrono::Utc::now().timestamp().max(0) as f64;
        counter!("pipeline_cycles_total", "loop" => name).increment(1);
        gauge!("pipeline_last_cycle_ts", "loop" => name).set(now);
        tracing::info!(target: "pipeline", job = name, ?report, "cycle finished");

        if !sleep_or_cancelled(job.interval(), &cancel).await {
            break;
        }
    }

    tracing::info!(target: "pipeline", job = name, "loop cancelled");
    job
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    struct Counting {
        cycles: u32,
        stamps: Vec<Instant>,
        stop_after: u32,
        stopper: CancellationToken,
    }

    #[async_trait]
    impl PollingJob for Counting {
        type Report = u32;
        fn name(&self) -> &'static str {
            "counting"
        }
        fn interval(&self) -> Duration {
            Duration::from_secs(900)
        }
        async fn run_cycle(&mut self, _cancel: &CancellationToken) -> u32 {
            self.cycles += 1;
            self.stamps.push(Instant::now());
            if self.cycles == self.stop_after {
                self.stopper.cancel();
            }
            self.cycles
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cycles_are_separated_by_the_interval() {
        let token = CancellationToken::new();
        let job = Counting {
            cycles: 0,
            stamps: Vec::new(),
            stop_after: 4,
            stopper: token.clone(),
        };
        let t0 = Instant::now();
        let job = run_forever(job, token).await;
        assert_eq!(job.cycles, 4);
        for (i, at) in job.stamps.iter().enumerate() {
            assert_eq!(at.duration_since(t0), Duration::from_secs(900 * i as u64));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_forever_exits_on_cancel() {
        let token = CancellationToken::new();
        let job = Counting {
            cycles: 0,
            stamps: Vec::new(),
            stop_after: 3,
            stopper: token.clone(),
        };
        let handle = tokio::spawn(run_forever(job, token.clone()));
        tokio::time::timeout(Duration::from_secs(10_000), handle)
            .await
            .expect("loop should stop after its third cycle")
            .unwrap();
    }
}
