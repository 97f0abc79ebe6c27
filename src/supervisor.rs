// src/supervisor.rs
//! Owns the background loops: spawns them, cancels them, joins them.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Sleep for `d` unless cancelled. Returns `true` when the full sleep elapsed.
pub async fn sleep_or_cancelled(d: Duration, cancel: &CancellationToken) -> bool {
    sleep_until_or_cancelled(Instant::now() + d, cancel).await
}

pub async fn sleep_until_or_cancelled(at: Instant, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep_until(at) => true,
    }
}

/// Per-task outcome of [`Supervisor::shutdown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskExit {
    pub name: &'static str,
    pub clean: bool,
}

pub struct Supervisor {
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Spawn a task that receives its own child token.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let fut = task(self.cancel.child_token());
        let handle = tokio::spawn(async move {
            fut.await;
            info!(task = name, "task stopped");
        });
        info!(task = name, "task started");
        self.tasks.push((name, handle));
    }

    /// Cancel every task and wait for each to unwind on its own.
    ///
    /// Tasks are never aborted: a task still running after `grace` is logged
    /// and waited for, so no write is cut short.
    pub async fn shutdown(self, grace: Duration) -> Vec<TaskExit> {
        info!(tasks = self.tasks.len(), "shutting down pipeline");
        self.cancel.cancel();

        let mut exits = Vec::with_capacity(self.tasks.len());
        for (name, mut handle) in self.tasks {
            let joined = match tokio::time::timeout(grace, &mut handle).await {
                Ok(res) => res,
                Err(_) => {
                    warn!(task = name, grace_secs = grace.as_secs(), "task still unwinding after grace period");
                    handle.await
                }
            };
            let clean = match joined {
                Ok(()) => true,
                Err(e) => {
                    error!(task = name, error = %e, "task ended abnormally");
                    false
                }
            };
            exits.push(TaskExit { name, clean });
        }
        exits
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn sleep_is_cut_short_by_cancel() {
        let token = CancellationToken::new();
        let t = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            t.cancel();
        });
        let t0 = Instant::now();
        assert!(!sleep_or_cancelled(Duration::from_secs(900), &token).await);
        assert!(t0.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_in_flight_step() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut sup = Supervisor::new();
        let f = finished.clone();
        sup.spawn("worker", move |cancel| async move {
            cancel.cancelled().await;
            // simulated step that must complete after the signal
            tokio::time::sleep(Duration::from_secs(3)).await;
            f.store(true, Ordering::SeqCst);
        });

        let exits = sup.shutdown(Duration::from_secs(1)).await;
        assert_eq!(
            exits,
            vec![TaskExit {
                name: "worker",
                clean: true
            }]
        );
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panicking_task_reported_unclean() {
        let mut sup = Supervisor::new();
        sup.spawn("bad", |_cancel| async move {
            panic!("boom");
        });
        let exits = sup.shutdown(Duration::from_secs(1)).await;
        assert!(!exits[0].clean);
    }
}
