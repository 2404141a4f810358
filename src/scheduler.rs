//! Periodic background tasks
//!
//! Checkpointing and retention sweeps run as named tasks on a fixed period.
//! All tasks share one cancellation token; shutdown cancels it and waits for
//! every task to return, so no tick runs after shutdown completes.

use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Owner of the engine's periodic tasks
#[derive(Debug, Default)]
pub struct TaskScheduler {
    cancel: CancellationToken,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl TaskScheduler {
    /// Create a scheduler with no tasks
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `tick` every `period`, starting one period from now
    ///
    /// Ticks never overlap; a tick that overruns delays the next one.
    pub async fn spawn_periodic<F, Fut>(&self, name: &'static str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            timer.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {
                        debug!(task = name, "Running scheduled task");
                        tick().await;
                    }
                }
            }
            debug!(task = name, "Scheduled task stopped");
        });

        info!(task = name, period_secs = period.as_secs_f64(), "Scheduled periodic task");
        self.tasks.lock().await.push((name, handle));
    }

    /// Number of tasks started and not yet shut down
    pub async fn task_count(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Cancel every task and wait for it to finish
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for (name, handle) in tasks {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "Scheduled task ended abnormally");
            }
        }
    }
}
