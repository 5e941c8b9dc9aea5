//! ---
//! simbus_section: "01-core-functionality"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Delayed and periodic task helper for simulation components."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Spawns tasks that run after a delay, once or periodically.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timer;

impl Timer {
    /// Run `task` once after `delay`.
    pub fn once<F, Fut>(delay: Duration, task: F) -> TimerHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = task().await {
                warn!(error = %format!("{err:#}"), "timer task failed");
            }
        });
        TimerHandle { task: handle }
    }

    /// Run `task` every `period`, first after one full period.
    ///
    /// A failing run is logged and the schedule continues.
    pub fn repeating<F, Fut>(period: Duration, mut task: F) -> TimerHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(err) = task().await {
                    warn!(error = %format!("{err:#}"), "periodic timer task failed");
                }
            }
        });
        TimerHandle { task: handle }
    }
}

/// Handle of a scheduled timer task.
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel the task and wait until it is gone. A run in progress is aborted.
    pub async fn cancel(self) {
        self.task.abort();
        match self.task.await {
            Ok(()) => debug!("timer finished before cancellation"),
            Err(err) if err.is_cancelled() => debug!("timer cancelled"),
            Err(err) => warn!(error = %err, "timer task panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn once_runs_after_the_delay() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let handle = Timer::once(Duration::from_secs(5), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), anyhow::Error>(())
        });

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!handle.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn repeating_runs_until_cancelled() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let handle = Timer::repeating(Duration::from_secs(1), move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("first run fails");
                }
                Ok::<(), anyhow::Error>(())
            }
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(handle.is_running());

        handle.cancel().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_once_never_runs() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let handle = Timer::once(Duration::from_secs(1), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), anyhow::Error>(())
        });
        handle.cancel().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
