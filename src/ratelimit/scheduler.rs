//! Periodic background task with an explicit lifecycle.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{RatekeeperError, Result};

/// Default time `shutdown` waits for the task before aborting it.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Runs a callback every `period` on the tokio runtime until shut down.
///
/// The first tick fires one full period after spawning. Dropping the
/// scheduler without calling [`shutdown`](Self::shutdown) aborts the task.
#[derive(Debug)]
pub struct ResetScheduler {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl ResetScheduler {
    /// Spawn the periodic task on the current tokio runtime.
    pub fn spawn<F>(name: &'static str, period: Duration, mut on_tick: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RatekeeperError::Runtime(format!("{} needs a tokio runtime: {}", name, e)))?;

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let handle = runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        on_tick();
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!(scheduler = name, "Scheduler loop exited");
        });

        info!(scheduler = name, period_ms = period.as_millis() as u64, "Scheduler started");
        Ok(Self {
            name,
            stop_tx,
            handle: Some(handle),
        })
    }

    /// Stop the task, waiting up to `grace` before aborting it.
    ///
    /// Returns `true` if the task exited on its own within `grace`.
    pub async fn shutdown(mut self, grace: Duration) -> bool {
        let Some(mut handle) = self.handle.take() else {
            return true;
        };

        let _ = self.stop_tx.send(true);
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(_) => {
                info!(scheduler = self.name, "Scheduler stopped");
                true
            }
            Err(_) => {
                warn!(
                    scheduler = self.name,
                    grace_ms = grace.as_millis() as u64,
                    "Scheduler did not stop in time, aborting"
                );
                handle.abort();
                false
            }
        }
    }
}

impl Drop for ResetScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
