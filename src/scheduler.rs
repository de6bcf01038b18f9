use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

struct TimerHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns one recurring notification timer per driver currently in the alert
/// state. At most one timer exists per driver; `start` on an active driver is
/// a no-op and `stop` on an idle driver is a no-op.
pub struct ReNotifyScheduler {
    interval: Duration,
    timers: Mutex<HashMap<String, TimerHandle>>,
}

impl ReNotifyScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Spawns the periodic timer task for a driver. The first tick fires one
    /// full interval after start; the immediate notification on entering the
    /// alert state is the dispatcher's responsibility.
    pub fn start<F, Fut>(&self, driver_id: &str, on_tick: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut timers = self.timers.lock();
        if timers.contains_key(driver_id) {
            debug!(driver_id, "re-notification timer already active");
            return;
        }

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let period = self.interval;
        let task_driver_id = driver_id.to_string();
        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            // A tick whose send overruns the period delays the next tick
            // instead of bursting.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => on_tick().await,
                }
            }
            debug!(driver_id = %task_driver_id, "re-notification timer exited");
        });

        info!(driver_id, "started re-notification timer");
        timers.insert(driver_id.to_string(), TimerHandle { stop_tx, task });
    }

    /// Cancels the timer for a driver if one is active. A tick already in
    /// flight completes its send; no new tick starts after this returns.
    pub fn stop(&self, driver_id: &str) {
        let handle = self.timers.lock().remove(driver_id);
        if let Some(handle) = handle {
            let _ = handle.stop_tx.send(());
            info!(driver_id, "stopped re-notification timer");
        }
    }

    /// Cancels every active timer and waits up to `grace` for the timer tasks
    /// (including any in-flight sends) to finish. Stragglers are aborted, so
    /// no notification attempt survives this call.
    pub async fn stop_all(&self, grace: Duration) {
        let handles: Vec<TimerHandle> = {
            let mut timers = self.timers.lock();
            timers.drain().map(|(_, handle)| handle).collect()
        };
        if handles.is_empty() {
            return;
        }
        info!(count = handles.len(), "cancelling all re-notification timers");

        let mut tasks = Vec::with_capacity(handles.len());
        for handle in handles {
            let _ = handle.stop_tx.send(());
            tasks.push(handle.task);
        }

        let abort_handles: Vec<_> = tasks.iter().map(|task| task.abort_handle()).collect();
        if time::timeout(grace, join_all(tasks)).await.is_err() {
            warn!("timer tasks did not finish within grace period, aborting");
            for abort in abort_handles {
                abort.abort();
            }
        }
    }

    pub fn is_active(&self, driver_id: &str) -> bool {
        self.timers.lock().contains_key(driver_id)
    }

    pub fn active_count(&self) -> usize {
        self.timers.lock().len()
    }
}
