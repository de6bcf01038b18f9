use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::db::DeviceTokenStore;
use crate::models::alert_event::{AlertEvent, DriverStatus};
use crate::notification::{NotificationPayload, WebhookNotifier};
use crate::scheduler::ReNotifyScheduler;
use crate::store::AlertStateStore;

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub alert_interval: Duration,
    pub min_notify_interval: Duration,
    pub confidence_threshold: f64,
    pub shutdown_grace: Duration,
}

/// Rate-limited send path shared by the immediate notification and every
/// scheduled tick.
struct SendPipeline {
    store: AlertStateStore,
    notifier: WebhookNotifier,
    tokens: Option<DeviceTokenStore>,
    min_notify_interval: Duration,
}

impl SendPipeline {
    async fn notify(&self, driver_id: &str) {
        if !self.store.try_claim_send(driver_id, self.min_notify_interval) {
            debug!(driver_id, "notification suppressed by minimum interval");
            return;
        }

        let device_token = match &self.tokens {
            Some(tokens) => match tokens.device_token(driver_id).await {
                Ok(token) => Some(token),
                Err(e) => {
                    warn!(driver_id, error = %e, "abandoning notification attempt");
                    return;
                }
            },
            None => None,
        };

        let (confidence, location) = self.store.context(driver_id);
        let payload =
            NotificationPayload::sleeping(driver_id, confidence, location.as_deref(), device_token);

        // A failed delivery is logged and dropped; the claimed send slot is
        // not rolled back and the timer keeps running.
        if let Err(e) = self.notifier.deliver(&payload).await {
            warn!(driver_id, error = %e, "notification delivery failed");
        }
    }
}

/// Applies the alert-lifecycle state machine to incoming events and drives
/// the scheduler and the send pipeline. Events are handled inline on the
/// consumption task; deliveries run in spawned tasks so a slow endpoint never
/// stalls consumption.
pub struct Dispatcher {
    pipeline: Arc<SendPipeline>,
    scheduler: ReNotifyScheduler,
    confidence_threshold: f64,
    shutdown_grace: Duration,
    inflight: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(
        notifier: WebhookNotifier,
        tokens: Option<DeviceTokenStore>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            pipeline: Arc::new(SendPipeline {
                store: AlertStateStore::new(),
                notifier,
                tokens,
                min_notify_interval: settings.min_notify_interval,
            }),
            scheduler: ReNotifyScheduler::new(settings.alert_interval),
            confidence_threshold: settings.confidence_threshold,
            shutdown_grace: settings.shutdown_grace,
            inflight: Mutex::new(Vec::new()),
        }
    }

    pub fn handle_event(&self, event: &AlertEvent) {
        let Some(status) = event.effective_status(self.confidence_threshold) else {
            warn!(driver_id = %event.driver_id, "event carries neither status nor confidence, dropped");
            return;
        };

        match status {
            DriverStatus::Sleeping => self.on_sleeping(event),
            DriverStatus::Normal => self.on_normal(event),
        }
    }

    fn on_sleeping(&self, event: &AlertEvent) {
        // Re-notifications resend the latest observation, so the context is
        // refreshed even when the status itself does not change.
        self.pipeline
            .store
            .update_context(&event.driver_id, event.confidence, event.location.as_deref());

        let transition = self
            .pipeline
            .store
            .transition(&event.driver_id, DriverStatus::Sleeping);
        if !transition.changed {
            debug!(driver_id = %event.driver_id, "duplicate sleeping signal ignored");
            return;
        }

        info!(
            driver_id = %event.driver_id,
            event_id = ?event.id,
            confidence = ?event.confidence,
            observed_at = %event.observed_at_or_now(),
            "driver entered sleeping state"
        );

        self.spawn_send(event.driver_id.clone());

        let pipeline = Arc::clone(&self.pipeline);
        let driver_id = event.driver_id.clone();
        self.scheduler.start(&event.driver_id, move || {
            let pipeline = Arc::clone(&pipeline);
            let driver_id = driver_id.clone();
            async move { pipeline.notify(&driver_id).await }
        });
    }

    fn on_normal(&self, event: &AlertEvent) {
        let transition = self
            .pipeline
            .store
            .transition(&event.driver_id, DriverStatus::Normal);
        if !transition.changed {
            debug!(driver_id = %event.driver_id, status = ?transition.previous, "driver already in normal state");
            return;
        }

        info!(driver_id = %event.driver_id, "driver recovered");
        self.scheduler.stop(&event.driver_id);
    }

    fn spawn_send(&self, driver_id: String) {
        let pipeline = Arc::clone(&self.pipeline);
        let mut inflight = self.inflight.lock();
        inflight.retain(|handle| !handle.is_finished());
        inflight.push(tokio::spawn(async move {
            pipeline.notify(&driver_id).await;
        }));
    }

    /// Cancels every timer and waits, bounded by the configured grace period,
    /// for in-flight deliveries. No notification is attempted after this
    /// returns.
    pub async fn shutdown(&self) {
        info!(
            active_timers = self.scheduler.active_count(),
            "shutting down dispatcher"
        );
        self.scheduler.stop_all(self.shutdown_grace).await;

        let handles: Vec<JoinHandle<()>> = {
            let mut inflight = self.inflight.lock();
            inflight.drain(..).collect()
        };
        if handles.is_empty() {
            return;
        }

        let abort_handles: Vec<_> = handles.iter().map(|handle| handle.abort_handle()).collect();
        if time::timeout(self.shutdown_grace, join_all(handles))
            .await
            .is_err()
        {
            warn!("in-flight notifications did not finish within grace period, aborting");
            for abort in abort_handles {
                abort.abort();
            }
        }
    }

    pub fn driver_status(&self, driver_id: &str) -> DriverStatus {
        self.pipeline.store.status(driver_id)
    }

    pub fn active_timers(&self) -> usize {
        self.scheduler.active_count()
    }
}
