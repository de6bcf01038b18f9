use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::alert_event::DriverStatus;

/// Per-driver mutable state. Records are created lazily on the first event
/// for a driver; an unseen driver reads as `Normal`.
#[derive(Debug, Default)]
struct DriverRecord {
    status: DriverStatus,
    last_notified_at: Option<Instant>,
    confidence: Option<f64>,
    location: Option<String>,
}

/// Result of a status transition.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub changed: bool,
    pub previous: DriverStatus,
}

/// In-memory table of driver alert records. A single lock serializes all
/// mutations; critical sections never await, so conflicting operations on the
/// same driver cannot interleave.
#[derive(Default)]
pub struct AlertStateStore {
    records: Mutex<HashMap<String, DriverRecord>>,
}

impl AlertStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, driver_id: &str) -> DriverStatus {
        self.records
            .lock()
            .get(driver_id)
            .map(|record| record.status)
            .unwrap_or_default()
    }

    /// Atomically moves a driver to `new_status`. A repeated identical status
    /// is a no-op and reports `changed: false`.
    pub fn transition(&self, driver_id: &str, new_status: DriverStatus) -> Transition {
        let mut records = self.records.lock();
        let record = records.entry(driver_id.to_string()).or_default();
        let previous = record.status;
        if previous == new_status {
            return Transition {
                changed: false,
                previous,
            };
        }
        record.status = new_status;
        Transition {
            changed: true,
            previous,
        }
    }

    /// Records the latest informative fields for a driver so re-notifications
    /// carry the freshest observation rather than the triggering snapshot.
    pub fn update_context(&self, driver_id: &str, confidence: Option<f64>, location: Option<&str>) {
        let mut records = self.records.lock();
        let record = records.entry(driver_id.to_string()).or_default();
        if confidence.is_some() {
            record.confidence = confidence;
        }
        if let Some(location) = location {
            record.location = Some(location.to_string());
        }
    }

    pub fn context(&self, driver_id: &str) -> (Option<f64>, Option<String>) {
        self.records
            .lock()
            .get(driver_id)
            .map(|record| (record.confidence, record.location.clone()))
            .unwrap_or((None, None))
    }

    /// Rate-limit gate shared by immediate and scheduled sends. Passing the
    /// check updates `last_notified_at` in the same critical section, so two
    /// overlapping attempts for one driver can never both pass.
    pub fn try_claim_send(&self, driver_id: &str, min_interval: Duration) -> bool {
        let mut records = self.records.lock();
        let record = records.entry(driver_id.to_string()).or_default();
        if let Some(last) = record.last_notified_at {
            if last.elapsed() < min_interval {
                return false;
            }
        }
        record.last_notified_at = Some(Instant::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unseen_driver_defaults_to_normal() {
        let store = AlertStateStore::new();
        assert_eq!(store.status("ghost"), DriverStatus::Normal);
    }

    #[test]
    fn test_transition_into_sleeping() {
        let store = AlertStateStore::new();
        let t = store.transition("d1", DriverStatus::Sleeping);
        assert!(t.changed);
        assert_eq!(t.previous, DriverStatus::Normal);
        assert_eq!(store.status("d1"), DriverStatus::Sleeping);
    }

    #[test]
    fn test_repeated_status_is_noop() {
        let store = AlertStateStore::new();
        assert!(store.transition("d1", DriverStatus::Sleeping).changed);
        let t = store.transition("d1", DriverStatus::Sleeping);
        assert!(!t.changed);
        assert_eq!(t.previous, DriverStatus::Sleeping);
    }

    #[test]
    fn test_normal_for_unseen_driver_is_not_a_change() {
        let store = AlertStateStore::new();
        let t = store.transition("d1", DriverStatus::Normal);
        assert!(!t.changed);
        assert_eq!(t.previous, DriverStatus::Normal);
    }

    #[test]
    fn test_claim_send_respects_min_interval() {
        let store = AlertStateStore::new();
        assert!(store.try_claim_send("d1", Duration::from_secs(60)));
        // Second attempt right away is suppressed
        assert!(!store.try_claim_send("d1", Duration::from_secs(60)));
    }

    #[test]
    fn test_claim_send_passes_after_interval_elapses() {
        let store = AlertStateStore::new();
        assert!(store.try_claim_send("d1", Duration::from_millis(10)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(store.try_claim_send("d1", Duration::from_millis(10)));
    }

    #[test]
    fn test_claim_send_is_per_driver() {
        let store = AlertStateStore::new();
        assert!(store.try_claim_send("d1", Duration::from_secs(60)));
        assert!(store.try_claim_send("d2", Duration::from_secs(60)));
    }

    #[test]
    fn test_update_context_keeps_latest_observation() {
        let store = AlertStateStore::new();
        store.update_context("d1", Some(0.9), Some("km 10"));
        store.update_context("d1", Some(0.95), None);
        let (confidence, location) = store.context("d1");
        assert_eq!(confidence, Some(0.95));
        assert_eq!(location.as_deref(), Some("km 10"));
    }
}
