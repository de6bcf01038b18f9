use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use uuid::Uuid;

/// Driver status carried by an alert event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverStatus {
    Sleeping,
    Normal,
}

impl Default for DriverStatus {
    fn default() -> Self {
        DriverStatus::Normal
    }
}

/// One decoded status observation for a driver, as read off the stream.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertEvent {
    pub id: Option<Uuid>,
    pub driver_id: String,
    pub status: Option<DriverStatus>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub confidence: Option<f64>,
    pub location: Option<String>,
    pub observed_at: Option<DateTime<Utc>>,
}

impl AlertEvent {
    /// Resolves the status of this event. An explicit `status` field always
    /// wins; producers that only report a confidence score get it compared
    /// against `confidence_threshold`. Returns `None` when the event carries
    /// neither field.
    pub fn effective_status(&self, confidence_threshold: f64) -> Option<DriverStatus> {
        if let Some(status) = self.status {
            return Some(status);
        }
        self.confidence.map(|confidence| {
            if confidence >= confidence_threshold {
                DriverStatus::Sleeping
            } else {
                DriverStatus::Normal
            }
        })
    }

    pub fn observed_at_or_now(&self) -> DateTime<Utc> {
        self.observed_at.unwrap_or_else(Utc::now)
    }
}

fn parse_f64_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrFloat {
        String(String),
        Float(f64),
    }

    let v: Option<StringOrFloat> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrFloat::Float(f)) => Ok(Some(f)),
        Some(StringOrFloat::String(s)) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.parse::<f64>().map(Some).map_err(serde::de::Error::custom)
            }
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsing_full_payload() {
        let payload = r#"
        {
            "id": "d52b1454-d43d-50fa-99ca-79515c904162",
            "driver_id": "driver-042",
            "status": "sleeping",
            "confidence": 0.93,
            "location": "Highway 57 km 120",
            "observed_at": "2025-11-29T06:15:15Z"
        }
        "#;

        let event: AlertEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.driver_id, "driver-042");
        assert_eq!(event.status, Some(DriverStatus::Sleeping));
        assert_eq!(event.confidence, Some(0.93));
        assert_eq!(event.location.as_deref(), Some("Highway 57 km 120"));
        assert!(event.observed_at.is_some());
    }

    #[test]
    fn test_parsing_confidence_as_string() {
        // Some producers stringify every field
        let payload = r#"{"driver_id": "d1", "status": "normal", "confidence": "0.42"}"#;
        let event: AlertEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.confidence, Some(0.42));

        let payload = r#"{"driver_id": "d1", "status": "normal", "confidence": "  "}"#;
        let event: AlertEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.confidence, None);
    }

    #[test]
    fn test_minimal_payload() {
        let payload = r#"{"driver_id": "d1", "confidence": 0.9}"#;
        let event: AlertEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.status, None);
        assert_eq!(event.id, None);
        assert_eq!(event.location, None);
        assert_eq!(event.observed_at, None);
    }

    #[test]
    fn test_effective_status_explicit_wins() {
        let payload = r#"{"driver_id": "d1", "status": "normal", "confidence": 0.99}"#;
        let event: AlertEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.effective_status(0.8), Some(DriverStatus::Normal));
    }

    #[test]
    fn test_effective_status_derived_from_confidence() {
        let payload = r#"{"driver_id": "d1", "confidence": 0.85}"#;
        let event: AlertEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.effective_status(0.8), Some(DriverStatus::Sleeping));

        let payload = r#"{"driver_id": "d1", "confidence": 0.5}"#;
        let event: AlertEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.effective_status(0.8), Some(DriverStatus::Normal));
    }

    #[test]
    fn test_effective_status_missing() {
        let payload = r#"{"driver_id": "d1"}"#;
        let event: AlertEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.effective_status(0.8), None);
    }
}
