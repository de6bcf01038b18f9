use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Outbound notification body, built at send time and never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationPayload {
    pub title: String,
    pub message: String,
    pub driver_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: AlertData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl NotificationPayload {
    pub fn sleeping(
        driver_id: &str,
        confidence: Option<f64>,
        location: Option<&str>,
        device_token: Option<String>,
    ) -> Self {
        let place = location.unwrap_or("unknown location");
        let message = match confidence {
            Some(confidence) => {
                format!("Detected sleeping at {} with confidence {:.2}", place, confidence)
            }
            None => format!("Detected sleeping at {}", place),
        };

        Self {
            title: "Sleeping Alert".to_string(),
            message,
            driver_id: driver_id.to_string(),
            timestamp: Utc::now(),
            data: AlertData {
                confidence,
                location: location.map(str::to_string),
            },
            device_token,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to send notification: {0}")]
    Request(#[from] reqwest::Error),
    #[error("notification endpoint returned status {0}")]
    Status(StatusCode),
}

/// Posts notification payloads to the configured HTTP endpoint. Requests are
/// time-boxed by the client timeout so a hung endpoint cannot pin a send
/// task indefinitely.
pub struct WebhookNotifier {
    endpoint: String,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
        })
    }

    pub async fn deliver(&self, payload: &NotificationPayload) -> Result<(), DeliveryError> {
        let response = self.client.post(&self.endpoint).json(payload).send().await?;

        if !response.status().is_success() {
            return Err(DeliveryError::Status(response.status()));
        }

        debug!(driver_id = %payload.driver_id, "notification delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let payload =
            NotificationPayload::sleeping("driver-1", Some(0.9), Some("Highway 57"), None);
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["title"], "Sleeping Alert");
        assert_eq!(
            value["message"],
            "Detected sleeping at Highway 57 with confidence 0.90"
        );
        assert_eq!(value["driver_id"], "driver-1");
        assert_eq!(value["data"]["confidence"], 0.9);
        assert_eq!(value["data"]["location"], "Highway 57");
        // RFC3339 timestamp
        let timestamp = value["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());
        // No token resolved, no field emitted
        assert!(value.get("device_token").is_none());
    }

    #[test]
    fn test_payload_message_without_confidence() {
        let payload = NotificationPayload::sleeping("driver-1", None, None, None);
        assert_eq!(payload.message, "Detected sleeping at unknown location");
    }

    #[tokio::test]
    async fn test_deliver_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/notifications")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "title": "Sleeping Alert",
                "driver_id": "driver-1",
            })))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(
            &format!("{}/api/notifications", server.url()),
            Duration::from_secs(2),
        )
        .unwrap();
        let payload = NotificationPayload::sleeping("driver-1", Some(0.9), None, None);

        notifier.deliver(&payload).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_deliver_non_success_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/notifications")
            .with_status(502)
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(
            &format!("{}/api/notifications", server.url()),
            Duration::from_secs(2),
        )
        .unwrap();
        let payload = NotificationPayload::sleeping("driver-1", None, None, None);

        let err = notifier.deliver(&payload).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Status(status) if status.as_u16() == 502));
    }
}
