//! User-facing notifications
//!
//! Errors, prompts and save confirmations all go through a `Notifier`. The
//! Home Assistant notifier creates a persistent notification; when that is not
//! possible the message falls back to the log.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::error::RecorderError;
use crate::upload::UploadReceipt;

pub const ERROR_TITLE: &str = "Voice recorder error";
pub const INFO_TITLE: &str = "Voice recorder";
pub const SAVED_TITLE: &str = "Recording saved successfully";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Error,
    Info,
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    #[serde(skip)]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn error(error: &RecorderError) -> Self {
        Self {
            kind: NotificationKind::Error,
            title: ERROR_TITLE.to_string(),
            message: error.to_string(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Info,
            title: INFO_TITLE.to_string(),
            message: message.into(),
        }
    }

    /// Confirmation built from what the server reported back.
    pub fn saved(receipt: &UploadReceipt) -> Self {
        let field = |v: &Option<String>| v.clone().unwrap_or_else(|| "null".to_string());
        Self {
            kind: NotificationKind::Success,
            title: SAVED_TITLE.to_string(),
            message: format!(
                "BrowserID: {}\nEventName: {}\nFileName: {}\nPath: {}",
                field(&receipt.browser_id),
                field(&receipt.event_name),
                field(&receipt.filename),
                field(&receipt.path)
            ),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, notification: &Notification);
}

/// Console fallback.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) {
        log_notification(notification);
    }
}

fn log_notification(notification: &Notification) {
    match notification.kind {
        NotificationKind::Error => {
            log::error!("{}: {}", notification.title, notification.message)
        }
        NotificationKind::Info | NotificationKind::Success => {
            log::info!("{}: {}", notification.title, notification.message)
        }
    }
}

/// Creates `persistent_notification` entries through the Home Assistant REST API.
pub struct HomeAssistantNotifier {
    client: Client,
    endpoint: String,
    token: String,
}

impl HomeAssistantNotifier {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/api/services/persistent_notification/create",
                base_url.trim_end_matches('/')
            ),
            token: token.into(),
        })
    }

    async fn post(&self, notification: &Notification) -> Result<(), String> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(notification)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(format!("HTTP {}: {}", status.as_u16(), body))
        }
    }
}

#[async_trait]
impl Notifier for HomeAssistantNotifier {
    async fn notify(&self, notification: &Notification) {
        if let Err(e) = self.post(notification).await {
            log::warn!("Failed to create notification ({}), logging instead", e);
            log_notification(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UploadError;

    #[test]
    fn saved_message_lists_server_fields() {
        let receipt = UploadReceipt {
            success: true,
            msg: Some("Recording saved".to_string()),
            filename: Some("recording_2024.mp3".to_string()),
            path: Some("/config/www/recordings/recording_2024.mp3".to_string()),
            event_name: Some("doorbell".to_string()),
            browser_id: None,
        };
        let n = Notification::saved(&receipt);
        assert_eq!(n.kind, NotificationKind::Success);
        assert_eq!(n.title, SAVED_TITLE);
        assert_eq!(
            n.message,
            "BrowserID: null\nEventName: doorbell\nFileName: recording_2024.mp3\nPath: /config/www/recordings/recording_2024.mp3"
        );
    }

    #[test]
    fn serialized_body_has_title_and_message_only() {
        let n = Notification::error(&RecorderError::Upload(UploadError::Network(
            "refused".to_string(),
        )));
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["title"], ERROR_TITLE);
        assert_eq!(json["message"], "Failed to save recording: Network error: refused");
        assert!(json.get("kind").is_none());
    }
}
