//! HTTP client for `POST /api/voice_recorder/upload`
//!
//! Sends the clip as a multipart form with bearer authentication and
//! interprets the integration's JSON reply.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;

use super::Uploader;
use crate::audio::RecordingResult;
use crate::error::UploadError;

pub const UPLOAD_PATH: &str = "/api/voice_recorder/upload";

/// What the integration sends back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UploadReceipt {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default, rename = "eventName")]
    pub event_name: Option<String>,
    #[serde(default, rename = "browserID")]
    pub browser_id: Option<String>,
}

/// Form fields sent alongside the audio. Built fresh for every upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMetadata {
    pub event_name: String,
    pub browser_id: String,
    pub user_id: Option<String>,
    pub token: String,
}

pub struct UploadCoordinator {
    client: Client,
    endpoint: String,
    token: String,
    browser_id: Option<String>,
    user_id: Option<String>,
}

impl UploadCoordinator {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, UploadError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| UploadError::Network(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), UPLOAD_PATH),
            token: token.into(),
            browser_id: None,
            user_id: None,
        })
    }

    /// Identify the dashboard client, when the host knows one.
    pub fn with_browser_id(mut self, browser_id: Option<String>) -> Self {
        self.browser_id = browser_id;
        self
    }

    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn metadata(&self, event_name: &str) -> UploadMetadata {
        UploadMetadata {
            event_name: event_name.trim().to_string(),
            browser_id: self.browser_id.clone().unwrap_or_default(),
            user_id: self.user_id.clone(),
            token: self.token.clone(),
        }
    }

    fn build_form(recording: &RecordingResult, metadata: &UploadMetadata) -> Result<Form, UploadError> {
        let file_part = Part::bytes(recording.audio.clone())
            .file_name(recording.file_name.clone())
            .mime_str(&recording.mime_type)
            .map_err(|e| UploadError::Network(format!("invalid mime type: {}", e)))?;

        let mut form = Form::new()
            .part("file", file_part)
            .text("browserid", metadata.browser_id.clone())
            .text("eventname", metadata.event_name.clone());

        if let Some(user_id) = &metadata.user_id {
            form = form.text("user_id", user_id.clone());
        }
        Ok(form)
    }

    /// Upload `recording` tagged with `event_name`.
    pub async fn upload(
        &self,
        recording: &RecordingResult,
        event_name: &str,
    ) -> Result<UploadReceipt, UploadError> {
        let metadata = self.metadata(event_name);
        let form = Self::build_form(recording, &metadata)?;

        log::info!(
            "Uploading {} ({} bytes, {}ms, event {:?})",
            recording.file_name,
            recording.audio.len(),
            recording.duration_ms(),
            metadata.event_name
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&metadata.token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| UploadError::Network(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            log::error!("Upload failed ({}): {}", status.as_u16(), body);
            return Err(UploadError::Transport {
                status: status.as_u16(),
                body,
            });
        }

        let receipt: UploadReceipt =
            serde_json::from_str(&body).map_err(|e| UploadError::Parse(e.to_string()))?;

        if !receipt.success {
            let message = receipt
                .msg
                .clone()
                .unwrap_or_else(|| "Upload rejected by server".to_string());
            log::error!("Upload rejected: {}", message);
            return Err(UploadError::Application { message });
        }

        log::info!(
            "Upload saved: filename={:?}, path={:?}",
            receipt.filename,
            receipt.path
        );
        Ok(receipt)
    }
}

#[async_trait]
impl Uploader for UploadCoordinator {
    async fn upload(
        &self,
        recording: &RecordingResult,
        event_name: &str,
    ) -> Result<UploadReceipt, UploadError> {
        UploadCoordinator::upload(self, recording, event_name).await
    }
}
