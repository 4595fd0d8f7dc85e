//! Upload of finished recordings to the Home Assistant voice_recorder endpoint.

mod client;

use async_trait::async_trait;

use crate::audio::RecordingResult;
use crate::error::UploadError;

pub use client::{UploadCoordinator, UploadMetadata, UploadReceipt, UPLOAD_PATH};

/// Anything that can take a finished recording off our hands.
#[async_trait]
pub trait Uploader: Send + Sync + 'static {
    async fn upload(
        &self,
        recording: &RecordingResult,
        event_name: &str,
    ) -> Result<UploadReceipt, UploadError>;
}
