//! Error types for the voice recorder
//!
//! Configuration errors are fatal at setup. Everything that can go wrong during
//! a session is folded into `RecorderError`, which is what ends up in the
//! user-facing notification.

use std::path::PathBuf;

use thiserror::Error;

/// Invalid or missing configuration. Raised immediately at setup.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Invalid button_mode {0:?} (expected \"click\" or \"hold\")")]
    InvalidButtonMode(String),
    #[error("Invalid audio_format {0:?} (expected \"mp3\" or \"wav\")")]
    InvalidAudioFormat(String),
    #[error("No access token configured. Set `token` in the settings file or HA_TOKEN.")]
    MissingToken,
    #[error("Event name {0:?} is not one of the configured event_options")]
    UnknownEventName(String),
    #[error("Could not determine config directory")]
    NoConfigDir,
    #[error("Failed to read settings {path:?}: {message}")]
    Read { path: PathBuf, message: String },
    #[error("Failed to parse settings {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("Failed to write settings {path:?}: {message}")]
    Write { path: PathBuf, message: String },
}

/// Errors reported by a capture backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("No audio input device found")]
    NoInputDevice,
    #[error("No supported audio configuration")]
    NoSupportedConfig,
    #[error("Audio encoder unavailable: {0}")]
    EncoderUnavailable(String),
    #[error("Failed to create audio stream: {0}")]
    StreamCreationFailed(String),
    #[error("Recorder is not open")]
    NotOpen,
    #[error("Recorder is not capturing")]
    NotCapturing,
    #[error("Audio stream error: {0}")]
    Stream(String),
    #[error("Failed to encode recording: {0}")]
    EncodeFailed(String),
}

/// Errors from the upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    /// Request never produced a response
    #[error("Network error: {0}")]
    Network(String),
    /// Non-success HTTP status; body read as text
    #[error("Upload failed ({status}): {body}")]
    Transport { status: u16, body: String },
    /// Success status, but the payload reported failure
    #[error("{message}")]
    Application { message: String },
    #[error("Failed to parse upload response: {0}")]
    Parse(String),
}

/// Anything that ends a session badly. Always surfaced to the user, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecorderError {
    #[error("Recording failed: {0}")]
    CaptureInit(CaptureError),
    #[error("Recorder error: {0}")]
    CaptureRuntime(CaptureError),
    #[error("Recording too short ({duration_ms}ms < {min_duration_ms}ms)")]
    TooShortRecording { duration_ms: u64, min_duration_ms: u64 },
    #[error("Failed to save recording: {0}")]
    Upload(#[from] UploadError),
}

/// Failures of the session handle itself.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session loop has shut down")]
    Closed,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_display_carries_status_and_body() {
        let err = UploadError::Transport {
            status: 500,
            body: "server error".to_string(),
        };
        assert_eq!(err.to_string(), "Upload failed (500): server error");
    }

    #[test]
    fn recorder_error_prefixes_match_notification_text() {
        let err = RecorderError::from(UploadError::Application {
            message: "disk full".to_string(),
        });
        assert_eq!(err.to_string(), "Failed to save recording: disk full");

        let err = RecorderError::TooShortRecording {
            duration_ms: 120,
            min_duration_ms: 200,
        };
        assert!(err.to_string().contains("120ms < 200ms"));

        let err = RecorderError::CaptureInit(CaptureError::NoInputDevice);
        assert!(err.to_string().starts_with("Recording failed:"));
    }
}
