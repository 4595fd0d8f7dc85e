//! Capture backend abstraction
//!
//! A backend owns the microphone stream, buffers PCM while capturing and
//! encodes the clip when stopped. The effect runner drives it from a single
//! worker task, so implementations never see concurrent calls.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::gain::Gain;
use crate::error::CaptureError;

/// Channel a backend uses to report errors that happen mid-capture.
pub type FaultSender = mpsc::UnboundedSender<CaptureError>;

/// Encoded sample rate / bit rate presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioQuality {
    Basic,
    #[default]
    Good,
    High,
    Ultra,
}

impl AudioQuality {
    /// Parse a preset name. Unknown names fall back to `Good`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "basic" => AudioQuality::Basic,
            "good" => AudioQuality::Good,
            "high" => AudioQuality::High,
            "ultra" => AudioQuality::Ultra,
            other => {
                log::warn!("Unknown audio_quality {:?}, using \"good\"", other);
                AudioQuality::Good
            }
        }
    }

    pub fn sample_rate(self) -> u32 {
        match self {
            AudioQuality::Basic => 16_000,
            AudioQuality::Good => 22_050,
            AudioQuality::High => 44_100,
            AudioQuality::Ultra => 48_000,
        }
    }

    pub fn bit_rate_kbps(self) -> u32 {
        match self {
            AudioQuality::Basic => 128,
            AudioQuality::Good => 160,
            AudioQuality::High => 192,
            AudioQuality::Ultra => 256,
        }
    }
}

/// Container the finished clip is encoded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Wav,
}

impl AudioFormat {
    pub fn file_name(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "recording.mp3",
            AudioFormat::Wav => "recording.wav",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Wav => "audio/wav",
        }
    }
}

/// Everything a backend needs to know to open and capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureSettings {
    pub gain: Gain,
    pub quality: AudioQuality,
    pub format: AudioFormat,
    /// Pad silence over dropped callbacks. Off whenever a custom gain is active.
    pub stutter_compensation: bool,
}

impl CaptureSettings {
    pub fn new(gain: Gain, quality: AudioQuality, format: AudioFormat) -> Self {
        Self {
            gain,
            quality,
            format,
            stutter_compensation: gain.is_unity(),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self::new(Gain::default(), AudioQuality::default(), AudioFormat::default())
    }
}

/// A finished, encoded clip. Produced once per session.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub audio: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
    pub duration: Duration,
}

impl RecordingResult {
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }
}

#[async_trait]
pub trait CaptureBackend: Send {
    /// Backend name for logging
    fn name(&self) -> &str;

    fn is_open(&self) -> bool;

    /// Acquire the input device and encoder. Calling it on an open backend is a no-op.
    async fn open(&mut self, settings: &CaptureSettings) -> Result<(), CaptureError>;

    /// Begin capturing. Errors after this returns are reported on `faults`.
    async fn start(&mut self, faults: FaultSender) -> Result<(), CaptureError>;

    /// Stop capturing and encode everything captured since `start`.
    async fn stop(&mut self) -> Result<RecordingResult, CaptureError>;

    /// Release the device. Safe to call in any state.
    async fn close(&mut self);
}
