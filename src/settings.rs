//! Card settings: file format, validation and persistence
//!
//! Settings live in `<config dir>/voice-recorder/settings.json` unless a path
//! is given explicitly. Unknown keys are ignored and missing keys take their
//! defaults; validation into `CardConfig` is where bad values are rejected.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::{AudioFormat, AudioQuality, CaptureSettings, Gain};
use crate::error::ConfigError;
use crate::state_machine::SessionLimits;

const SETTINGS_DIR_NAME: &str = "voice-recorder";
const SETTINGS_FILE_NAME: &str = "settings.json";

pub const DEFAULT_BASE_URL: &str = "http://homeassistant.local:8123";

/// Settings as written on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CardSettings {
    /// Card title, only used in log output.
    pub name: Option<String>,

    /// Home Assistant base URL.
    pub base_url: String,

    /// Long-lived access token used for uploads and notifications.
    pub token: Option<String>,

    /// Static event name attached to every upload.
    pub event_name: Option<String>,

    /// Selectable event names. The first one is preselected.
    pub event_options: Option<Vec<String>>,

    /// Post a notification when the server confirms a save.
    pub notify: bool,

    /// "click" toggles on press, "hold" records while pressed.
    pub button_mode: Option<String>,

    /// Software gain, clamped to 1.0 - 10.0.
    pub volume_gain: Option<f64>,

    /// "basic", "good", "high" or "ultra".
    pub audio_quality: Option<String>,

    /// "mp3" or "wav".
    pub audio_format: Option<String>,

    pub browser_id: Option<String>,
    pub user_id: Option<String>,

    /// Recordings shorter than this are discarded instead of uploaded.
    pub min_duration_ms: u64,

    /// Recordings are stopped automatically after this long.
    pub max_duration_ms: u64,
}

impl Default for CardSettings {
    fn default() -> Self {
        Self {
            name: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            event_name: None,
            event_options: None,
            notify: false,
            button_mode: None,
            volume_gain: None,
            audio_quality: None,
            audio_format: None,
            browser_id: None,
            user_id: None,
            min_duration_ms: 200,
            max_duration_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonMode {
    #[default]
    Click,
    Hold,
}

impl ButtonMode {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "click" => Ok(ButtonMode::Click),
            "hold" => Ok(ButtonMode::Hold),
            other => Err(ConfigError::InvalidButtonMode(other.to_string())),
        }
    }
}

/// Validated configuration for one card instance.
#[derive(Debug, Clone)]
pub struct CardConfig {
    pub name: Option<String>,
    pub base_url: String,
    pub token: String,
    pub event_name: Option<String>,
    pub event_options: Vec<String>,
    pub notify: bool,
    pub button_mode: ButtonMode,
    pub capture: CaptureSettings,
    pub browser_id: Option<String>,
    pub user_id: Option<String>,
    pub limits: SessionLimits,
}

impl CardConfig {
    /// Event name preselected when the card starts.
    pub fn initial_event_name(&self) -> String {
        self.event_options
            .first()
            .cloned()
            .or_else(|| self.event_name.clone())
            .unwrap_or_default()
    }

    /// Check a user selection against the configured options.
    /// Without options any name is accepted.
    pub fn check_event_name(&self, name: &str) -> Result<String, ConfigError> {
        let name = name.trim();
        if self.event_options.is_empty() || self.event_options.iter().any(|o| o == name) {
            Ok(name.to_string())
        } else {
            Err(ConfigError::UnknownEventName(name.to_string()))
        }
    }
}

impl CardSettings {
    /// Apply `HA_TOKEN` / `HA_URL` from the environment on top of the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("HA_TOKEN") {
            if !token.is_empty() {
                self.token = Some(token);
            }
        }
        if let Ok(url) = std::env::var("HA_URL") {
            if !url.is_empty() {
                self.base_url = url;
            }
        }
    }

    pub fn validate(self) -> Result<CardConfig, ConfigError> {
        let button_mode = match self.button_mode.as_deref() {
            Some(mode) => ButtonMode::parse(mode)?,
            None => ButtonMode::default(),
        };

        let token = self
            .token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingToken)?;

        let format = match self.audio_format.as_deref() {
            None | Some("mp3") => AudioFormat::Mp3,
            Some("wav") => AudioFormat::Wav,
            Some(other) => return Err(ConfigError::InvalidAudioFormat(other.to_string())),
        };

        let quality = self
            .audio_quality
            .as_deref()
            .map(AudioQuality::from_name)
            .unwrap_or_default();

        // Zero means "not set", like a missing key
        let gain = self
            .volume_gain
            .filter(|g| *g != 0.0)
            .map(Gain::new)
            .unwrap_or_default();

        let event_options: Vec<String> = self
            .event_options
            .unwrap_or_default()
            .into_iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();

        Ok(CardConfig {
            name: self.name,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            token,
            event_name: self.event_name,
            event_options,
            notify: self.notify,
            button_mode,
            capture: CaptureSettings::new(gain, quality, format),
            browser_id: self.browser_id.filter(|b| !b.is_empty()),
            user_id: self.user_id.filter(|u| !u.is_empty()),
            limits: SessionLimits {
                min_duration: Duration::from_millis(self.min_duration_ms),
                max_duration: Duration::from_millis(self.max_duration_ms),
            },
        })
    }
}

/// Default settings location.
pub fn default_settings_path() -> Result<PathBuf, ConfigError> {
    let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    Ok(dir.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
}

/// Load settings from `path`. A missing file yields defaults.
pub fn load_settings(path: &Path) -> Result<CardSettings, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            serde_json::from_str::<CardSettings>(&contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::info!("Settings: {:?} not found, using defaults", path);
            Ok(CardSettings::default())
        }
        Err(e) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
    }
}

pub fn save_settings(path: &Path, settings: &CardSettings) -> Result<(), ConfigError> {
    let write_err = |message: String| ConfigError::Write {
        path: path.to_path_buf(),
        message,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| write_err(format!("create {:?}: {}", parent, e)))?;
    }

    let contents =
        serde_json::to_string_pretty(settings).map_err(|e| write_err(format!("serialize: {}", e)))?;

    // Write to a temp file in the same directory, then rename over the target.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents)
        .map_err(|e| write_err(format!("write temp {:?}: {}", tmp_path, e)))?;

    // rename() won't replace an existing file on Windows
    if cfg!(windows) && path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(write_err(format!("remove existing: {}", e)));
            }
        }
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| write_err(format!("rename {:?}: {}", tmp_path, e)))?;
    Ok(())
}
