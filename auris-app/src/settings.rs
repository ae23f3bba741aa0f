//! Persistent application settings (JSON file in the app data directory).
//!
//! Covers the fields the recording/transcription surface actually reads;
//! execution-provider/model-profile/dictionary settings from earlier
//! iterations of this file have no counterpart here and were dropped.

use std::fs;
use std::path::{Path, PathBuf};

use auris_core::RecordingConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_input_device: Option<String>,
    pub max_chunk_duration_seconds: f32,
    pub auto_end_enabled: bool,
    pub auto_end_silence_ms: u64,
    pub transcription_endpoint: String,
    pub toggle_shortcut: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preferred_input_device: None,
            max_chunk_duration_seconds: 15.0,
            auto_end_enabled: true,
            auto_end_silence_ms: 5_000,
            transcription_endpoint: "https://api.example.com/v1/transcribe".into(),
            toggle_shortcut: "Ctrl+Shift+Space".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSettings {
    pub max_chunk_duration_seconds: f32,
    pub auto_end_enabled: bool,
    pub auto_end_silence_ms: u64,
    pub transcription_endpoint: String,
    pub toggle_shortcut: String,
}

impl AppSettings {
    pub fn normalize(&mut self) {
        // `0` is the user's way of asking for full-recording (Unlimited)
        // mode; anything else is clamped into the fixed-bucket range.
        if self.max_chunk_duration_seconds > 0.0 {
            self.max_chunk_duration_seconds = self.max_chunk_duration_seconds.clamp(5.0, 900.0);
        }
        self.auto_end_silence_ms = self.auto_end_silence_ms.clamp(3_000, 60_000);
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        if self.transcription_endpoint.trim().is_empty() {
            self.transcription_endpoint = Self::default().transcription_endpoint;
        }
        if self.toggle_shortcut.trim().is_empty() {
            self.toggle_shortcut = Self::default().toggle_shortcut;
        }
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            max_chunk_duration_seconds: self.max_chunk_duration_seconds,
            auto_end_enabled: self.auto_end_enabled,
            auto_end_silence_ms: self.auto_end_silence_ms,
            transcription_endpoint: self.transcription_endpoint.clone(),
            toggle_shortcut: self.toggle_shortcut.clone(),
        }
    }

    /// Build the `RecordingController` config this settings snapshot implies.
    pub fn recording_config(&self) -> RecordingConfig {
        use auris_core::session::SessionConfig;

        RecordingConfig {
            session: SessionConfig {
                max_chunk_duration: max_chunk_duration_bucket(self.max_chunk_duration_seconds),
                auto_end: self.auto_end_config(),
                ..SessionConfig::default()
            },
            ..RecordingConfig::default()
        }
    }

    fn auto_end_config(&self) -> auris_core::session::AutoEndConfig {
        use auris_core::session::AutoEndConfig;
        use std::time::Duration;

        let defaults = AutoEndConfig::default();
        AutoEndConfig::new(
            self.auto_end_enabled,
            Duration::from_millis(self.auto_end_silence_ms),
            defaults.min_session_duration,
            defaults.require_speech_first,
            defaults.no_speech_timeout,
        )
    }
}

/// Maps a user-facing chunk-duration knob (seconds, `0` meaning unlimited)
/// onto the nearest fixed `MaxChunkDuration` bucket at or above it.
fn max_chunk_duration_bucket(seconds: f32) -> auris_core::session::MaxChunkDuration {
    use auris_core::session::MaxChunkDuration;

    const BUCKETS: [(f32, MaxChunkDuration); 8] = [
        (15.0, MaxChunkDuration::Secs15),
        (30.0, MaxChunkDuration::Secs30),
        (45.0, MaxChunkDuration::Secs45),
        (60.0, MaxChunkDuration::Min1),
        (120.0, MaxChunkDuration::Min2),
        (300.0, MaxChunkDuration::Min5),
        (600.0, MaxChunkDuration::Min10),
        (900.0, MaxChunkDuration::Min15),
    ];

    if seconds <= 0.0 {
        return MaxChunkDuration::Unlimited;
    }
    for (threshold, variant) in BUCKETS {
        if seconds <= threshold {
            return variant;
        }
    }
    MaxChunkDuration::Unlimited
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("Auris")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("auris")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
