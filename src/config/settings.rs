//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.
//! Every section is `#[serde(default)]`, so a partial `settings.toml` only
//! overrides what it names.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Connection to the realtime music generation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// WebSocket endpoint; the API key is appended as `?key=`.
    pub endpoint: String,
    /// Model resource name sent in the setup message.
    pub model: String,
    /// API key stored in the settings file.  The environment variable named
    /// by `api_key_env` takes precedence when set.
    pub api_key: Option<String>,
    /// Environment variable consulted for the API key.
    pub api_key_env: String,
    /// Minimum spacing between outbound prompt updates, in milliseconds.
    pub prompt_throttle_ms: u64,
    /// Give up on connect / setup after this many seconds.
    pub connect_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateMusic".into(),
            model: "models/lyria-realtime-exp".into(),
            api_key: None,
            api_key_env: "GEMINI_API_KEY".into(),
            prompt_throttle_ms: 50,
            connect_timeout_secs: 10,
        }
    }
}

impl SessionConfig {
    /// The API key to use: environment first, then the settings file.
    /// Empty strings count as unset.
    pub fn resolved_api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| self.api_key.clone().filter(|k| !k.is_empty()))
    }
}

// ---------------------------------------------------------------------------
// PlaybackConfig
// ---------------------------------------------------------------------------

/// Decoding and scheduling of the incoming stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Sample rate assumed for chunks whose MIME type does not say.
    pub sample_rate: u32,
    /// Channel count assumed for chunks whose MIME type does not say.
    pub channels: u16,
    /// Lookahead applied to the first chunk of a stream, in seconds.
    pub start_delay_secs: f64,
    /// Audio that must be queued before the state becomes `playing`.
    pub min_buffer_secs: f64,
    /// Fade-in applied where playback resumes after an underrun.
    pub seam_fade_ms: u32,
    /// Output gain ramp on pause / resume, in seconds.
    pub fade_secs: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            start_delay_secs: 0.5,
            min_buffer_secs: 0.5,
            seam_fade_ms: 5,
            fade_secs: 0.1,
        }
    }
}

// ---------------------------------------------------------------------------
// MidiConfig
// ---------------------------------------------------------------------------

/// MIDI input settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiConfig {
    /// Client name registered with the platform MIDI service.
    pub client_name: String,
    /// Device id to select after access is granted, if present.
    pub preferred_device: Option<String>,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            client_name: "prompt-dj".into(),
            preferred_device: None,
        }
    }
}

// ---------------------------------------------------------------------------
// AnalyserConfig
// ---------------------------------------------------------------------------

/// Output loudness analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyserConfig {
    /// Analysis cadence in Hz (display refresh, not audio rate).
    pub refresh_hz: u32,
    /// Length of the analysis window in milliseconds.
    pub window_ms: u32,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            refresh_hz: 60,
            window_ms: 50,
        }
    }
}

// ---------------------------------------------------------------------------
// UiConfig
// ---------------------------------------------------------------------------

/// Console front-end settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// Minimum spacing between level meter redraws, in milliseconds.
    pub level_redraw_ms: u64,
    /// Request MIDI access at startup.
    pub show_midi: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            level_redraw_ms: 30,
            show_midi: false,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use prompt_dj::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub playback: PlaybackConfig,
    pub midi: MidiConfig,
    pub analyser: AnalyserConfig,
    pub ui: UiConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
