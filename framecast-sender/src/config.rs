//! Optional TOML configuration for the sender binary.
//!
//! Everything here has a sensible default, so the file is optional;
//! the four protocol-critical parameters stay on the command line.

use std::path::Path;

use serde::{Deserialize, Serialize};

use framecast_core::DEFAULT_FPS;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderSettings {
    /// Video pacing settings.
    pub video: VideoSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Video pacing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    /// Sender frame rate; also the per-frame encode deadline (1/fps).
    pub fps: u8,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for SenderSettings {
    fn default() -> Self {
        Self {
            video: VideoSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self { fps: DEFAULT_FPS }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl SenderSettings {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
