//! Konfiguration aus Umgebungsvariablen
//!
//! | Variable | Default |
//! |---|---|
//! | `SIGNALING_URL` | `ws://127.0.0.1:5000/ws` |
//! | `STUN_URLS` | `stun:stun.l.google.com:19302` |
//! | `TURN_URL` / `TURN_USERNAME` / `TURN_CREDENTIAL` | - |
//! | `MEDIA_SOURCE` | `device` (`synthetic` für eine Testquelle) |
//! | `CAPTURE_VIDEO` | `false` (Video nur mit `synthetic`) |
//! | `RECORDING_DIR` | Download-Verzeichnis, sonst `.` |
//! | `RECORDING_FILE_STEM` | `recorded-video` |

use crate::media::MediaConstraints;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:5000/ws";
pub const DEFAULT_FILE_STEM: &str = "recorded-video";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("{0} is set but {1} is missing")]
    Incomplete(&'static str, &'static str),
}

// ============================================================================
// ICE SERVER CONFIGURATION
// ============================================================================

/// STUN/TURN Server-Eintrag
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

/// Standard STUN Server Konfiguration
pub fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig {
        urls: vec!["stun:stun.l.google.com:19302".to_string()],
        ..Default::default()
    }]
}

// ============================================================================
// MEDIA & RECORDING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSourceKind {
    /// Standard-Mikrofon über cpal
    Device,
    /// Sinuston und H.264-Testbild, keine Hardware nötig
    Synthetic,
}

impl FromStr for MediaSourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "device" => Ok(Self::Device),
            "synthetic" => Ok(Self::Synthetic),
            other => Err(format!("unknown media source '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingConfig {
    pub output_dir: PathBuf,
    pub file_stem: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        let output_dir = directories::UserDirs::new()
            .and_then(|dirs| dirs.download_dir().map(|d| d.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            output_dir,
            file_stem: DEFAULT_FILE_STEM.to_string(),
        }
    }
}

// ============================================================================
// APP CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub signaling_url: Url,
    pub ice_servers: Vec<IceServerConfig>,
    pub media_source: MediaSourceKind,
    pub constraints: MediaConstraints,
    pub recording: RecordingConfig,
}

impl AppConfig {
    /// Standardwerte für ein gegebenes Relay
    pub fn new(signaling_url: Url) -> Self {
        Self {
            signaling_url,
            ice_servers: default_ice_servers(),
            media_source: MediaSourceKind::Device,
            constraints: MediaConstraints::default(),
            recording: RecordingConfig::default(),
        }
    }

    /// Liest die Konfiguration aus der Prozess-Umgebung
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Liest die Konfiguration über eine beliebige Lookup-Funktion
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("SIGNALING_URL").unwrap_or_else(|| DEFAULT_SIGNALING_URL.to_string());
        let signaling_url = Url::parse(url.trim()).map_err(|e| ConfigError::Invalid {
            name: "SIGNALING_URL",
            reason: e.to_string(),
        })?;
        let mut config = Self::new(signaling_url);

        if let Some(urls) = lookup("STUN_URLS") {
            let urls: Vec<String> = urls
                .split(',')
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect();
            for url in &urls {
                if !(url.starts_with("stun:") || url.starts_with("stuns:")) {
                    return Err(ConfigError::Invalid {
                        name: "STUN_URLS",
                        reason: format!("'{}' is not a stun: URL", url),
                    });
                }
            }
            config.ice_servers = if urls.is_empty() {
                Vec::new()
            } else {
                vec![IceServerConfig {
                    urls,
                    ..Default::default()
                }]
            };
        }

        if let Some(url) = lookup("TURN_URL") {
            let username =
                lookup("TURN_USERNAME").ok_or(ConfigError::Incomplete("TURN_URL", "TURN_USERNAME"))?;
            let credential = lookup("TURN_CREDENTIAL")
                .ok_or(ConfigError::Incomplete("TURN_URL", "TURN_CREDENTIAL"))?;
            config.add_turn_server(url, username, credential)?;
        }

        if let Some(source) = lookup("MEDIA_SOURCE") {
            config.media_source = source.parse().map_err(|reason| ConfigError::Invalid {
                name: "MEDIA_SOURCE",
                reason,
            })?;
        }

        if let Some(video) = lookup("CAPTURE_VIDEO") {
            config.constraints.video = parse_bool(&video).ok_or_else(|| ConfigError::Invalid {
                name: "CAPTURE_VIDEO",
                reason: format!("'{}' is not a boolean", video),
            })?;
        }

        if let Some(dir) = lookup("RECORDING_DIR") {
            config.recording.output_dir = PathBuf::from(dir);
        }

        if let Some(stem) = lookup("RECORDING_FILE_STEM") {
            if stem.trim().is_empty() || stem.contains(['/', '\\']) {
                return Err(ConfigError::Invalid {
                    name: "RECORDING_FILE_STEM",
                    reason: format!("'{}' is not a plain file name", stem),
                });
            }
            config.recording.file_stem = stem.trim().to_string();
        }

        Ok(config)
    }

    /// Fügt einen TURN-Server hinzu
    pub fn add_turn_server(
        &mut self,
        url: String,
        username: String,
        credential: String,
    ) -> Result<(), ConfigError> {
        if !(url.starts_with("turn:") || url.starts_with("turns:")) {
            return Err(ConfigError::Invalid {
                name: "TURN_URL",
                reason: format!("'{}' is not a turn: URL", url),
            });
        }
        self.ice_servers.push(IceServerConfig {
            urls: vec![url],
            username,
            credential,
        });
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ============================================================================
// TESTS
// ============================================================================
