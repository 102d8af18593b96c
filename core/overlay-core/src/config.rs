//! Configuration loading and path helpers.
//!
//! Everything lives under `~/.interview-overlay/`:
//! - `config.json`: optional overrides for [`OverlayConfig`]
//! - `instance.lock` / `instance.sock`: single-instance router
//! - `logs/`: rolling log files written by the desktop shell

use crate::error::{OverlayError, Result};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_URL_ENV: &str = "INTERVIEW_OVERLAY_API_URL";
const DATA_DIR_NAME: &str = ".interview-overlay";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverlayConfig {
    pub api_base_url: String,
    pub scheme: String,
    pub default_language: String,
    pub collapsed_height: u32,
    pub move_step: i32,
    pub request_timeout_secs: u64,
    pub ready_timeout_secs: u64,
    pub overlay_width: u32,
    pub overlay_height: u32,
    pub top_offset: i32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".to_string(),
            scheme: "interviewsai".to_string(),
            default_language: "en-US".to_string(),
            collapsed_height: 64,
            move_step: 50,
            request_timeout_secs: 15,
            ready_timeout_secs: 15,
            overlay_width: 400,
            overlay_height: 600,
            top_offset: 1,
        }
    }
}

impl OverlayConfig {
    /// Loads `~/.interview-overlay/config.json`, falling back to defaults.
    ///
    /// A malformed file is logged and ignored so a bad edit never keeps the
    /// overlay from starting.
    pub fn load() -> Self {
        let mut config = match config_path() {
            Some(path) => match Self::load_from(&path) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!(error = %err, "Failed to load overlay config; using defaults");
                    Self::default()
                }
            },
            None => Self::default(),
        };
        config.apply_env_overrides();
        config
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(OverlayError::io("reading overlay config", err)),
        };
        serde_json::from_str(&content).map_err(|err| OverlayError::Config {
            path: path.to_path_buf(),
            details: err.to_string(),
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var(API_URL_ENV) {
            let trimmed = url.trim();
            if !trimmed.is_empty() {
                self.api_base_url = trimmed.to_string();
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Returns the overlay's data directory (~/.interview-overlay).
pub fn data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(DATA_DIR_NAME))
}

pub fn config_path() -> Option<PathBuf> {
    data_dir().map(|dir| dir.join("config.json"))
}

pub fn instance_lock_path() -> Option<PathBuf> {
    data_dir().map(|dir| dir.join("instance.lock"))
}

pub fn instance_socket_path() -> Option<PathBuf> {
    data_dir().map(|dir| dir.join("instance.sock"))
}

pub fn log_dir() -> Option<PathBuf> {
    data_dir().map(|dir| dir.join("logs"))
}
