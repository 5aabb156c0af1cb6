use crate::transfer::DEFAULT_TRANSFER_PORT;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const APP_QUALIFIER: &str = "org";
const APP_ORGANIZATION: &str = "handoff";
const APP_NAME: &str = "handoff";
const CONFIG_FILE: &str = "config.json";

/// Overrides the config directory (used by tests and portable setups)
pub const CONFIG_DIR_ENV: &str = "HANDOFF_CONFIG_DIR";

/// Default UDP port for discovery announcements
pub const DEFAULT_DISCOVERY_PORT: u16 = 56935;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub transfer_port: u16,
    pub discovery_port: u16,
    /// Length of one discovery round (announce + listen)
    pub broadcast_interval_ms: u64,
    /// Discovered hosts not heard from for this long are dropped
    pub host_ttl_secs: u64,
    pub request_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub save_folder: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            transfer_port: DEFAULT_TRANSFER_PORT,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            broadcast_interval_ms: 1000,
            host_ttl_secs: 15,
            request_timeout_secs: 30,
            probe_timeout_secs: 3,
            save_folder: default_save_folder(),
        }
    }
}

impl AppConfig {
    /// Get the config file path
    fn get_config_path() -> Option<PathBuf> {
        get_config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    /// Load config from disk or return default
    pub fn load() -> Self {
        let path = match Self::get_config_path() {
            Some(p) => p,
            None => return Self::default(),
        };

        match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable config {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save config to disk
    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = Self::get_config_path() else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms.max(50))
    }

    pub fn host_ttl(&self) -> Duration {
        Duration::from_secs(self.host_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Get the config directory path for this app
pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return Some(PathBuf::from(dir));
    }

    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Load a `.env` file from the working directory into the environment, if present.
/// Call before `AppConfig::load` so `HANDOFF_CONFIG_DIR` can come from it.
pub fn load_env() {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!("Loaded environment from {:?}", path);
    }
}

/// `~/Downloads` when it exists, otherwise the home directory
pub fn default_save_folder() -> PathBuf {
    let Some(dirs) = directories::UserDirs::new() else {
        return PathBuf::from(".");
    };
    match dirs.download_dir() {
        Some(downloads) if downloads.exists() => downloads.to_path_buf(),
        _ => dirs.home_dir().to_path_buf(),
    }
}
