use crate::config::connection::ConnectionConfig;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection defaults read from a YAML settings file. Every field is
/// optional; command line flags take precedence.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct SnapshotSettings {
    pub grafana_url: Option<String>,
    pub grafana_api_key: Option<String>,
    pub snapshot_url: Option<String>,
    pub snapshot_api_key: Option<String>,
    pub accept_invalid_certs: Option<bool>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default)]
pub struct ConfigManager {
    settings: SnapshotSettings,
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// Returns the first settings file that exists: user level
    /// (~/.grafana-snapshot/config.yaml) before global
    /// (/etc/grafana-snapshot/config.yaml).
    pub fn try_get_existing_local_config_path() -> Option<PathBuf> {
        if let Ok(home_dir) = std::env::var("HOME") {
            let user_path = PathBuf::from(format!("{}/.grafana-snapshot/config.yaml", home_dir));
            if user_path.exists() {
                return Some(user_path);
            }
        }
        let global_path = PathBuf::from("/etc/grafana-snapshot/config.yaml");
        if global_path.exists() {
            return Some(global_path);
        }
        None
    }

    /// Load an explicit settings file, or the discovered one. A missing
    /// discovered file is not an error; a missing explicit one is.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::try_get_existing_local_config_path() {
                Some(path) => path,
                None => {
                    tracing::debug!("No settings file found, using command line values only");
                    return Ok(Self::default());
                }
            },
        };

        tracing::info!("Using settings file: {}", path.display());
        let settings = Self::read_settings(&path)?;
        Ok(Self {
            settings,
            source: Some(path),
        })
    }

    fn read_settings(path: &Path) -> Result<SnapshotSettings> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;

        serde_yaml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), e))
    }

    pub fn settings(&self) -> &SnapshotSettings {
        &self.settings
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Merge command line overrides over the file settings. The result is
    /// not validated yet.
    pub fn connection_config(&self, overrides: SnapshotSettings) -> ConnectionConfig {
        let file = &self.settings;
        ConnectionConfig {
            grafana_url: overrides
                .grafana_url
                .or_else(|| file.grafana_url.clone())
                .unwrap_or_default(),
            grafana_api_key: overrides
                .grafana_api_key
                .or_else(|| file.grafana_api_key.clone())
                .unwrap_or_default(),
            snapshot_url: overrides
                .snapshot_url
                .or_else(|| file.snapshot_url.clone())
                .unwrap_or_default(),
            snapshot_api_key: overrides
                .snapshot_api_key
                .or_else(|| file.snapshot_api_key.clone())
                .unwrap_or_default(),
            accept_invalid_certs: overrides
                .accept_invalid_certs
                .or(file.accept_invalid_certs)
                .unwrap_or(false),
            request_timeout: overrides
                .request_timeout_secs
                .or(file.request_timeout_secs)
                .map(Duration::from_secs),
        }
    }
}
