use crate::error::{Result, SnapshotError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Addresses and API keys for the Grafana host and the snapshot host.
///
/// The Grafana key needs admin rights (it reads every datasource); the
/// snapshot key needs at least editor rights on the snapshot host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub grafana_url: String,
    pub grafana_api_key: String,
    #[serde(default)]
    pub snapshot_url: String,
    #[serde(default)]
    pub snapshot_api_key: String,
    /// Skip TLS certificate verification for this client only.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default)]
    pub request_timeout: Option<Duration>,
}

impl ConnectionConfig {
    pub fn new(grafana_url: impl Into<String>, grafana_api_key: impl Into<String>) -> Self {
        Self {
            grafana_url: grafana_url.into(),
            grafana_api_key: grafana_api_key.into(),
            ..Default::default()
        }
    }

    pub fn with_snapshot_host(
        mut self,
        snapshot_url: impl Into<String>,
        snapshot_api_key: impl Into<String>,
    ) -> Self {
        self.snapshot_url = snapshot_url.into();
        self.snapshot_api_key = snapshot_api_key.into();
        self
    }

    /// Normalize and check the config. Validating an already validated
    /// config returns it unchanged.
    pub fn validate(self) -> Result<ConnectionConfig> {
        if self.grafana_url.trim().is_empty() {
            return Err(SnapshotError::MissingField("grafana_url"));
        }
        if self.grafana_api_key.is_empty() {
            return Err(SnapshotError::MissingField("grafana_api_key"));
        }

        let grafana_url = normalize_base_url(&self.grafana_url)?;
        let snapshot_url = if self.snapshot_url.trim().is_empty() {
            grafana_url.clone()
        } else {
            normalize_base_url(&self.snapshot_url)?
        };

        let snapshot_api_key = if self.snapshot_api_key.is_empty() || snapshot_url == grafana_url {
            self.grafana_api_key.clone()
        } else {
            self.snapshot_api_key
        };

        Ok(ConnectionConfig {
            grafana_url,
            grafana_api_key: self.grafana_api_key,
            snapshot_url,
            snapshot_api_key,
            accept_invalid_certs: self.accept_invalid_certs,
            request_timeout: self.request_timeout,
        })
    }

    /// Resolve `path` (no leading slash) against the Grafana base URL.
    pub fn grafana_endpoint(&self, path: &str) -> Result<Url> {
        join_endpoint(&self.grafana_url, path)
    }

    pub fn snapshot_endpoint(&self, path: &str) -> Result<Url> {
        join_endpoint(&self.snapshot_url, path)
    }
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| SnapshotError::ConfigInvalid(format!("Invalid base URL {}: {}", raw, e)))?;
    if url.cannot_be_a_base() {
        return Err(SnapshotError::ConfigInvalid(format!(
            "Base URL cannot hold a path: {}",
            raw
        )));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url.to_string())
}

fn join_endpoint(base: &str, path: &str) -> Result<Url> {
    Url::parse(&format!("{}{}", base, path))
        .map_err(|e| SnapshotError::ConfigInvalid(format!("Invalid endpoint {}{}: {}", base, path, e)))
}
