use crate::error::{Result, SnapshotError};
use crate::grafana::GrafanaClient;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Returned by the snapshot host for a created snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResult {
    pub url: String,
    pub key: String,
    pub delete_url: String,
    pub delete_key: String,
}

/// The `POST api/snapshots` body. `expires` is in whole seconds, 0 = never.
pub fn snapshot_payload(dashboard: Value, name: &str, expires: Duration) -> Value {
    json!({
        "dashboard": dashboard,
        "expires": expires.as_secs(),
        "name": name,
        "meta": {
            "isSnapshot": true,
            "canAdmin": false,
            "type": "snapshot",
        },
    })
}

/// Submit a finished dashboard to the snapshot host. Not retried.
pub async fn publish(
    client: &GrafanaClient,
    dashboard: Value,
    name: &str,
    expires: Duration,
    cancel: &CancellationToken,
) -> Result<SnapshotResult> {
    let payload = snapshot_payload(dashboard, name, expires);
    let (status, body) = client.post_snapshot(&payload, cancel).await?;
    if !status.is_success() {
        return Err(SnapshotError::PublishFailed {
            status: status.as_u16(),
            body,
        });
    }

    let snapshot: SnapshotResult = serde_json::from_str(&body)
        .map_err(|e| SnapshotError::MalformedResponse(format!("{}: {}", e, body)))?;
    info!("Published snapshot \"{}\" at {}", name, snapshot.url);
    Ok(snapshot)
}
