use crate::config::{ConnectionConfig, TimeRange};
use crate::datasource::DatasourceDescriptor;
use crate::error::{Result, SnapshotError};
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// HTTP access to one Grafana instance and its snapshot host.
///
/// Every request carries a bearer token and races the caller's
/// cancellation token; a cancelled request yields [`SnapshotError::Cancelled`].
#[derive(Debug, Clone)]
pub struct GrafanaClient {
    http: reqwest::Client,
    config: ConnectionConfig,
}

#[derive(Debug, Deserialize)]
struct GrafanaMessage {
    message: Option<String>,
}

impl GrafanaClient {
    /// `config` must already be validated.
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        let http = Self::create_http_client(&config)?;
        Ok(Self { http, config })
    }

    fn create_http_client(config: &ConnectionConfig) -> Result<reqwest::Client> {
        let mut builder =
            reqwest::Client::builder().danger_accept_invalid_certs(config.accept_invalid_certs);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        builder.build().map_err(|e| {
            SnapshotError::ConfigInvalid(format!("Failed to build HTTP client: {}", e))
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Send the request and read the whole body, giving up as soon as
    /// `cancel` fires.
    async fn execute(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<(StatusCode, String)> {
        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, SnapshotError>((status, body))
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SnapshotError::Cancelled),
            result = exchange => result,
        }
    }

    async fn grafana_get(
        &self,
        url: Url,
        cancel: &CancellationToken,
    ) -> Result<(StatusCode, String)> {
        debug!("GET {}", url);
        let request = self
            .http
            .get(url)
            .bearer_auth(&self.config.grafana_api_key);
        self.execute(request, cancel).await
    }

    fn unexpected_status(url: &Url, status: StatusCode, body: String) -> SnapshotError {
        SnapshotError::UnexpectedStatus {
            endpoint: url.to_string(),
            status: status.as_u16(),
            body,
        }
    }

    /// Raw dashboard definition text; it is parsed only after template
    /// variables have been substituted into it.
    pub async fn fetch_dashboard(&self, slug: &str, cancel: &CancellationToken) -> Result<String> {
        let url = self.dashboard_url(slug)?;
        debug!("Requesting dashboard definition from: {}", url);
        let (status, body) = self.grafana_get(url.clone(), cancel).await?;
        if status.is_success() {
            return Ok(body);
        }

        let message = serde_json::from_str::<GrafanaMessage>(&body)
            .ok()
            .and_then(|m| m.message);
        match message {
            Some(message) if status == StatusCode::NOT_FOUND => {
                Err(SnapshotError::DashboardNotFound {
                    slug: slug.to_string(),
                    message,
                })
            }
            _ => Err(Self::unexpected_status(&url, status, body)),
        }
    }

    /// `api/dashboards/db/<slug>`, with the slug percent-encoded as one path
    /// segment.
    fn dashboard_url(&self, slug: &str) -> Result<Url> {
        let mut url = self.config.grafana_endpoint("api/dashboards/db")?;
        url.path_segments_mut()
            .map_err(|_| SnapshotError::ConfigInvalid("Grafana URL cannot hold a path".to_string()))?
            .push(slug);
        Ok(url)
    }

    pub async fn fetch_datasources(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<DatasourceDescriptor>> {
        let url = self.config.grafana_endpoint("api/datasources")?;
        debug!("Requesting datasource definitions from: {}", url);
        let (status, body) = self.grafana_get(url.clone(), cancel).await?;
        if !status.is_success() {
            return Err(Self::unexpected_status(&url, status, body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn fetch_annotations(
        &self,
        range: &TimeRange,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let mut url = self.config.grafana_endpoint("api/annotations")?;
        url.query_pairs_mut()
            .append_pair("from", &range.from_millis().to_string())
            .append_pair("to", &range.to_millis().to_string());
        debug!("Requesting annotations from: {}", url);
        let (status, body) = self.grafana_get(url.clone(), cancel).await?;
        if !status.is_success() {
            return Err(Self::unexpected_status(&url, status, body));
        }
        let annotations: Value = serde_json::from_str(&body)?;
        if !annotations.is_array() {
            return Err(SnapshotError::MalformedResponse(format!(
                "annotations from {} is not an array",
                url
            )));
        }
        Ok(annotations)
    }

    /// GET through Grafana's datasource proxy. Grafana injects the
    /// datasource credentials; only the Grafana key is sent from here.
    pub async fn proxy_get(
        &self,
        datasource_id: i64,
        sub_path: &str,
        query: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut url = self
            .config
            .grafana_endpoint(&format!("api/datasources/proxy/{}/{}", datasource_id, sub_path))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        debug!("Requesting data points from: {}", url);
        let (status, body) = self.grafana_get(url.clone(), cancel).await?;
        if !status.is_success() {
            return Err(Self::unexpected_status(&url, status, body));
        }
        Ok(body)
    }

    /// POST a snapshot payload to the snapshot host, authenticated with the
    /// snapshot key. Returns the status and body unchecked.
    pub async fn post_snapshot(
        &self,
        payload: &Value,
        cancel: &CancellationToken,
    ) -> Result<(StatusCode, String)> {
        let url = self.config.snapshot_endpoint("api/snapshots")?;
        debug!("Posting snapshot to: {}", url);
        let request = self
            .http
            .post(url)
            .bearer_auth(&self.config.snapshot_api_key)
            .json(payload);
        self.execute(request, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client_for(server: &MockServer) -> GrafanaClient {
        let config = ConnectionConfig::new(server.base_url(), "secret")
            .validate()
            .unwrap();
        GrafanaClient::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_dashboard_not_found_carries_message() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/dashboards/db/missing");
                then.status(404)
                    .json_body(serde_json::json!({"message": "Dashboard not found"}));
            })
            .await;

        let err = client_for(&server)
            .fetch_dashboard("missing", &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            SnapshotError::DashboardNotFound { slug, message } => {
                assert_eq!(slug, "missing");
                assert_eq!(message, "Dashboard not found");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_dashboard_url_encodes_slug() {
        let client = GrafanaClient::new(
            ConnectionConfig::new("http://grafana.local/sub", "secret")
                .validate()
                .unwrap(),
        )
        .unwrap();
        let url = client.dashboard_url("node-exporter").unwrap();
        assert_eq!(url.as_str(), "http://grafana.local/sub/api/dashboards/db/node-exporter");

        let url = client.dashboard_url("a?b#c/d").unwrap();
        assert_eq!(url.path(), "/sub/api/dashboards/db/a%3Fb%23c%2Fd");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[tokio::test]
    async fn test_datasource_list_requires_success() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/datasources")
                    .header("authorization", "Bearer secret");
                then.status(403).body("forbidden");
            })
            .await;

        let err = client_for(&server)
            .fetch_datasources(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::UnexpectedStatus { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_annotations_query_uses_epoch_millis() {
        use chrono::TimeZone;
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/annotations")
                    .query_param("from", "1486274400000")
                    .query_param("to", "1486296000000");
                then.status(200).json_body(serde_json::json!([{"id": 1}]));
            })
            .await;

        let range = TimeRange::new(
            chrono::Utc.with_ymd_and_hms(2017, 2, 5, 6, 0, 0).unwrap(),
            chrono::Utc.with_ymd_and_hms(2017, 2, 5, 12, 0, 0).unwrap(),
        )
        .unwrap();
        let annotations = client_for(&server)
            .fetch_annotations(&range, &CancellationToken::new())
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(annotations.as_array().map(|a| a.len()), Some(1));
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts_request() {
        let server = MockServer::start_async().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client_for(&server)
            .fetch_datasources(&cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::Cancelled));
    }
}
