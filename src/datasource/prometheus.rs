use super::{DatasourceDescriptor, QueryBackend, SeriesResult};
use crate::config::TimeRange;
use crate::error::{Result, SnapshotError};
use crate::grafana::GrafanaClient;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

const QUERY_RANGE_PATH: &str = "api/v1/query_range";

/// Range queries against a Prometheus datasource via the Grafana proxy.
pub struct PrometheusBackend<'a> {
    client: &'a GrafanaClient,
    datasource: &'a DatasourceDescriptor,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    result: Value,
}

#[derive(Debug, Deserialize)]
struct MatrixStream {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

impl<'a> PrometheusBackend<'a> {
    pub fn new(client: &'a GrafanaClient, datasource: &'a DatasourceDescriptor) -> Self {
        Self { client, datasource }
    }

    fn decode(&self, body: &str) -> Result<Vec<SeriesResult>> {
        let response: QueryResponse = serde_json::from_str(body)?;
        if response.status != "success" {
            return Err(SnapshotError::QueryFailed {
                datasource: self.datasource.name.clone(),
                message: format!(
                    "{}: {}",
                    response.error_type.unwrap_or_else(|| response.status.clone()),
                    response.error.unwrap_or_default()
                ),
            });
        }
        let data = response.data.ok_or_else(|| SnapshotError::QueryFailed {
            datasource: self.datasource.name.clone(),
            message: "response has no data".to_string(),
        })?;
        if data.result_type != "matrix" {
            return Err(SnapshotError::UnexpectedResultType {
                got: data.result_type,
            });
        }

        let streams: Vec<MatrixStream> = serde_json::from_value(data.result)?;
        streams.into_iter().map(decode_stream).collect()
    }
}

fn decode_stream(stream: MatrixStream) -> Result<SeriesResult> {
    let mut datapoints = Vec::with_capacity(stream.values.len());
    for (timestamp, raw) in stream.values {
        let value: f64 = raw.parse().map_err(|_| {
            SnapshotError::MalformedResponse(format!("invalid sample value \"{}\"", raw))
        })?;
        // Non-finite samples have no JSON number encoding.
        let value = value.is_finite().then_some(value);
        datapoints.push((value, (timestamp * 1000.0).round() as i64));
    }
    Ok(SeriesResult {
        target: String::new(),
        datapoints,
        labels: stream.metric,
    })
}

fn unix_seconds(millis: i64) -> String {
    (millis as f64 / 1000.0).to_string()
}

#[async_trait]
impl QueryBackend for PrometheusBackend<'_> {
    async fn query_range(
        &self,
        expr: &str,
        range: &TimeRange,
        step: f64,
        cancel: &CancellationToken,
    ) -> Result<Vec<SeriesResult>> {
        let query = [
            ("query", expr.to_string()),
            ("start", unix_seconds(range.from_millis())),
            ("end", unix_seconds(range.to_millis())),
            ("step", step.to_string()),
        ];
        let body = self
            .client
            .proxy_get(self.datasource.id, QUERY_RANGE_PATH, &query, cancel)
            .await?;
        self.decode(&body)
    }
}
