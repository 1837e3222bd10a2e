// Query backends reached through Grafana's datasource proxy.

pub mod prometheus;

use crate::config::TimeRange;
use crate::error::{Result, SnapshotError};
use crate::grafana::GrafanaClient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio_util::sync::CancellationToken;

pub use prometheus::PrometheusBackend;

/// A datasource as listed by `GET api/datasources`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasourceDescriptor {
    pub id: i64,
    #[serde(default)]
    pub uid: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl DatasourceDescriptor {
    pub fn backend_kind(&self) -> DatasourceKind {
        DatasourceKind::from_type(&self.kind)
    }
}

/// Backend kinds keyed by a datasource's declared `type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasourceKind {
    Prometheus,
    Elasticsearch,
    Unsupported(String),
}

impl DatasourceKind {
    pub fn from_type(kind: &str) -> Self {
        match kind {
            "prometheus" => DatasourceKind::Prometheus,
            "elasticsearch" => DatasourceKind::Elasticsearch,
            other => DatasourceKind::Unsupported(other.to_string()),
        }
    }
}

/// One returned time series. `labels` is kept for legend rendering and is
/// never serialized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesResult {
    pub target: String,
    /// `[value-or-null, timestampMillis]` pairs.
    pub datapoints: Vec<(Option<f64>, i64)>,
    #[serde(skip)]
    pub labels: BTreeMap<String, String>,
}

#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn query_range(
        &self,
        expr: &str,
        range: &TimeRange,
        step: f64,
        cancel: &CancellationToken,
    ) -> Result<Vec<SeriesResult>>;
}

/// Declared but not implemented: every query fails fast so the caller can
/// skip the target instead of embedding an empty result silently.
pub struct ElasticsearchBackend<'a> {
    datasource: &'a DatasourceDescriptor,
}

#[async_trait]
impl QueryBackend for ElasticsearchBackend<'_> {
    async fn query_range(
        &self,
        _expr: &str,
        _range: &TimeRange,
        _step: f64,
        _cancel: &CancellationToken,
    ) -> Result<Vec<SeriesResult>> {
        Err(SnapshotError::UnsupportedDatasource {
            name: self.datasource.name.clone(),
            kind: self.datasource.kind.clone(),
            reason: "elasticsearch queries are not implemented".to_string(),
        })
    }
}

/// Pick the backend for a datasource. Unknown kinds fail with
/// [`SnapshotError::UnsupportedDatasource`].
pub fn backend_for<'a>(
    client: &'a GrafanaClient,
    datasource: &'a DatasourceDescriptor,
) -> Result<Box<dyn QueryBackend + 'a>> {
    match datasource.backend_kind() {
        DatasourceKind::Prometheus => Ok(Box::new(PrometheusBackend::new(client, datasource))),
        DatasourceKind::Elasticsearch => Ok(Box::new(ElasticsearchBackend { datasource })),
        DatasourceKind::Unsupported(kind) => Err(SnapshotError::UnsupportedDatasource {
            name: datasource.name.clone(),
            kind,
            reason: "no query backend for this type".to_string(),
        }),
    }
}

/// Datasources indexed by name, with a secondary uid index for panels that
/// reference their datasource as `{"uid": ...}`.
#[derive(Debug, Clone, Default)]
pub struct DatasourceRegistry {
    by_name: HashMap<String, DatasourceDescriptor>,
    by_uid: HashMap<String, DatasourceDescriptor>,
}

impl DatasourceRegistry {
    pub fn new(datasources: Vec<DatasourceDescriptor>) -> Self {
        let mut registry = Self::default();
        for ds in datasources {
            if let Some(uid) = &ds.uid {
                registry.by_uid.insert(uid.clone(), ds.clone());
            }
            registry.by_name.insert(ds.name.clone(), ds);
        }
        registry
    }

    pub fn by_name(&self, name: &str) -> Option<&DatasourceDescriptor> {
        self.by_name.get(name)
    }

    pub fn by_uid(&self, uid: &str) -> Option<&DatasourceDescriptor> {
        self.by_uid.get(uid)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DatasourceDescriptor> {
        self.by_name.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;

    fn descriptor(id: i64, name: &str, kind: &str) -> DatasourceDescriptor {
        DatasourceDescriptor {
            id,
            uid: Some(format!("uid-{}", id)),
            name: name.to_string(),
            kind: kind.to_string(),
        }
    }

    #[test]
    fn test_kind_from_type() {
        assert_eq!(DatasourceKind::from_type("prometheus"), DatasourceKind::Prometheus);
        assert_eq!(DatasourceKind::from_type("elasticsearch"), DatasourceKind::Elasticsearch);
        assert_eq!(
            DatasourceKind::from_type("influxdb"),
            DatasourceKind::Unsupported("influxdb".to_string())
        );
    }

    #[test]
    fn test_descriptor_ignores_extra_fields() {
        let ds: DatasourceDescriptor = serde_json::from_str(
            r#"{"id": 3, "orgId": 1, "name": "ds1", "type": "prometheus", "url": "http://prom:9090", "access": "proxy"}"#,
        )
        .unwrap();
        assert_eq!(ds.id, 3);
        assert_eq!(ds.uid, None);
        assert_eq!(ds.backend_kind(), DatasourceKind::Prometheus);
    }

    #[test]
    fn test_registry_lookup_last_wins() {
        let registry = DatasourceRegistry::new(vec![
            descriptor(1, "ds1", "prometheus"),
            descriptor(2, "ds1", "elasticsearch"),
        ]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.by_name("ds1").map(|d| d.id), Some(2));
        assert_eq!(registry.by_uid("uid-2").map(|d| d.id), Some(2));
        // a uid keeps pointing at its own datasource after the name is shadowed
        assert_eq!(registry.by_uid("uid-1").map(|d| d.id), Some(1));
        assert!(registry.by_name("missing").is_none());
    }

    #[tokio::test]
    async fn test_dispatch_rejects_unknown_and_elasticsearch() {
        let config = ConnectionConfig::new("http://localhost:3000", "k")
            .validate()
            .unwrap();
        let client = GrafanaClient::new(config).unwrap();

        let influx = descriptor(4, "influx", "influxdb");
        assert!(matches!(
            backend_for(&client, &influx),
            Err(SnapshotError::UnsupportedDatasource { .. })
        ));

        let es = descriptor(5, "logs", "elasticsearch");
        let backend = backend_for(&client, &es).unwrap();
        let range = TimeRange::new(
            chrono::DateTime::from_timestamp(0, 0).unwrap(),
            chrono::DateTime::from_timestamp(3600, 0).unwrap(),
        )
        .unwrap();
        let err = backend
            .query_range("*", &range, 30.0, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::UnsupportedDatasource { .. }));
    }
}
