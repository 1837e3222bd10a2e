// Dashboard to snapshot pipeline: fetch, substitute, parse, query, embed,
// finalize, publish.

pub mod dashboard;
pub mod legend;
pub mod publish;
pub mod step;
pub mod template;

use crate::config::{ConnectionConfig, TakeConfig, TakeRequest};
use crate::datasource::{DatasourceDescriptor, DatasourceRegistry};
use crate::error::Result;
use crate::grafana::GrafanaClient;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use publish::SnapshotResult;

/// Takes snapshots of one Grafana instance and posts them to a snapshot
/// host.
///
/// The datasource cache is refreshed by every [`SnapClient::take`] call (last
/// fetch wins) and sits behind a lock, so one client can serve concurrent
/// takes.
pub struct SnapClient {
    client: GrafanaClient,
    datasource_cache: RwLock<DatasourceRegistry>,
}

impl SnapClient {
    /// Validate `config` and build the HTTP client used for every request.
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        let config = config.validate()?;
        Ok(Self {
            client: GrafanaClient::new(config)?,
            datasource_cache: RwLock::new(DatasourceRegistry::default()),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        self.client.config()
    }

    /// Datasources seen by the last fetch.
    pub async fn cached_datasources(&self) -> Vec<DatasourceDescriptor> {
        let mut datasources: Vec<_> = self.datasource_cache.read().await.iter().cloned().collect();
        datasources.sort_by_key(|d| d.id);
        datasources
    }

    /// Fetch the datasource list and replace the cache with it.
    pub async fn refresh_datasources(&self, cancel: &CancellationToken) -> Result<DatasourceRegistry> {
        let registry = DatasourceRegistry::new(self.client.fetch_datasources(cancel).await?);
        info!("Fetched {} datasource definitions", registry.len());
        *self.datasource_cache.write().await = registry.clone();
        Ok(registry)
    }

    /// Take a snapshot without external cancellation.
    pub async fn take(&self, request: TakeRequest) -> Result<SnapshotResult> {
        self.take_with_cancel(request, &CancellationToken::new()).await
    }

    /// Take a snapshot. Once `cancel` fires, in-flight requests are dropped
    /// and the call returns [`crate::SnapshotError::Cancelled`].
    pub async fn take_with_cancel(
        &self,
        request: TakeRequest,
        cancel: &CancellationToken,
    ) -> Result<SnapshotResult> {
        let take = request.validate()?;
        info!(
            "Taking snapshot of \"{}\" from {} to {}",
            take.dashboard_slug,
            take.range.from_rfc3339(),
            take.range.to_rfc3339()
        );

        let raw_dashboard = self.client.fetch_dashboard(&take.dashboard_slug, cancel).await?;
        info!("Fetched dashboard definition for \"{}\"", take.dashboard_slug);
        let registry = self.refresh_datasources(cancel).await?;
        let annotations = if take.include_annotations {
            Some(self.client.fetch_annotations(&take.range, cancel).await?)
        } else {
            None
        };

        let document = self.transform(&take, &raw_dashboard, &registry, annotations, cancel).await?;
        publish::publish(&self.client, document, &take.snapshot_name, take.expires, cancel).await
    }

    async fn transform(
        &self,
        take: &TakeConfig,
        raw_dashboard: &str,
        registry: &DatasourceRegistry,
        annotations: Option<serde_json::Value>,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value> {
        let substituted = template::substitute(raw_dashboard, &take.template_vars);
        info!("Substituted {} dashboard variables", take.template_vars.len());

        let mut document = dashboard::parse_dashboard(&substituted, &take.dashboard_slug)?;
        let plan = dashboard::plan_queries(&document, registry, &take.range)?;
        info!(
            "Planned {} queries across {} panels",
            plan.queries.len(),
            plan.panels.len()
        );

        let results = dashboard::run_queries(
            &self.client,
            &plan,
            &take.range,
            take.query_concurrency,
            cancel,
        )
        .await?;
        dashboard::embed_results(&mut document, &plan, results)?;
        dashboard::finalize(&mut document, &take.range, take.clear_templating, annotations)?;
        Ok(document)
    }
}
