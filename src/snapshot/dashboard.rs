use super::legend::series_label;
use super::step::{compute_step, Target};
use super::template::{expand_query, query_variables};
use crate::config::TimeRange;
use crate::datasource::{backend_for, DatasourceDescriptor, DatasourceRegistry, SeriesResult};
use crate::error::{Result, SnapshotError};
use crate::grafana::GrafanaClient;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Panels whose datasource resolved, with the queries planned for each.
#[derive(Debug, Default)]
pub struct QueryPlan {
    pub panels: Vec<PlannedPanel>,
    pub queries: Vec<PlannedQuery>,
}

#[derive(Debug)]
pub struct PlannedPanel {
    /// JSON pointer of the panel inside the dashboard object.
    pub pointer: String,
}

#[derive(Debug, Clone)]
pub struct PlannedQuery {
    /// Index into [`QueryPlan::panels`].
    pub panel: usize,
    pub datasource: DatasourceDescriptor,
    pub expr: String,
    pub legend_format: Option<String>,
    pub step: f64,
}

/// Extract the dashboard object from a `GET api/dashboards/db/<slug>` body.
pub fn parse_dashboard(text: &str, slug: &str) -> Result<Value> {
    let mut body: Value = serde_json::from_str(text)
        .map_err(|e| SnapshotError::malformed("$", format!("could not decode dashboard json: {}", e)))?;
    match body.get_mut("dashboard").map(Value::take) {
        Some(dashboard @ Value::Object(_)) => Ok(dashboard),
        Some(Value::Null) | None => match body.get("message").and_then(Value::as_str) {
            Some(message) => Err(SnapshotError::DashboardNotFound {
                slug: slug.to_string(),
                message: message.to_string(),
            }),
            None => Err(SnapshotError::malformed("dashboard", "field is missing")),
        },
        Some(_) => Err(SnapshotError::malformed("dashboard", "expected an object")),
    }
}

fn as_array<'v>(value: &'v Value, path: &str) -> Result<&'v Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| SnapshotError::malformed(path, "expected an array"))
}

fn as_object_mut<'v>(value: &'v mut Value, path: &str) -> Result<&'v mut Map<String, Value>> {
    value
        .as_object_mut()
        .ok_or_else(|| SnapshotError::malformed(path, "expected an object"))
}

/// Optional array field: absent or null is empty, anything else but an
/// array is malformed.
fn optional_array<'v>(object: &'v Value, key: &str, path: &str) -> Result<&'v [Value]> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(&[][..]),
        Some(value) => as_array(value, &format!("{}/{}", path, key)).map(Vec::as_slice),
    }
}

/// JSON pointers of every panel: top level `panels`, panels nested in
/// collapsed rows, and legacy `rows[].panels`.
pub fn panel_pointers(dashboard: &Value) -> Result<Vec<String>> {
    let mut pointers = Vec::new();
    collect_panels(dashboard, "", &mut pointers)?;
    for (row_idx, row) in optional_array(dashboard, "rows", "")?.iter().enumerate() {
        let row_path = format!("/rows/{}", row_idx);
        if !row.is_object() {
            return Err(SnapshotError::malformed(row_path, "expected an object"));
        }
        collect_panels(row, &row_path, &mut pointers)?;
    }
    Ok(pointers)
}

fn collect_panels(container: &Value, path: &str, pointers: &mut Vec<String>) -> Result<()> {
    for (idx, panel) in optional_array(container, "panels", path)?.iter().enumerate() {
        let panel_path = format!("{}/panels/{}", path, idx);
        if !panel.is_object() {
            return Err(SnapshotError::malformed(panel_path, "expected an object"));
        }
        pointers.push(panel_path.clone());
        collect_panels(panel, &panel_path, pointers)?;
    }
    Ok(())
}

/// Resolve a panel's `datasource` reference. `None` means the panel has no
/// usable reference and is left untouched.
fn resolve_datasource<'r>(
    panel: &Value,
    pointer: &str,
    registry: &'r DatasourceRegistry,
) -> Result<Option<&'r DatasourceDescriptor>> {
    let resolved = match panel.get("datasource") {
        None | Some(Value::Null) => {
            debug!("Panel {} has no datasource, skipping", pointer);
            return Ok(None);
        }
        Some(Value::String(name)) => registry.by_name(name),
        Some(reference @ Value::Object(_)) => match reference.get("uid").and_then(Value::as_str) {
            Some(uid) => registry.by_uid(uid),
            None => None,
        },
        Some(_) => {
            return Err(SnapshotError::malformed(
                format!("{}/datasource", pointer),
                "expected a name or an object",
            ))
        }
    };
    if resolved.is_none() {
        warn!(
            "Panel {} references unknown datasource {}, skipping",
            pointer,
            panel.get("datasource").cloned().unwrap_or_default()
        );
    }
    Ok(resolved)
}

/// Walk the panel tree and plan one query per target. Reads the dashboard
/// only; nothing is mutated until every query has returned.
pub fn plan_queries(
    dashboard: &Value,
    registry: &DatasourceRegistry,
    range: &TimeRange,
) -> Result<QueryPlan> {
    let templating: &[Value] = match dashboard.get("templating") {
        Some(templating) => optional_array(templating, "list", "/templating")?,
        None => &[],
    };
    let variables: HashMap<String, String> = query_variables(templating);

    let mut plan = QueryPlan::default();
    for pointer in panel_pointers(dashboard)? {
        let panel = dashboard
            .pointer(&pointer)
            .ok_or_else(|| SnapshotError::malformed(pointer.clone(), "panel disappeared"))?;
        let Some(datasource) = resolve_datasource(panel, &pointer, registry)? else {
            continue;
        };

        let panel_idx = plan.panels.len();
        for (target_idx, raw) in optional_array(panel, "targets", &pointer)?.iter().enumerate() {
            let target_path = format!("{}/targets/{}", pointer, target_idx);
            if !raw.is_object() {
                return Err(SnapshotError::malformed(target_path, "expected an object"));
            }
            let target: Target = serde_json::from_value(raw.clone())
                .map_err(|e| SnapshotError::malformed(target_path.clone(), e.to_string()))?;
            let step = compute_step(&target, range)?;
            plan.queries.push(PlannedQuery {
                panel: panel_idx,
                datasource: datasource.clone(),
                expr: expand_query(&target.expr, &variables),
                legend_format: target.legend_format().map(str::to_string),
                step,
            });
        }
        plan.panels.push(PlannedPanel { pointer });
    }
    Ok(plan)
}

/// Run one planned query. An unsupported datasource skips the target with a
/// warning; every other failure is returned.
async fn run_query(
    client: &GrafanaClient,
    query: &PlannedQuery,
    range: &TimeRange,
    cancel: &CancellationToken,
) -> Result<Vec<SeriesResult>> {
    let outcome = match backend_for(client, &query.datasource) {
        Ok(backend) => backend.query_range(&query.expr, range, query.step, cancel).await,
        Err(e) => Err(e),
    };
    let mut series = match outcome {
        Ok(series) => series,
        Err(e @ SnapshotError::UnsupportedDatasource { .. }) => {
            warn!("Skipping target \"{}\": {}", query.expr, e);
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };
    for s in series.iter_mut() {
        s.target = series_label(query.legend_format.as_deref(), &s.labels);
    }
    debug!(
        "Query \"{}\" (step {}s) returned {} series",
        query.expr,
        query.step,
        series.len()
    );
    Ok(series)
}

/// Execute every planned query with at most `concurrency` in flight.
/// Results come back in plan order; the first error aborts the rest.
pub async fn run_queries(
    client: &GrafanaClient,
    plan: &QueryPlan,
    range: &TimeRange,
    concurrency: usize,
    cancel: &CancellationToken,
) -> Result<Vec<Vec<SeriesResult>>> {
    stream::iter(plan.queries.iter())
        .map(|query| run_query(client, query, range, cancel))
        .buffered(concurrency.max(1))
        .try_collect()
        .await
}

/// Write each panel's series into `snapshotData` and blank the fields that
/// would let a viewer re-issue live queries.
pub fn embed_results(
    dashboard: &mut Value,
    plan: &QueryPlan,
    results: Vec<Vec<SeriesResult>>,
) -> Result<()> {
    let mut per_panel: Vec<Vec<Value>> = vec![Vec::new(); plan.panels.len()];
    for (query, series) in plan.queries.iter().zip(results) {
        for s in series {
            per_panel[query.panel].push(serde_json::to_value(s)?);
        }
    }

    for (panel, data) in plan.panels.iter().zip(per_panel) {
        let value = dashboard
            .pointer_mut(&panel.pointer)
            .ok_or_else(|| SnapshotError::malformed(panel.pointer.clone(), "panel disappeared"))?;
        let object = as_object_mut(value, &panel.pointer)?;
        debug!("Embedding {} series into panel {}", data.len(), panel.pointer);
        object.insert("snapshotData".to_string(), Value::Array(data));
        object.insert("targets".to_string(), json!([]));
        object.insert("links".to_string(), json!([]));
        object.insert("datasource".to_string(), json!([]));
    }
    info!("Embedded query results into {} panels", plan.panels.len());
    Ok(())
}

/// Dashboard level rewrites once every panel is static.
pub fn finalize(
    dashboard: &mut Value,
    range: &TimeRange,
    clear_templating: bool,
    annotations: Option<Value>,
) -> Result<()> {
    let root = as_object_mut(dashboard, "$")?;

    if clear_templating {
        let templating = root
            .entry("templating")
            .or_insert_with(|| Value::Object(Map::new()));
        as_object_mut(templating, "/templating")?.insert("list".to_string(), json!([]));
    }

    let time = root
        .entry("time")
        .or_insert_with(|| Value::Object(Map::new()));
    let time = as_object_mut(time, "/time")?;
    time.insert("from".to_string(), Value::String(range.from_rfc3339()));
    time.insert("to".to_string(), Value::String(range.to_rfc3339()));

    if let Some(annotations) = annotations {
        root.insert(
            "annotations".to_string(),
            json!({
                "list": [{
                    "enable": true,
                    "iconColor": "rgba(0, 211, 255, 1)",
                    "name": "Annotations & Alerts",
                    "snapshotData": annotations,
                }]
            }),
        );
    }
    Ok(())
}
