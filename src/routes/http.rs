// Handlers: version, metric ingest, raw query, cluster aggregate query

use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;

use super::AppState;
use crate::error::StoreError;
use crate::models::TimelineMetrics;
use crate::store::{Condition, Granularity, WriteReport};

/// GET /version — returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Query string shared by the raw and cluster endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct MetricsParams {
    /// Comma-separated metric names.
    metric_names: Option<String>,
    hostname: Option<String>,
    app_id: Option<String>,
    instance_id: Option<String>,
    start_time: Option<i64>,
    end_time: Option<i64>,
    limit: Option<usize>,
    #[serde(default)]
    grouped: bool,
    /// Cluster endpoint only.
    #[serde(default)]
    precision: Granularity,
}

impl MetricsParams {
    fn condition(&self) -> Condition {
        let metric_names = self
            .metric_names
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        Condition {
            metric_names,
            hostname: non_empty(self.hostname.as_deref()),
            app_id: non_empty(self.app_id.as_deref()),
            instance_id: non_empty(self.instance_id.as_deref()),
            start_time: self.start_time,
            end_time: self.end_time,
            limit: self.limit,
            grouped: self.grouped,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

/// POST /ws/v1/timeline/metrics — store raw metric records.
pub(super) async fn ingest_handler(
    State(state): State<AppState>,
    Json(metrics): Json<TimelineMetrics>,
) -> Result<Json<WriteReport>, StoreError> {
    let report = state.store.insert_metric_records(&metrics).await?;
    Ok(Json(report))
}

/// GET /ws/v1/timeline/metrics — raw record query.
pub(super) async fn query_handler(
    State(state): State<AppState>,
    Query(params): Query<MetricsParams>,
) -> Result<Json<TimelineMetrics>, StoreError> {
    let metrics = state.store.get_metric_records(&params.condition()).await?;
    Ok(Json(metrics))
}

/// GET /ws/v1/timeline/metrics/cluster — per-host means from the cluster aggregate tables.
pub(super) async fn cluster_handler(
    State(state): State<AppState>,
    Query(params): Query<MetricsParams>,
) -> Result<Json<TimelineMetrics>, StoreError> {
    let metrics = state
        .store
        .get_cluster_aggregate_records(&params.condition(), params.precision)
        .await?;
    Ok(Json(metrics))
}
