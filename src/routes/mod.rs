// HTTP routes: metric ingest, raw and cluster queries, version

mod http;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};

use crate::store::MetricStore;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: Arc<MetricStore>,
}

pub fn app(store: Arc<MetricStore>) -> Router {
    let state = AppState { store };
    Router::new()
        .route("/version", get(http::version_handler)) // GET /version
        .route(
            "/ws/v1/timeline/metrics",
            post(http::ingest_handler).get(http::query_handler),
        ) // POST, GET /ws/v1/timeline/metrics
        .route("/ws/v1/timeline/metrics/cluster", get(http::cluster_handler)) // GET /ws/v1/timeline/metrics/cluster
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
