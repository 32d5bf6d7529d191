// src/api.rs
//! HTTP surface: health, on-demand digest runs, source status, metrics.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::deliver::DigestSink;
use crate::ingest::clean_keywords;
use crate::pipeline::{Digest, Pipeline, SourceStatus};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub sink: Arc<dyn DigestSink>,
    /// Used when a request carries no keywords.
    pub default_keywords: Arc<Vec<String>>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, sink: Arc<dyn DigestSink>, default_keywords: Vec<String>) -> Self {
        Self {
            pipeline,
            sink,
            default_keywords: Arc::new(clean_keywords(&default_keywords)),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/digest", post(run_digest))
        .route("/sources", get(list_sources))
        .route("/metrics", get(render_metrics))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct DigestReq {
    #[serde(default)]
    keywords: Option<Vec<String>>,
}

async fn run_digest(State(state): State<AppState>, body: Option<Json<DigestReq>>) -> Response {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let keywords = match req.keywords.map(|k| clean_keywords(&k)) {
        Some(k) if !k.is_empty() => k,
        _ => state.default_keywords.as_ref().clone(),
    };
    if keywords.is_empty() {
        return (StatusCode::BAD_REQUEST, "no keywords given and none configured").into_response();
    }

    let digest: Digest = state.pipeline.run(&keywords).await;
    // Delivery failure does not void the run; the caller still gets the digest.
    if let Err(e) = state.sink.deliver(&digest).await {
        warn!(target: "pipeline", sink = state.sink.name(), error = %e, "digest delivery failed");
    }
    Json(digest).into_response()
}

async fn list_sources(State(state): State<AppState>) -> Json<Vec<SourceStatus>> {
    Json(state.pipeline.source_status())
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(h) => h.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
