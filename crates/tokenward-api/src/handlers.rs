//! Health HTTP handlers.
//!
//! Each handler takes exactly one snapshot from the aggregator and renders
//! its response from that copy.

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse};

use tokenward_metrics::{prometheus, render_prometheus};

use crate::ApiState;

const INDEX_HTML: &str = "<!DOCTYPE html>
<html>
<head><meta charset=\"utf-8\"><title>tokenward</title></head>
<body>
<h1>tokenward</h1>
<ul>
<li><a href=\"/health\">/health</a> &mdash; JSON health report</li>
<li><a href=\"/metrics\">/metrics</a> &mdash; Prometheus metrics</li>
</ul>
</body>
</html>
";

/// GET /
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// GET /health
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.health.snapshot().await;
    Json(snapshot.report())
}

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.health.snapshot().await;
    (
        [(header::CONTENT_TYPE, prometheus::CONTENT_TYPE)],
        render_prometheus(&snapshot),
    )
}

pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found\n")
}
