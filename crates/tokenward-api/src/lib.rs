//! tokenward-api: health HTTP surface for the renewal daemon.
//!
//! Serves read-only views of the `HealthAggregator`. Every response carries
//! hardening headers; the daemon binds to loopback unless told otherwise.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | Index linking the endpoints below |
//! | GET | `/health` | JSON health report |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use axum::Router;
use axum::extract::Request;
use axum::http::{HeaderValue, header};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use tokenward_metrics::HealthAggregator;

/// Content-Security-Policy applied to every response.
pub const CONTENT_SECURITY_POLICY: &str = "default-src 'none'; frame-ancestors 'none'";

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub health: HealthAggregator,
}

/// Build the health router.
pub fn build_router(health: HealthAggregator) -> Router {
    let state = ApiState { health };

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::prometheus_metrics))
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(middleware::from_fn(security_headers))
}

/// Serve the health router until `shutdown` turns `true`.
pub async fn serve(
    listener: TcpListener,
    health: HealthAggregator,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "health server listening");

    axum::serve(listener, build_router(health))
        .with_graceful_shutdown(async move {
            // A dropped sender also ends the server.
            let _ = shutdown.wait_for(|stop| *stop).await;
            info!("health server shutting down");
        })
        .await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(CONTENT_SECURITY_POLICY),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
