//! HTTP surfaces.
//!
//! - public listener: `GET /metrics` (when enabled) and `GET /health`
//! - introspection listener: `GET /status`, read-only JSON

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::controller::{Controller, StatusReport};

pub fn public_router(controller: Arc<Controller>) -> Router {
    let mut router = Router::new().route("/health", get(health));
    if controller.config().server.metrics.enabled {
        router = router.route("/metrics", get(metrics));
    }
    router.with_state(controller)
}

pub fn monitoring_router(controller: Arc<Controller>) -> Router {
    Router::new().route("/status", get(status)).with_state(controller)
}

/// Serves `router` on `address` until `cancel` fires.
pub async fn serve(address: &str, router: Router, cancel: CancellationToken) -> std::io::Result<()> {
    let listener = TcpListener::bind(address).await?;
    info!(address, "http listener started");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!(address, "http listener stopped");
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics(State(controller): State<Arc<Controller>>, headers: HeaderMap) -> Response {
    let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());
    match controller.scrape(accept).await {
        Ok(rendered) => ([(header::CONTENT_TYPE, rendered.content_type)], rendered.body).into_response(),
        Err(err) => {
            error!(error = %err, "rendering metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

async fn status(State(controller): State<Arc<Controller>>) -> axum::Json<StatusReport> {
    axum::Json(controller.status())
}
