//! Operational HTTP endpoint.
//!
//! Serves `/metrics` for Prometheus scraping and `/healthcheck` for load
//! balancers. The resource API itself is not served here.

use axum::extract::State;
use axum::{Json, Router, routing::get};
use serde_json::{Value, json};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct HealthInfo {
    pub environment: String,
    pub version: &'static str,
}

impl HealthInfo {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

async fn healthcheck_handler(State(info): State<Arc<HealthInfo>>) -> Json<Value> {
    Json(json!({
        "status": "available",
        "system_info": {
            "environment": info.environment,
            "version": info.version,
        }
    }))
}

pub fn router(info: HealthInfo) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthcheck", get(healthcheck_handler))
        .with_state(Arc::new(info))
}

/// Run the HTTP server until `shutdown` resolves.
///
/// Binds to `0.0.0.0:port`. Bind failures are logged, not returned.
pub async fn run_http_server<F>(port: u16, info: HealthInfo, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(info);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("HTTP server listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind HTTP server on {}: {}", addr, e);
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        tracing::error!("HTTP server error: {}", e);
    }
}
