//! Health, version, and metrics HTTP server
//!
//! Exposes `/healthz` for liveness probes, `/version` describing the
//! running build, and `/metrics` with the Prometheus exposition of the
//! operator registry.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::metrics::Metrics;

/// Default port for the health and version server
pub const DEFAULT_HEALTH_PORT: u16 = 8000;

const DESCRIPTION: &str =
    "The ingress-operator connects host cluster ingress controllers with guest cluster ingress controllers.";
const SOURCE: &str = "https://github.com/giantswarm/ingress-operator";

/// Shared state for the HTTP endpoints
pub struct HealthState {
    metrics: Arc<Metrics>,
}

impl HealthState {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

#[derive(Debug, Serialize)]
struct VersionResponse {
    name: &'static str,
    description: &'static str,
    source: &'static str,
    version: &'static str,
}

/// Run the HTTP server until it encounters a fatal error
///
/// Spawned as a separate task alongside the controller.
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> std::io::Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/version", get(version))
        .route("/metrics", get(metrics))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port, "health server listening");

    axum::serve(listener, app).await
}

/// Liveness probe endpoint
async fn healthz() -> StatusCode {
    debug!("liveness probe: OK");
    StatusCode::OK
}

/// Build description endpoint
async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        name: env!("CARGO_PKG_NAME"),
        description: DESCRIPTION,
        source: SOURCE,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Prometheus text exposition of the operator registry
async fn metrics(State(state): State<Arc<HealthState>>) -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&state.metrics.registry().gather(), &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
