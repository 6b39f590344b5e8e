//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, handshake status reporting, and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (at least one dataset granted)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::controller::BridgeMode;
use crate::application::services::stats::{PipelineStats, StatsSnapshot};
use crate::domain::handshake::{Handshake, HandshakeState, PermissionStatus};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Bridge version.
    pub version: String,
    /// Ingestion mode.
    pub mode: &'static str,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Handshake progress.
    pub handshake: HandshakeStatus,
    /// Pipeline counters.
    pub pipeline: StatsSnapshot,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every dataset is cleared and the bridge is publishing.
    Healthy,
    /// Still handshaking, or only some datasets cleared.
    Degraded,
    /// Disposed.
    Unhealthy,
}

/// Handshake progress.
#[derive(Debug, Clone, Serialize)]
pub struct HandshakeStatus {
    /// Global state name.
    pub state: &'static str,
    /// Datasets cleared for sending.
    pub granted: usize,
    /// Datasets configured.
    pub total: usize,
    /// Per-dataset permission.
    pub datasets: Vec<DatasetStatus>,
}

/// Permission of one dataset.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetStatus {
    /// Dataset id.
    pub dataset: String,
    /// "pending", "granted" or "denied".
    pub permission: &'static str,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    mode: BridgeMode,
    started_at: Instant,
    handshake: Arc<Handshake>,
    stats: Arc<PipelineStats>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        mode: BridgeMode,
        handshake: Arc<Handshake>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            version,
            mode,
            started_at: Instant::now(),
            handshake,
            stats,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let handshake = &state.handshake;
    if !handshake.state().is_disposed() && handshake.gate().granted_count() > 0 {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let handshake_state = state.handshake.state();
    let gate = state.handshake.gate();
    let granted = gate.granted_count();
    let total = gate.len();

    let datasets = gate
        .snapshot()
        .into_iter()
        .map(|(dataset, status)| DatasetStatus {
            dataset: dataset.as_str().to_string(),
            permission: permission_to_str(status),
        })
        .collect();

    HealthResponse {
        status: determine_health_status(handshake_state, granted, total),
        version: state.version.clone(),
        mode: state.mode.as_str(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        handshake: HandshakeStatus {
            state: handshake_state.as_str(),
            granted,
            total,
            datasets,
        },
        pipeline: state.stats.snapshot(),
    }
}

const fn permission_to_str(status: PermissionStatus) -> &'static str {
    match status {
        PermissionStatus::Pending => "pending",
        PermissionStatus::Granted => "granted",
        PermissionStatus::Denied => "denied",
    }
}

fn determine_health_status(state: HandshakeState, granted: usize, total: usize) -> HealthStatus {
    match state {
        HandshakeState::Disposed => HealthStatus::Unhealthy,
        HandshakeState::Publishing if granted == total => HealthStatus::Healthy,
        _ => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
