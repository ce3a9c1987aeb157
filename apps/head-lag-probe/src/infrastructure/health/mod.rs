//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, provider connection status, and
//! Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status, including bearer token expiry
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (any provider streaming)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::CheckDispatcher;
use crate::infrastructure::auth::{BearerSource, CachedTokenInfo};
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::stream::{ProviderSnapshot, ProviderStatus};

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Probe version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Per-provider connection status.
    pub providers: Vec<ProviderSnapshot>,
    /// Triggered check queue counters.
    pub checks: CheckQueueStatus,
    /// Cached Codex bearer token, when one has been minted.
    pub bearer_token: Option<CachedTokenInfo>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every provider is streaming.
    Healthy,
    /// Some providers are streaming.
    Degraded,
    /// No provider is streaming.
    Unhealthy,
}

/// Triggered check queue counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CheckQueueStatus {
    /// Requests accepted into the queue.
    pub enqueued: u64,
    /// Requests dropped because the queue was full.
    pub dropped: u64,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    providers: Vec<Arc<ProviderStatus>>,
    dispatcher: Option<Arc<CheckDispatcher>>,
    bearer: Option<BearerSource>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        providers: Vec<Arc<ProviderStatus>>,
        dispatcher: Option<Arc<CheckDispatcher>>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            providers,
            dispatcher,
            bearer: None,
        }
    }

    /// Report the bearer token's expiry on `/health`.
    #[must_use]
    pub fn with_bearer(mut self, bearer: BearerSource) -> Self {
        self.bearer = Some(bearer);
        self
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
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");
        serve(listener, self.state, self.cancel).await?;
        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Routes for the health server.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve the health routes on an already bound listener.
///
/// # Errors
///
/// Returns `HealthServerError::ServerFailed` if the server stops abnormally.
pub async fn serve(
    listener: TcpListener,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
) -> Result<(), HealthServerError> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| HealthServerError::ServerFailed(e.to_string()))
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state).await;
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
    if state.providers.iter().any(|p| p.is_streaming()) {
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
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

async fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let providers: Vec<ProviderSnapshot> = state.providers.iter().map(|p| p.snapshot()).collect();
    let streaming = state.providers.iter().filter(|p| p.is_streaming()).count();

    let checks = state
        .dispatcher
        .as_ref()
        .map(|d| CheckQueueStatus {
            enqueued: d.enqueued_count(),
            dropped: d.dropped_count(),
        })
        .unwrap_or_default();

    let bearer_token = match &state.bearer {
        Some(bearer) => bearer.token_info().await,
        None => None,
    };

    HealthResponse {
        status: determine_health_status(streaming, providers.len()),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        providers,
        checks,
        bearer_token,
    }
}

const fn determine_health_status(streaming: usize, total: usize) -> HealthStatus {
    if streaming == 0 {
        HealthStatus::Unhealthy
    } else if streaming == total {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
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
