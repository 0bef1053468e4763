//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint reporting the ingestion session status and Prometheus
//! metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON session status (503 once the session failed)
//! - `GET /healthz` - Liveness check (simple OK)
//! - `GET /readyz` - Readiness check (subscribed and receiving)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{SessionMonitor, SessionSnapshot};
use crate::domain::session::SessionState;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Session state and counters.
    pub session: SessionSnapshot,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Subscribed and receiving.
    Healthy,
    /// Connecting, reconnecting, or draining.
    Degraded,
    /// Session failed.
    Unhealthy,
}

impl From<SessionState> for HealthStatus {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Failed => Self::Unhealthy,
            s if s.is_ready() => Self::Healthy,
            _ => Self::Degraded,
        }
    }
}

// =============================================================================
// Health Server State
// =============================================================================

/// What the handlers read: build version and the live session monitor.
#[derive(Debug)]
pub struct HealthServerState {
    version: String,
    monitor: Arc<SessionMonitor>,
}

impl HealthServerState {
    /// Wrap the monitor for sharing across handlers.
    #[must_use]
    pub fn new(version: impl Into<String>, monitor: Arc<SessionMonitor>) -> Self {
        Self {
            version: version.into(),
            monitor,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health and scrape endpoint, bound on all interfaces.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Server for `port`; nothing is bound until [`HealthServer::run`].
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Serve until the cancellation token fires.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if the port cannot be bound or the
    /// listener fails while serving.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let port = self.port;
        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port)))
            .await
            .map_err(|source| HealthServerError::Bind { port, source })?;
        tracing::info!(port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(HealthServerError::Serve)?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Routes served by [`HealthServer`].
pub fn router(state: Arc<HealthServerState>) -> Router {
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
    if state.monitor.state().is_ready() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    match get_metrics_handle() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [("content-type", "text/plain")],
            String::from("metrics recorder not installed"),
        ),
    }
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let session = state.monitor.snapshot();
    HealthResponse {
        status: session.state.into(),
        version: state.version.clone(),
        current_time: Utc::now(),
        session,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind health port {port}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Underlying bind error.
        #[source]
        source: std::io::Error,
    },

    /// The listener failed while serving.
    #[error("health server failed")]
    Serve(#[source] std::io::Error),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    async fn spawn(monitor: Arc<SessionMonitor>) -> String {
        let state = Arc::new(HealthServerState::new("0.1.0", monitor));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test_case(SessionState::Receiving, HealthStatus::Healthy ; "receiving")]
    #[test_case(SessionState::Subscribed, HealthStatus::Healthy ; "subscribed")]
    #[test_case(SessionState::Connecting, HealthStatus::Degraded ; "connecting")]
    #[test_case(SessionState::Stopped, HealthStatus::Degraded ; "stopped")]
    #[test_case(SessionState::Failed, HealthStatus::Unhealthy ; "failed")]
    fn status_from_session_state(state: SessionState, expected: HealthStatus) {
        assert_eq!(HealthStatus::from(state), expected);
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[tokio::test]
    async fn readiness_follows_session() {
        let monitor = Arc::new(SessionMonitor::new());
        let base = spawn(Arc::clone(&monitor)).await;
        let client = reqwest::Client::new();

        let response = client.get(format!("{base}/readyz")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        monitor.set_state(SessionState::Receiving);
        let response = client.get(format!("{base}/readyz")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = client.get(format!("{base}/healthz")).send().await.unwrap();
        assert_eq!(response.text().await.unwrap(), "OK");
    }

    #[tokio::test]
    async fn failed_session_is_unavailable() {
        let monitor = Arc::new(SessionMonitor::new());
        monitor.set_state(SessionState::Failed);
        monitor.set_error("no access credential available");
        let base = spawn(monitor).await;

        let response = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["session"]["state"], "failed");
        assert_eq!(body["session"]["last_error"], "no access credential available");
    }
}
