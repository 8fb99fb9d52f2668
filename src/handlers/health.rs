//! Health check endpoint
//!
//! Reports service liveness plus the passive health view of every endpoint,
//! for monitoring and load balancers.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use tokio::time::Instant;

use crate::handlers::AppState;

/// Health of one upstream endpoint as seen by the gateway
#[derive(Debug, Serialize)]
pub struct EndpointStatus {
    pub name: String,
    pub consecutive_failures: u32,
    pub suspended: bool,
    /// Seconds until the endpoint is selectable again (0 when available)
    pub available_in_seconds: f64,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// "operational" if at least one endpoint is selectable, "degraded" otherwise
    pub endpoints_status: &'static str,
    pub endpoints: Vec<EndpointStatus>,
}

/// Health check handler
///
/// Always 200 while the process is serving: suspended endpoints still get a
/// last-ditch attempt, so the gateway itself stays usable.
pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let now = Instant::now();
    let endpoints: Vec<EndpointStatus> = state
        .gateway()
        .health()
        .snapshot()
        .await
        .into_iter()
        .map(|health| {
            let remaining = health
                .suspended_until()
                .map(|until| until.saturating_duration_since(now))
                .unwrap_or_default();
            EndpointStatus {
                name: health.name().to_string(),
                consecutive_failures: health.consecutive_failures(),
                suspended: !health.is_available_at(now),
                available_in_seconds: remaining.as_secs_f64(),
            }
        })
        .collect();

    let endpoints_status = if endpoints.iter().any(|e| !e.suspended) {
        "operational"
    } else {
        "degraded"
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "OK",
            endpoints_status,
            endpoints,
        }),
    )
}
