//! Registry inspection and refresh endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::Serialize;

use super::ApiState;
use crate::discovery::{DiscoveryError, refresh};
use crate::registry::CapabilityRegistry;

/// Outcome of an on-demand refresh
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub version: u64,
    pub discovered: Vec<String>,
    pub failures: Vec<DiscoveryError>,
}

/// Current registry snapshot
async fn list_services(State(state): State<Arc<ApiState>>) -> Json<CapabilityRegistry> {
    let snapshot = state.registry().snapshot().await;
    Json(CapabilityRegistry::clone(&snapshot))
}

/// Re-discover every configured endpoint and publish the result
async fn refresh_services(State(state): State<Arc<ApiState>>) -> Json<RefreshResponse> {
    let (report, snapshot) = refresh(&state.discovery, &state.endpoints, state.registry()).await;

    tracing::info!(
        version = snapshot.version(),
        services = snapshot.len(),
        failures = report.failures.len(),
        "registry refreshed on demand"
    );

    Json(RefreshResponse {
        version: snapshot.version(),
        discovered: report
            .discovered_ids()
            .into_iter()
            .map(ToString::to_string)
            .collect(),
        failures: report.failures,
    })
}

/// Build services router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/services", get(list_services))
        .route("/services/refresh", post(refresh_services))
        .with_state(state)
}
