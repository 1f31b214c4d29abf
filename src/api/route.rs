//! Routing endpoint

use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};

use super::{ApiState, ErrorResponse, error_response};
use crate::aggregate::AggregatedResponse;
use crate::request::RoutingRequest;

/// Route one request and return the aggregated outcome
///
/// Downstream failures are reported inside the body; only a broken
/// internal contract turns into an error status.
async fn route(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<RoutingRequest>,
) -> Result<Json<AggregatedResponse>, (StatusCode, Json<ErrorResponse>)> {
    state.dispatcher.route(request).await.map(Json).map_err(|e| {
        tracing::error!(error = %e, "routing failed");
        let code = if e.is_contract() {
            "contract_violation"
        } else {
            "internal_error"
        };
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_response(code, &e.to_string()),
        )
    })
}

/// Build routing router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new().route("/route", post(route)).with_state(state)
}
