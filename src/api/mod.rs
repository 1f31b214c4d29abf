//! HTTP API server for beacon router

pub mod health;
pub mod route;
pub mod services;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::discovery::DiscoveryClient;
use crate::dispatch::Dispatcher;
use crate::registry::SharedRegistry;

/// Shared state for API handlers
#[derive(Debug, Clone)]
pub struct ApiState {
    pub dispatcher: Dispatcher,
    pub discovery: DiscoveryClient,
    /// Endpoints re-discovered by `POST /services/refresh`
    pub endpoints: Vec<String>,
}

impl ApiState {
    #[must_use]
    pub const fn new(dispatcher: Dispatcher, discovery: DiscoveryClient, endpoints: Vec<String>) -> Self {
        Self {
            dispatcher,
            discovery,
            endpoints,
        }
    }

    /// Registry the dispatcher routes against
    #[must_use]
    pub const fn registry(&self) -> &SharedRegistry {
        self.dispatcher.registry()
    }
}

/// Error body returned by API handlers
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

pub(crate) fn error_response(code: &str, message: &str) -> axum::Json<ErrorResponse> {
    axum::Json(ErrorResponse {
        error: ErrorDetail {
            code: code.to_string(),
            message: message.to_string(),
        },
    })
}

/// Build the full router with all routes and layers
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(route::router(state.clone()))
        .merge(services::router(state.clone()))
        .merge(health::router())
        .merge(health::ready_router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn new(state: ApiState, port: u16) -> Self {
        Self {
            state: Arc::new(state),
            port,
        }
    }

    /// Run the API server until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }
}
