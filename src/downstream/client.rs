//! HTTP client for downstream invocations

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::time::Instant;
use uuid::Uuid;

use super::types::{
    InvocationRequestBody, InvocationResponseBody, InvocationResult, InvocationStatus, WireStatus,
};
use crate::Result;
use crate::registry::CapabilityDescriptor;
use crate::request::RoutingRequest;

/// Longest body excerpt carried into an error detail
const BODY_EXCERPT_CHARS: usize = 200;

/// Issues one unit of work against one downstream service
///
/// Implementations must produce exactly one result per call and give up
/// once `deadline` passes.
#[async_trait]
pub trait Downstream: Send + Sync {
    async fn invoke(
        &self,
        descriptor: &CapabilityDescriptor,
        request: &RoutingRequest,
        deadline: Instant,
    ) -> InvocationResult;
}

/// Downstream client speaking the JSON invocation contract over HTTP
#[derive(Debug, Clone)]
pub struct DownstreamClient {
    client: reqwest::Client,
}

impl DownstreamClient {
    /// Create a new downstream client
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("beacon-router/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Create a downstream client around an existing HTTP client
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn call(
        &self,
        descriptor: &CapabilityDescriptor,
        request: &RoutingRequest,
    ) -> InvocationResult {
        let service_id = descriptor.service_id.as_str();
        let request_id = Uuid::new_v4();
        let body = InvocationRequestBody {
            request_id,
            query: &request.query,
            context: &request.conversation_context,
        };

        tracing::debug!(
            service_id = %service_id,
            request_id = %request_id,
            endpoint = %descriptor.endpoint_url,
            "invoking downstream service"
        );

        let response = match self
            .client
            .post(descriptor.endpoint_url.clone())
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return transport_failure(service_id, &e),
        };

        let status = response.status();
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return transport_failure(service_id, &e),
        };

        interpret_response(service_id, status, &bytes)
    }
}

#[async_trait]
impl Downstream for DownstreamClient {
    async fn invoke(
        &self,
        descriptor: &CapabilityDescriptor,
        request: &RoutingRequest,
        deadline: Instant,
    ) -> InvocationResult {
        let started = Instant::now();
        let service_id = descriptor.service_id.as_str();

        if deadline <= started {
            return InvocationResult::failure(
                service_id,
                InvocationStatus::Timeout,
                "deadline elapsed before the call started",
            );
        }

        // Dropping the in-flight request on timeout closes its connection
        let result = match tokio::time::timeout_at(deadline, self.call(descriptor, request)).await
        {
            Ok(result) => result,
            Err(_) => {
                let budget = deadline.saturating_duration_since(started);
                tracing::warn!(
                    service_id = %service_id,
                    budget_ms = budget.as_millis(),
                    "downstream call abandoned at deadline"
                );
                InvocationResult::failure(
                    service_id,
                    InvocationStatus::Timeout,
                    format!("no response within {}ms", budget.as_millis()),
                )
            }
        };

        result.with_elapsed(started.elapsed())
    }
}

fn transport_failure(service_id: &str, error: &reqwest::Error) -> InvocationResult {
    let status = if error.is_timeout() {
        InvocationStatus::Timeout
    } else {
        InvocationStatus::Unreachable
    };
    tracing::warn!(service_id = %service_id, error = %error, "downstream transport failure");
    InvocationResult::failure(service_id, status, error.to_string())
}

/// Map a downstream HTTP response onto an invocation result
///
/// A structured body decides the outcome regardless of the HTTP status;
/// unstructured bodies are a downstream error on non-success statuses and an
/// invalid response otherwise.
#[must_use]
pub fn interpret_response(service_id: &str, status: StatusCode, body: &[u8]) -> InvocationResult {
    match serde_json::from_slice::<InvocationResponseBody>(body) {
        Ok(parsed) => match parsed.status {
            WireStatus::Success => parsed.payload.map_or_else(
                || {
                    InvocationResult::failure(
                        service_id,
                        InvocationStatus::InvalidResponse,
                        "success response carried no payload",
                    )
                },
                |payload| InvocationResult::success(service_id, payload),
            ),
            WireStatus::Error => InvocationResult::failure(
                service_id,
                InvocationStatus::DownstreamError,
                parsed
                    .error_detail
                    .unwrap_or_else(|| "downstream reported failure without detail".to_string()),
            ),
        },
        Err(_) if !status.is_success() => InvocationResult::failure(
            service_id,
            InvocationStatus::DownstreamError,
            format!("HTTP {status}: {}", excerpt(body)),
        ),
        Err(e) => InvocationResult::failure(
            service_id,
            InvocationStatus::InvalidResponse,
            format!("unparseable response: {e}"),
        ),
    }
}

fn excerpt(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .chars()
        .take(BODY_EXCERPT_CHARS)
        .collect()
}
