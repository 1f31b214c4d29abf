//! Invocation result and wire types

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::request::Turn;

/// Outcome class of a single downstream invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Success,
    Timeout,
    Unreachable,
    InvalidResponse,
    DownstreamError,
}

impl InvocationStatus {
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Per-target outcome of one dispatch attempt
///
/// `payload` is present only on success and `error_detail` only on failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResult {
    service_id: String,
    status: InvocationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_detail: Option<String>,
    elapsed_ms: u64,
}

impl InvocationResult {
    /// Successful invocation carrying the downstream payload
    #[must_use]
    pub fn success(service_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            service_id: service_id.into(),
            status: InvocationStatus::Success,
            payload: Some(payload),
            error_detail: None,
            elapsed_ms: 0,
        }
    }

    /// Failed invocation
    ///
    /// A `Success` status passed here is downgraded to `InvalidResponse`,
    /// since a success must carry a payload.
    #[must_use]
    pub fn failure(
        service_id: impl Into<String>,
        status: InvocationStatus,
        detail: impl Into<String>,
    ) -> Self {
        let status = if status.is_success() {
            InvocationStatus::InvalidResponse
        } else {
            status
        };
        Self {
            service_id: service_id.into(),
            status,
            payload: None,
            error_detail: Some(detail.into()),
            elapsed_ms: 0,
        }
    }

    /// Record how long the invocation took
    #[must_use]
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    #[must_use]
    pub const fn status(&self) -> InvocationStatus {
        self.status
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    #[must_use]
    pub const fn payload(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }

    #[must_use]
    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    #[must_use]
    pub const fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }
}

/// Request body sent to a downstream invocation endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequestBody<'a> {
    pub request_id: Uuid,
    pub query: &'a str,
    pub context: &'a [Turn],
}

/// Status as reported by the downstream service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireStatus {
    #[serde(alias = "completed")]
    Success,
    #[serde(alias = "failed")]
    Error,
}

/// Response body returned by a downstream invocation endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResponseBody {
    pub status: WireStatus,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub error_detail: Option<String>,
}
