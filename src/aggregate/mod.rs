//! Aggregation of per-target results into one response
//!
//! Every result is kept, in target-selection order. When more than one
//! target succeeded, their payloads are merged into a sectioned summary.

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::downstream::InvocationResult;

/// Overall outcome of a routed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatus {
    AllSucceeded,
    PartialSuccess,
    AllFailed,
    NoTargetsSelected,
}

/// One successful service's contribution to the summary
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarySection {
    pub service_id: String,
    pub findings: Value,
}

/// Merged view over multiple successful payloads
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub sections: Vec<SummarySection>,
    pub text: String,
}

/// Final response returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResponse {
    pub request_id: Uuid,
    pub status: AggregateStatus,
    pub results: Vec<InvocationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
}

impl AggregatedResponse {
    /// Response for a request no service was selected for
    #[must_use]
    pub fn no_targets() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            status: AggregateStatus::NoTargetsSelected,
            results: Vec::new(),
            summary: None,
        }
    }

    /// Tag the response with the id the request was logged under
    #[must_use]
    pub const fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }

    /// Number of successful results
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Number of failed results
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.results.len() - self.success_count()
    }

    /// Look up the result for a service
    #[must_use]
    pub fn result_for(&self, service_id: &str) -> Option<&InvocationResult> {
        self.results.iter().find(|r| r.service_id() == service_id)
    }
}

/// Merge per-target results, preserving their order
#[must_use]
pub fn aggregate(results: Vec<InvocationResult>) -> AggregatedResponse {
    let status = classify(&results);
    let summary = summarize(&results);

    AggregatedResponse {
        request_id: Uuid::new_v4(),
        status,
        results,
        summary,
    }
}

/// Classify the overall outcome
#[must_use]
pub fn classify(results: &[InvocationResult]) -> AggregateStatus {
    if results.is_empty() {
        return AggregateStatus::NoTargetsSelected;
    }

    let successes = results.iter().filter(|r| r.is_success()).count();
    if successes == results.len() {
        AggregateStatus::AllSucceeded
    } else if successes == 0 {
        AggregateStatus::AllFailed
    } else {
        AggregateStatus::PartialSuccess
    }
}

/// Build a summary when more than one target succeeded
#[must_use]
pub fn summarize(results: &[InvocationResult]) -> Option<Summary> {
    let sections: Vec<SummarySection> = results
        .iter()
        .filter_map(|r| {
            r.payload().map(|payload| SummarySection {
                service_id: r.service_id().to_string(),
                findings: payload.clone(),
            })
        })
        .collect();

    if sections.len() < 2 {
        return None;
    }

    let text = sections
        .iter()
        .map(|s| format!("## {}\n{}", s.service_id, payload_text(&s.findings)))
        .collect::<Vec<_>>()
        .join("\n\n");

    Some(Summary { sections, text })
}

/// Human-readable rendering of an opaque payload
fn payload_text(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        Value::Object(map) => ["text", "content", "summary"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map_or_else(|| payload.to_string(), ToString::to_string),
        other => other.to_string(),
    }
}
