//! Decision oracles
//!
//! An oracle maps a request and a registry snapshot to an ordered list of
//! target services. The [`OracleAdapter`] wraps any oracle with a hard
//! decision timeout and keeps its output inside the snapshot it was given.

pub mod http;
pub mod rules;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::registry::CapabilityRegistry;
use crate::request::RoutingRequest;

pub use http::HttpOracle;
pub use rules::{KeywordRule, RuleOracle};

/// One selected target
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetChoice {
    pub service_id: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Observability only
    pub rationale: String,
}

impl TargetChoice {
    #[must_use]
    pub fn new(service_id: impl Into<String>, confidence: f64, rationale: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            confidence,
            rationale: rationale.into(),
        }
    }
}

/// Ordered target selection; may be empty
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub targets: Vec<TargetChoice>,
}

impl RoutingDecision {
    /// A decision that selects nothing
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn new(targets: Vec<TargetChoice>) -> Self {
        Self { targets }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Selected service ids in decision order
    #[must_use]
    pub fn service_ids(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.service_id.clone()).collect()
    }
}

/// Why an oracle produced no decision
#[derive(Debug, Error)]
pub enum OracleError {
    /// The oracle did not answer within the decision timeout
    #[error("decision timed out after {0:?}")]
    DecisionTimeout(Duration),

    /// The oracle backend could not be reached or refused the request
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    /// The oracle answered with something that is not a decision
    #[error("invalid decision: {0}")]
    InvalidDecision(String),
}

/// Pluggable capability matcher
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Choose target services for a request
    async fn decide(
        &self,
        request: &RoutingRequest,
        registry: &CapabilityRegistry,
    ) -> Result<RoutingDecision, OracleError>;
}

/// Enforces the decision contract around any oracle
#[derive(Clone)]
pub struct OracleAdapter {
    oracle: Arc<dyn DecisionOracle>,
    timeout: Duration,
}

impl std::fmt::Debug for OracleAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleAdapter")
            .field("oracle", &self.oracle.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl OracleAdapter {
    #[must_use]
    pub fn new(oracle: Arc<dyn DecisionOracle>, timeout: Duration) -> Self {
        Self { oracle, timeout }
    }

    /// Name of the wrapped oracle
    #[must_use]
    pub fn oracle_name(&self) -> &str {
        self.oracle.name()
    }

    /// Ask the oracle for a decision bounded by the decision timeout
    ///
    /// The returned targets are deduplicated, restricted to services present
    /// in `registry`, and carry confidences clamped to [0, 1].
    ///
    /// # Errors
    ///
    /// Returns `DecisionTimeout` if the oracle does not answer in time, or
    /// whatever error the oracle itself reported
    pub async fn decide(
        &self,
        request: &RoutingRequest,
        registry: &CapabilityRegistry,
    ) -> Result<RoutingDecision, OracleError> {
        let decision = tokio::time::timeout(self.timeout, self.oracle.decide(request, registry))
            .await
            .map_err(|_| OracleError::DecisionTimeout(self.timeout))??;

        Ok(restrict_to_registry(decision, registry))
    }
}

fn restrict_to_registry(decision: RoutingDecision, registry: &CapabilityRegistry) -> RoutingDecision {
    let mut seen = HashSet::new();
    let targets = decision
        .targets
        .into_iter()
        .filter(|t| {
            if !registry.contains(&t.service_id) {
                tracing::warn!(
                    service_id = %t.service_id,
                    registry_version = registry.version(),
                    "oracle selected unknown service, dropping"
                );
                return false;
            }
            seen.insert(t.service_id.clone())
        })
        .map(|mut t| {
            t.confidence = clamp_confidence(&t.service_id, t.confidence);
            t
        })
        .collect();

    RoutingDecision { targets }
}

fn clamp_confidence(service_id: &str, confidence: f64) -> f64 {
    if confidence.is_nan() {
        tracing::warn!(service_id = %service_id, "oracle returned NaN confidence");
        return 0.0;
    }
    if !(0.0..=1.0).contains(&confidence) {
        tracing::warn!(service_id = %service_id, confidence, "confidence out of range, clamping");
    }
    confidence.clamp(0.0, 1.0)
}
