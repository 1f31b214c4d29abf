//! Remote decision oracle over HTTP
//!
//! Posts the request together with a compact view of the registry to an
//! external decision service (typically LLM-backed) and reads back an
//! ordered list of targets.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{DecisionOracle, OracleError, RoutingDecision, TargetChoice};
use crate::Result;
use crate::registry::CapabilityRegistry;
use crate::request::{RoutingRequest, Turn};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OracleRequestBody<'a> {
    query: &'a str,
    context: &'a [Turn],
    services: Vec<OracleService<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OracleService<'a> {
    service_id: &'a str,
    display_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    skills: Vec<OracleSkill<'a>>,
}

#[derive(Debug, Serialize)]
struct OracleSkill<'a> {
    id: &'a str,
    description: &'a str,
    examples: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OracleResponseBody {
    targets: Vec<OracleTarget>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OracleTarget {
    service_id: String,
    confidence: f64,
    #[serde(default)]
    rationale: String,
}

/// Oracle backed by a remote decision endpoint
pub struct HttpOracle {
    client: reqwest::Client,
    url: Url,
    api_key: Option<SecretString>,
}

impl std::fmt::Debug for HttpOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpOracle")
            .field("url", &self.url.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "[redacted]"))
            .finish_non_exhaustive()
    }
}

impl HttpOracle {
    /// Create a remote oracle client
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(url: Url, api_key: Option<SecretString>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("beacon-router/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url,
            api_key,
        })
    }
}

#[async_trait]
impl DecisionOracle for HttpOracle {
    fn name(&self) -> &str {
        "http"
    }

    async fn decide(
        &self,
        request: &RoutingRequest,
        registry: &CapabilityRegistry,
    ) -> std::result::Result<RoutingDecision, OracleError> {
        let body = OracleRequestBody {
            query: &request.query,
            context: &request.conversation_context,
            services: registry
                .iter()
                .map(|d| OracleService {
                    service_id: &d.service_id,
                    display_name: &d.display_name,
                    description: d.description.as_deref(),
                    skills: d
                        .skills
                        .iter()
                        .map(|s| OracleSkill {
                            id: &s.id,
                            description: &s.description,
                            examples: &s.example_inputs,
                        })
                        .collect(),
                })
                .collect(),
        };

        let mut builder = self.client.post(self.url.clone()).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| OracleError::Unavailable(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Unavailable(format!(
                "oracle returned {status}"
            )));
        }

        let parsed: OracleResponseBody = response
            .json()
            .await
            .map_err(|e| OracleError::InvalidDecision(e.to_string()))?;

        tracing::debug!(
            targets = parsed.targets.len(),
            registry_version = registry.version(),
            "remote oracle decided"
        );

        Ok(RoutingDecision::new(
            parsed
                .targets
                .into_iter()
                .map(|t| TargetChoice::new(t.service_id, t.confidence, t.rationale))
                .collect(),
        ))
    }
}
