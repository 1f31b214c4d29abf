//! Discovery client for downstream capability descriptors
//!
//! Each downstream service publishes a JSON descriptor at
//! [`DESCRIPTOR_PATH`] relative to its base URL:
//!
//! ```json
//! {
//!   "serviceId": "storage",
//!   "displayName": "Storage Optimization Agent",
//!   "endpointUrl": "http://localhost:10002/",
//!   "skills": [
//!     { "id": "find_unattached_disks", "description": "...", "tags": ["disk"], "examples": ["..."] }
//!   ]
//! }
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::Result;
use crate::registry::{CapabilityDescriptor, Skill};

/// Well-known path of the descriptor document
pub const DESCRIPTOR_PATH: &str = ".well-known/agent.json";

/// Why discovery of an endpoint failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryErrorKind {
    /// Network failure, timeout, or non-success HTTP status
    Unreachable,
    /// The document was fetched but is malformed or incomplete
    InvalidDescriptor,
}

impl fmt::Display for DiscoveryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable => write!(f, "unreachable"),
            Self::InvalidDescriptor => write!(f, "invalid descriptor"),
        }
    }
}

/// Failure to discover one endpoint
///
/// Never fatal: the endpoint is left out of the registry
#[derive(Debug, Clone, Error, Serialize)]
#[error("discovery of {endpoint} failed ({kind}): {detail}")]
pub struct DiscoveryError {
    pub endpoint: String,
    pub kind: DiscoveryErrorKind,
    pub detail: String,
}

impl DiscoveryError {
    fn unreachable(endpoint: &str, detail: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            kind: DiscoveryErrorKind::Unreachable,
            detail: detail.into(),
        }
    }

    fn invalid(endpoint: &str, detail: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            kind: DiscoveryErrorKind::InvalidDescriptor,
            detail: detail.into(),
        }
    }
}

/// Outcome of discovering a list of endpoints
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryReport {
    /// Valid descriptors, in configured endpoint order
    pub discovered: Vec<CapabilityDescriptor>,
    /// Endpoints that could not be registered
    pub failures: Vec<DiscoveryError>,
}

impl DiscoveryReport {
    /// Service ids that were discovered
    #[must_use]
    pub fn discovered_ids(&self) -> Vec<&str> {
        self.discovered
            .iter()
            .map(|d| d.service_id.as_str())
            .collect()
    }
}

/// Descriptor document as published by a downstream service
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescriptorDocument {
    #[serde(default)]
    service_id: String,
    #[serde(default, alias = "name")]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default, alias = "url", alias = "endpointURL")]
    endpoint_url: Option<String>,
    #[serde(default)]
    skills: Vec<SkillDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SkillDocument {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default, alias = "exampleInputs")]
    examples: Vec<String>,
}

/// Parse and validate a descriptor document
///
/// # Errors
///
/// Returns a description of the first problem found if the body is not
/// valid JSON or is missing required fields
pub fn parse_descriptor(body: &str) -> std::result::Result<CapabilityDescriptor, String> {
    let doc: DescriptorDocument =
        serde_json::from_str(body).map_err(|e| format!("malformed document: {e}"))?;

    let service_id = doc.service_id.trim().to_string();
    if service_id.is_empty() {
        return Err("missing serviceId".to_string());
    }

    let raw_endpoint = doc
        .endpoint_url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| "missing endpointUrl".to_string())?;
    let endpoint_url = validate_endpoint(raw_endpoint.trim())?;

    if doc.skills.is_empty() {
        return Err("descriptor declares no skills".to_string());
    }

    let mut skills = Vec::with_capacity(doc.skills.len());
    for (index, skill) in doc.skills.into_iter().enumerate() {
        let id = skill.id.trim().to_string();
        if id.is_empty() {
            return Err(format!("skill #{index} has no id"));
        }
        let description = skill
            .description
            .or_else(|| skill.name.clone())
            .unwrap_or_default();
        skills.push(Skill {
            id,
            name: skill.name,
            description,
            tags: skill.tags,
            example_inputs: skill.examples,
        });
    }

    let display_name = doc
        .display_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| service_id.clone());

    Ok(CapabilityDescriptor {
        service_id,
        display_name,
        description: doc.description,
        version: doc.version,
        endpoint_url,
        skills,
    })
}

/// Parse an absolute http(s) URL
///
/// # Errors
///
/// Returns a description if the URL is relative, has no host, or uses
/// another scheme
pub fn validate_endpoint(raw: &str) -> std::result::Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid endpoint url '{raw}': {e}"))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported endpoint scheme '{}'", url.scheme()));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(format!("endpoint url '{raw}' has no host"));
    }

    Ok(url)
}

/// Resolve the descriptor location for an endpoint base URL
///
/// # Errors
///
/// Returns a description if the base URL is not a valid http(s) URL
pub fn descriptor_url(endpoint: &str) -> std::result::Result<Url, String> {
    let mut base = validate_endpoint(endpoint)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(DESCRIPTOR_PATH)
        .map_err(|e| format!("cannot resolve descriptor path: {e}"))
}

/// Fetches capability descriptors from downstream services
#[derive(Debug, Clone)]
pub struct DiscoveryClient {
    client: reqwest::Client,
}

impl DiscoveryClient {
    /// Create a discovery client whose fetches give up after `timeout`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("beacon-router/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Create a discovery client around an existing HTTP client
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Fetch and validate the descriptor of one endpoint
    ///
    /// # Errors
    ///
    /// Returns `Unreachable` on network failure, timeout or non-success
    /// status, and `InvalidDescriptor` when the document fails validation
    pub async fn discover(
        &self,
        endpoint: &str,
    ) -> std::result::Result<CapabilityDescriptor, DiscoveryError> {
        let url = descriptor_url(endpoint).map_err(|e| DiscoveryError::unreachable(endpoint, e))?;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| DiscoveryError::unreachable(endpoint, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::unreachable(
                endpoint,
                format!("descriptor request returned {status}"),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| DiscoveryError::unreachable(endpoint, format!("failed to read body: {e}")))?;

        let descriptor =
            parse_descriptor(&body).map_err(|e| DiscoveryError::invalid(endpoint, e))?;

        tracing::debug!(
            endpoint = %endpoint,
            descriptor_url = %url,
            service_id = %descriptor.service_id,
            skills = descriptor.skills.len(),
            "discovered service"
        );

        Ok(descriptor)
    }

    /// Discover every endpoint independently and concurrently
    ///
    /// A failing endpoint never blocks the others
    pub async fn discover_all(&self, endpoints: &[String]) -> DiscoveryReport {
        let outcomes =
            futures::future::join_all(endpoints.iter().map(|e| self.discover(e))).await;

        let mut report = DiscoveryReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(descriptor) => report.discovered.push(descriptor),
                Err(e) => {
                    tracing::warn!(
                        endpoint = %e.endpoint,
                        kind = %e.kind,
                        detail = %e.detail,
                        "service discovery failed"
                    );
                    report.failures.push(e);
                }
            }
        }

        tracing::info!(
            discovered = ?report.discovered_ids(),
            failed = report.failures.len(),
            "discovery pass complete"
        );

        report
    }
}
