//! Capability descriptor types

use serde::{Deserialize, Serialize};
use url::Url;

/// A single skill advertised by a downstream service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skill {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub example_inputs: Vec<String>,
}

/// Immutable description of one downstream service and how to reach it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    /// Unique identifier across the registry
    pub service_id: String,

    /// Human-readable name
    pub display_name: String,

    /// Free-text description of the service as a whole
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Service version as advertised
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Invocation endpoint
    pub endpoint_url: Url,

    /// Declared skills, in advertised order
    pub skills: Vec<Skill>,
}

impl CapabilityDescriptor {
    /// One-line summary used in oracle prompts and logs
    #[must_use]
    pub fn summary_line(&self) -> String {
        let description = self.description.clone().unwrap_or_else(|| {
            self.skills
                .iter()
                .map(|s| s.description.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        });
        format!("{}: {description}", self.display_name)
    }
}
