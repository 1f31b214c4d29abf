//! Routing request types

use serde::{Deserialize, Serialize};

/// Speaker of a prior conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A prior turn of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// A caller request to be routed to one or more downstream services
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRequest {
    /// Free-text request
    pub query: String,

    /// Prior turns, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conversation_context: Vec<Turn>,

    /// Service ids to call directly, bypassing the decision oracle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit_targets: Option<Vec<String>>,
}

impl RoutingRequest {
    /// Create a request with just a query
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Attach prior conversation turns
    #[must_use]
    pub fn with_context(mut self, context: Vec<Turn>) -> Self {
        self.conversation_context = context;
        self
    }

    /// Route directly to the given services
    #[must_use]
    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.explicit_targets = Some(targets.into_iter().map(Into::into).collect());
        self
    }
}
