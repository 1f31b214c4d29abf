//! Error types for Beacon router

use thiserror::Error;

/// Result type alias for router operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the router
///
/// Downstream failures are not represented here: they travel as
/// [`crate::downstream::InvocationStatus`] values inside the aggregated response.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal contract violation (e.g. invoking a service absent from the registry)
    #[error("contract violation: {0}")]
    Contract(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing error
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Whether this error is a programming-contract violation
    #[must_use]
    pub const fn is_contract(&self) -> bool {
        matches!(self, Self::Contract(_))
    }
}
