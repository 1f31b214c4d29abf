//! TOML configuration file loading
//!
//! Supports `~/.config/omni/router/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;
use crate::oracle::KeywordRule;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct RouterConfigFile {
    /// Downstream discovery
    #[serde(default)]
    pub discovery: DiscoveryFileConfig,

    /// Fan-out limits
    #[serde(default)]
    pub dispatch: DispatchFileConfig,

    /// Decision oracle
    #[serde(default)]
    pub oracle: OracleFileConfig,

    /// HTTP server
    #[serde(default)]
    pub server: ServerFileConfig,
}

/// Discovery configuration
#[derive(Debug, Default, Deserialize)]
pub struct DiscoveryFileConfig {
    /// Base URLs of downstream services
    pub endpoints: Option<Vec<String>>,

    /// Per-endpoint descriptor fetch timeout
    pub timeout_ms: Option<u64>,

    /// Periodic re-discovery interval; 0 disables refresh
    pub refresh_interval_secs: Option<u64>,
}

/// Dispatch configuration
#[derive(Debug, Default, Deserialize)]
pub struct DispatchFileConfig {
    /// Deadline shared by all invocations of one request
    pub request_timeout_ms: Option<u64>,

    /// Cap on concurrent downstream invocations
    pub max_concurrent_targets: Option<usize>,
}

/// Decision oracle configuration
#[derive(Debug, Default, Deserialize)]
pub struct OracleFileConfig {
    /// Remote oracle endpoint; the rule oracle is used when unset
    pub url: Option<String>,

    /// Bearer credential for the remote oracle
    pub api_key: Option<String>,

    /// Hard limit on one decision
    pub decision_timeout_ms: Option<u64>,

    /// Minimum skill-overlap score (rule oracle)
    pub min_confidence: Option<f64>,

    /// Maximum targets per decision (rule oracle)
    pub max_targets: Option<usize>,

    /// Keyword routing rules (rule oracle)
    #[serde(default)]
    pub rules: Vec<KeywordRule>,
}

/// Server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,
}

/// Load the TOML config file from the standard path
///
/// Returns `RouterConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> RouterConfigFile {
    let Some(path) = config_file_path() else {
        return RouterConfigFile::default();
    };

    if !path.exists() {
        return RouterConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            RouterConfigFile::default()
        }
    }
}

/// Read and parse an explicitly requested config file
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<RouterConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/omni/router/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("router")
            .join("config.toml")
    })
}
