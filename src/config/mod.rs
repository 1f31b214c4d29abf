//! Configuration management for Beacon router
//!
//! Precedence: CLI flags > environment > TOML file > defaults

pub mod file;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::discovery::client::validate_endpoint;
use crate::dispatch::DispatchSettings;
use crate::oracle::{KeywordRule, RuleOracle};
use crate::{Error, Result};

use file::RouterConfigFile;

/// Default API server port
pub const DEFAULT_PORT: u16 = 18800;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_DECISION_TIMEOUT: Duration = Duration::from_secs(15);

/// Beacon router configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Downstream service base URLs, in discovery order
    pub endpoints: Vec<String>,

    /// Per-endpoint descriptor fetch timeout
    pub discovery_timeout: Duration,

    /// Periodic re-discovery; `None` disables it
    pub refresh_interval: Option<Duration>,

    /// Deadline shared by the invocations of one request
    pub request_timeout: Duration,

    /// Cap on concurrent downstream invocations
    pub max_concurrent_targets: Option<usize>,

    /// Decision oracle configuration
    pub oracle: OracleConfig,

    /// HTTP API server configuration
    pub api_server: ApiServerConfig,
}

/// Decision oracle configuration
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Remote oracle endpoint; `None` selects the rule oracle
    pub url: Option<Url>,

    /// Bearer credential for the remote oracle
    pub api_key: Option<SecretString>,

    /// Hard limit on one decision
    pub decision_timeout: Duration,

    /// Keyword routing rules
    pub rules: Vec<KeywordRule>,

    /// Minimum skill-overlap score
    pub min_confidence: f64,

    /// Maximum targets per decision
    pub max_targets: usize,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port to listen on
    pub port: u16,
}

impl Config {
    /// Load configuration from the environment and a TOML file
    ///
    /// An explicit `path` must exist and parse; otherwise the standard
    /// location is used when present.
    ///
    /// # Errors
    ///
    /// Returns error if the explicit config file is unreadable or any
    /// setting is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = match path {
            Some(path) => {
                let fc = file::read_config_file(path).map_err(|e| {
                    Error::Config(format!("failed to load {}: {e}", path.display()))
                })?;
                tracing::info!(path = %path.display(), "loaded config file");
                fc
            }
            None => file::load_config_file(),
        };

        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if an environment value does not parse or the merged
    /// configuration is invalid
    pub fn from_sources(
        fc: RouterConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        // Endpoints (env > toml > none)
        let endpoints = env("ROUTER_ENDPOINTS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .or(fc.discovery.endpoints)
            .unwrap_or_default();

        let discovery_timeout = parse_env::<u64>(&env, "ROUTER_DISCOVERY_TIMEOUT_MS")?
            .or(fc.discovery.timeout_ms)
            .map_or(DEFAULT_DISCOVERY_TIMEOUT, Duration::from_millis);

        let refresh_interval = parse_env::<u64>(&env, "ROUTER_REFRESH_INTERVAL_SECS")?
            .or(fc.discovery.refresh_interval_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let request_timeout = parse_env::<u64>(&env, "ROUTER_REQUEST_TIMEOUT_MS")?
            .or(fc.dispatch.request_timeout_ms)
            .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_millis);

        let max_concurrent_targets = parse_env::<usize>(&env, "ROUTER_MAX_CONCURRENT_TARGETS")?
            .or(fc.dispatch.max_concurrent_targets);

        let oracle_url = env("ROUTER_ORACLE_URL")
            .or(fc.oracle.url)
            .filter(|u| !u.trim().is_empty())
            .map(|u| validate_endpoint(u.trim()).map_err(Error::Config))
            .transpose()?;

        let oracle = OracleConfig {
            url: oracle_url,
            api_key: env("ROUTER_ORACLE_API_KEY")
                .or(fc.oracle.api_key)
                .map(SecretString::from),
            decision_timeout: parse_env::<u64>(&env, "ROUTER_DECISION_TIMEOUT_MS")?
                .or(fc.oracle.decision_timeout_ms)
                .map_or(DEFAULT_DECISION_TIMEOUT, Duration::from_millis),
            rules: fc.oracle.rules,
            min_confidence: fc
                .oracle
                .min_confidence
                .unwrap_or(RuleOracle::DEFAULT_MIN_CONFIDENCE),
            max_targets: fc
                .oracle
                .max_targets
                .unwrap_or(RuleOracle::DEFAULT_MAX_TARGETS),
        };

        let api_server = ApiServerConfig {
            port: parse_env::<u16>(&env, "ROUTER_PORT")?
                .or(fc.server.port)
                .unwrap_or(DEFAULT_PORT),
        };

        let config = Self {
            endpoints,
            discovery_timeout,
            refresh_interval,
            request_timeout,
            max_concurrent_targets,
            oracle,
            api_server,
        };
        config.validate()?;

        Ok(config)
    }

    /// Check invariants the rest of the router relies on
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid setting
    pub fn validate(&self) -> Result<()> {
        for endpoint in &self.endpoints {
            validate_endpoint(endpoint).map_err(Error::Config)?;
        }
        if self.request_timeout.is_zero() {
            return Err(Error::Config("request timeout must be positive".to_string()));
        }
        if self.discovery_timeout.is_zero() {
            return Err(Error::Config("discovery timeout must be positive".to_string()));
        }
        if self.oracle.decision_timeout.is_zero() {
            return Err(Error::Config("decision timeout must be positive".to_string()));
        }
        if self.max_concurrent_targets == Some(0) {
            return Err(Error::Config(
                "max concurrent targets must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.oracle.min_confidence) {
            return Err(Error::Config(format!(
                "min confidence {} is outside [0, 1]",
                self.oracle.min_confidence
            )));
        }
        if self.oracle.max_targets == 0 {
            return Err(Error::Config("max targets must be positive".to_string()));
        }
        Ok(())
    }

    /// Dispatch limits derived from this configuration
    #[must_use]
    pub const fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            request_timeout: self.request_timeout,
            max_concurrent_targets: self.max_concurrent_targets,
        }
    }
}

fn parse_env<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    env(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("invalid {key} '{raw}': {e}")))
        })
        .transpose()
}
