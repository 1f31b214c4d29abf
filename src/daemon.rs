//! Daemon - the main router service
//!
//! Wires configuration into discovery, the decision oracle and the
//! dispatcher, then serves the HTTP façade until interrupted

use std::sync::Arc;

use tokio::sync::watch;

use crate::api::{ApiServer, ApiState};
use crate::config::OracleConfig;
use crate::discovery::{DiscoveryClient, DiscoveryReport, refresh, spawn_refresh_loop};
use crate::dispatch::Dispatcher;
use crate::downstream::DownstreamClient;
use crate::oracle::{DecisionOracle, HttpOracle, OracleAdapter, RuleOracle};
use crate::registry::SharedRegistry;
use crate::{Config, Result};

/// The Beacon router daemon
#[derive(Debug)]
pub struct Daemon {
    config: Config,
    discovery: DiscoveryClient,
    dispatcher: Dispatcher,
}

impl Daemon {
    /// Create a new daemon with an empty registry
    ///
    /// # Errors
    ///
    /// Returns error if an HTTP client cannot be built or the dispatch
    /// settings are invalid
    pub fn new(config: Config) -> Result<Self> {
        let discovery = DiscoveryClient::new(config.discovery_timeout)?;
        let oracle = build_oracle(&config.oracle)?;
        let downstream = Arc::new(DownstreamClient::new()?);

        let dispatcher = Dispatcher::new(
            SharedRegistry::new(),
            oracle,
            downstream,
            config.dispatch_settings(),
        )?;

        Ok(Self {
            config,
            discovery,
            dispatcher,
        })
    }

    /// Dispatcher routing against this daemon's registry
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run one discovery pass over the configured endpoints and publish it
    pub async fn discover(&self) -> DiscoveryReport {
        let (report, snapshot) = refresh(
            &self.discovery,
            &self.config.endpoints,
            self.dispatcher.registry(),
        )
        .await;

        if snapshot.is_empty() {
            tracing::warn!(
                endpoints = self.config.endpoints.len(),
                "no downstream services discovered"
            );
        }

        report
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the API server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let port = self.config.api_server.port;
        tracing::info!(
            port,
            endpoints = self.config.endpoints.len(),
            oracle = self.dispatcher.oracle_name(),
            "daemon running"
        );

        self.discover().await;

        // Set up shutdown signal
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("shutdown requested");
                    let _ = shutdown_tx.send(true);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to listen for ctrl-c");
                    // Keep the sender alive so the server is not stopped
                    std::future::pending::<()>().await;
                }
            }
        });

        let refresh_task = self.config.refresh_interval.map(|every| {
            spawn_refresh_loop(
                self.discovery.clone(),
                self.config.endpoints.clone(),
                self.dispatcher.registry().clone(),
                every,
                shutdown_rx.clone(),
            )
        });

        let state = ApiState::new(
            self.dispatcher.clone(),
            self.discovery.clone(),
            self.config.endpoints.clone(),
        );

        let mut server_shutdown = shutdown_rx;
        let served = ApiServer::new(state, port)
            .run(async move {
                while !*server_shutdown.borrow() {
                    if server_shutdown.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await;

        if let Some(task) = refresh_task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "refresh loop ended abnormally");
            }
        }

        tracing::info!("daemon stopped");
        served
    }
}

/// Build the decision oracle selected by configuration
///
/// A configured URL selects the remote oracle; otherwise routing falls back
/// to the local rule oracle.
///
/// # Errors
///
/// Returns error if the remote oracle's HTTP client cannot be built
pub fn build_oracle(config: &OracleConfig) -> Result<OracleAdapter> {
    let oracle: Arc<dyn DecisionOracle> = match &config.url {
        Some(url) => {
            tracing::info!(url = %url, "using remote decision oracle");
            Arc::new(HttpOracle::new(url.clone(), config.api_key.clone())?)
        }
        None => {
            tracing::info!(rules = config.rules.len(), "using rule decision oracle");
            Arc::new(
                RuleOracle::new(config.rules.clone())
                    .with_min_confidence(config.min_confidence)
                    .with_max_targets(config.max_targets),
            )
        }
    };

    Ok(OracleAdapter::new(oracle, config.decision_timeout))
}
