//! Beacon Router - single entry point in front of a fleet of agent services
//!
//! This library provides the core functionality for the Beacon router:
//! - Discovery of downstream services through their published descriptors
//! - A versioned capability registry
//! - Target selection by explicit request or a decision oracle
//! - Concurrent invocation under one shared deadline
//! - Aggregation of per-service outcomes into a single response
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Callers                          │
//! │        HTTP façade  │  CLI  │  embedding code        │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Beacon Router                        │
//! │  Registry │ Oracle │ Dispatcher │ Aggregator        │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              Downstream services                     │
//! │   compute  │  storage  │  network  │  ...           │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod aggregate;
pub mod api;
pub mod config;
pub mod daemon;
pub mod discovery;
pub mod dispatch;
pub mod downstream;
pub mod error;
pub mod oracle;
pub mod registry;
pub mod request;

pub use aggregate::{AggregateStatus, AggregatedResponse, Summary, SummarySection};
pub use config::Config;
pub use daemon::Daemon;
pub use discovery::{DiscoveryClient, DiscoveryError, DiscoveryErrorKind, DiscoveryReport};
pub use dispatch::{DispatchSettings, Dispatcher};
pub use downstream::{Downstream, DownstreamClient, InvocationResult, InvocationStatus};
pub use error::{Error, Result};
pub use oracle::{
    DecisionOracle, HttpOracle, KeywordRule, OracleAdapter, OracleError, RoutingDecision,
    RuleOracle, TargetChoice,
};
pub use registry::{CapabilityDescriptor, CapabilityRegistry, SharedRegistry, Skill};
pub use request::{Role, RoutingRequest, Turn};
