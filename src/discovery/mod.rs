//! Downstream service discovery
//!
//! Fetches the capability descriptor each configured endpoint publishes
//! and keeps the shared registry in sync with what is reachable

pub mod client;
pub mod refresh;

pub use client::{
    DESCRIPTOR_PATH, DiscoveryClient, DiscoveryError, DiscoveryErrorKind, DiscoveryReport,
    parse_descriptor,
};
pub use refresh::{refresh, spawn_refresh_loop};
