//! Downstream service invocation
//!
//! One call per target, bounded by a caller-supplied deadline. Every
//! failure mode is returned as data in an [`InvocationResult`].

pub mod client;
pub mod types;

pub use client::{Downstream, DownstreamClient, interpret_response};
pub use types::{InvocationResult, InvocationStatus};
