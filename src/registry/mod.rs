//! Capability registry for discovered downstream services
//!
//! Services advertise their skills through a discovery document; the
//! registry holds the validated descriptors as versioned snapshots that
//! routing decisions read without blocking refreshes

pub mod snapshot;
pub mod types;

pub use snapshot::{CapabilityRegistry, SharedRegistry};
pub use types::{CapabilityDescriptor, Skill};
