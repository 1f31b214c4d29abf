//! Versioned capability registry snapshots

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::RwLock;

use super::types::CapabilityDescriptor;

/// Immutable view of the known downstream services
///
/// Iteration follows insertion order. A snapshot never changes once
/// published; refreshes produce a new snapshot with a higher version.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRegistry {
    version: u64,
    refreshed_at: Option<DateTime<Utc>>,
    services: IndexMap<String, CapabilityDescriptor>,
}

impl CapabilityRegistry {
    /// Create an empty registry (version 0)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from descriptors; duplicate ids keep the last one
    #[must_use]
    pub fn from_descriptors(
        version: u64,
        descriptors: impl IntoIterator<Item = CapabilityDescriptor>,
    ) -> Self {
        let mut services = IndexMap::new();
        for descriptor in descriptors {
            insert_logging_conflict(&mut services, descriptor);
        }

        Self {
            version,
            refreshed_at: Some(Utc::now()),
            services,
        }
    }

    /// Snapshot version, bumped on every publish
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// When this snapshot was published
    #[must_use]
    pub const fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    /// Look up a service by id
    #[must_use]
    pub fn get(&self, service_id: &str) -> Option<&CapabilityDescriptor> {
        self.services.get(service_id)
    }

    /// Whether a service id is registered
    #[must_use]
    pub fn contains(&self, service_id: &str) -> bool {
        self.services.contains_key(service_id)
    }

    /// Iterate descriptors in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &CapabilityDescriptor> {
        self.services.values()
    }

    /// Registered service ids in insertion order
    #[must_use]
    pub fn service_ids(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }

    /// Number of registered services
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Whether both snapshots advertise the same capability set, ignoring version
    #[must_use]
    pub fn same_capabilities(&self, other: &Self) -> bool {
        self.services == other.services
    }

    /// Bracketed listing of "name: description" lines
    #[must_use]
    pub fn describe(&self) -> String {
        if self.services.is_empty() {
            return "[]".to_string();
        }

        let lines: Vec<String> = self.iter().map(CapabilityDescriptor::summary_line).collect();
        format!("[\n  {}\n]", lines.join(",\n  "))
    }

    fn with_service(&self, descriptor: CapabilityDescriptor) -> Self {
        let mut services = self.services.clone();
        insert_logging_conflict(&mut services, descriptor);

        Self {
            version: self.version + 1,
            refreshed_at: Some(Utc::now()),
            services,
        }
    }
}

fn insert_logging_conflict(
    services: &mut IndexMap<String, CapabilityDescriptor>,
    descriptor: CapabilityDescriptor,
) {
    let service_id = descriptor.service_id.clone();
    if let Some(previous) = services.insert(service_id.clone(), descriptor) {
        tracing::warn!(
            service_id = %service_id,
            previous_endpoint = %previous.endpoint_url,
            "duplicate service id, last discovered descriptor wins"
        );
    }
}

/// Process-wide owner of the current registry snapshot
///
/// Readers take an `Arc` to the current snapshot; writers publish a whole new
/// snapshot under the write lock, so a decision never observes a torn update.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry {
    current: Arc<RwLock<Arc<CapabilityRegistry>>>,
}

impl SharedRegistry {
    /// Create a shared registry holding an empty snapshot
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared registry seeded with a snapshot
    #[must_use]
    pub fn with_snapshot(snapshot: CapabilityRegistry) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }

    /// Current snapshot
    pub async fn snapshot(&self) -> Arc<CapabilityRegistry> {
        Arc::clone(&*self.current.read().await)
    }

    /// Atomically replace (or add) a single service
    ///
    /// Returns the newly published snapshot
    pub async fn register(&self, descriptor: CapabilityDescriptor) -> Arc<CapabilityRegistry> {
        let mut current = self.current.write().await;
        let service_id = descriptor.service_id.clone();
        let next = Arc::new(current.with_service(descriptor));
        *current = Arc::clone(&next);

        tracing::debug!(
            service_id = %service_id,
            version = next.version(),
            "registered service"
        );

        next
    }

    /// Replace the whole registry with the outcome of a discovery pass
    ///
    /// Services missing from `descriptors` are evicted.
    pub async fn replace_all(
        &self,
        descriptors: impl IntoIterator<Item = CapabilityDescriptor>,
    ) -> Arc<CapabilityRegistry> {
        let mut current = self.current.write().await;
        let next = Arc::new(CapabilityRegistry::from_descriptors(
            current.version() + 1,
            descriptors,
        ));

        for evicted in current.service_ids().into_iter().filter(|id| !next.contains(id)) {
            tracing::info!(service_id = %evicted, "service evicted from registry");
        }

        tracing::info!(
            version = next.version(),
            services = next.len(),
            "published registry snapshot"
        );

        *current = Arc::clone(&next);
        next
    }
}
