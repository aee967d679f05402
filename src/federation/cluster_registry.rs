//! Cluster Registry
//!
//! In-memory map from cluster ID to its live vendor client and configuration.
//! Many readers may overlap with a single in-flight writer.

use crate::config::ClusterDescriptor;
use crate::domain::ports::{ClusterId, VendorClientRef};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// =============================================================================
// Cluster
// =============================================================================

/// A federated storage cluster and its client handle
pub struct Cluster {
    /// Cluster ID
    pub id: ClusterId,
    /// Vendor name
    pub vendor: String,
    /// Labels used for placement
    pub affinity_tags: BTreeMap<String, String>,
    /// Opaque vendor configuration
    pub vendor_config: serde_json::Value,
    /// Registration timestamp
    pub registered_at: DateTime<Utc>,
    /// Live client; absent when construction failed
    client: Option<VendorClientRef>,
}

impl Cluster {
    /// Build a cluster record from its descriptor
    pub fn new(descriptor: &ClusterDescriptor, client: Option<VendorClientRef>) -> Self {
        Self {
            id: descriptor.cluster_id.clone(),
            vendor: descriptor.vendor.clone(),
            affinity_tags: descriptor.affinity_tags.clone(),
            vendor_config: descriptor.config.clone(),
            registered_at: Utc::now(),
            client,
        }
    }

    /// Get the vendor client for this cluster
    pub fn client(&self) -> Result<VendorClientRef> {
        self.client
            .clone()
            .ok_or_else(|| Error::ClusterClientUnavailable {
                cluster_id: self.id.to_string(),
            })
    }

    /// Whether a working client is installed
    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("id", &self.id)
            .field("vendor", &self.vendor)
            .field("affinity_tags", &self.affinity_tags)
            .field("has_client", &self.has_client())
            .finish()
    }
}

// =============================================================================
// Registry Statistics
// =============================================================================

/// Snapshot of registry statistics
#[derive(Debug, Clone, Default)]
pub struct ClusterRegistryStats {
    pub clusters: u64,
    pub sets: u64,
    pub removals: u64,
}

// =============================================================================
// Cluster Registry
// =============================================================================

/// Registry of managed clusters
#[derive(Default)]
pub struct ClusterRegistry {
    clusters: RwLock<HashMap<ClusterId, Arc<Cluster>>>,
    sets: AtomicU64,
    removals: AtomicU64,
}

impl ClusterRegistry {
    /// Create an empty registry
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Install or replace a cluster
    pub fn set(&self, id: impl Into<ClusterId>, cluster: Cluster) {
        self.clusters.write().insert(id.into(), Arc::new(cluster));
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove a cluster
    pub fn remove(&self, id: impl Into<ClusterId>) -> Result<Arc<Cluster>> {
        let id = id.into();
        let removed = self.clusters.write().remove(&id);

        match removed {
            Some(cluster) => {
                self.removals.fetch_add(1, Ordering::Relaxed);
                Ok(cluster)
            }
            None => Err(Error::ClusterNotFound {
                cluster_id: id.to_string(),
            }),
        }
    }

    /// Get a cluster by ID
    pub fn get(&self, id: impl Into<ClusterId>) -> Result<Arc<Cluster>> {
        let id = id.into();
        self.clusters
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::ClusterNotFound {
                cluster_id: id.to_string(),
            })
    }

    /// Check if a cluster is registered
    pub fn contains(&self, id: impl Into<ClusterId>) -> bool {
        self.clusters.read().contains_key(&id.into())
    }

    /// All registered cluster IDs, in no particular order
    pub fn all_ids(&self) -> Vec<ClusterId> {
        self.clusters.read().keys().cloned().collect()
    }

    /// Number of registered clusters
    pub fn count(&self) -> usize {
        self.clusters.read().len()
    }

    /// Get registry statistics
    pub fn stats(&self) -> ClusterRegistryStats {
        ClusterRegistryStats {
            clusters: self.count() as u64,
            sets: self.sets.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn cluster(id: &str) -> Cluster {
        Cluster::new(&ClusterDescriptor::new(id, "memory"), None)
    }

    #[test]
    fn test_get_missing_cluster() {
        let registry = ClusterRegistry::new();
        assert_matches!(
            registry.get("array-1"),
            Err(Error::ClusterNotFound { cluster_id }) if cluster_id == "array-1"
        );
    }

    #[test]
    fn test_set_and_get() {
        let registry = ClusterRegistry::new();
        let descriptor = ClusterDescriptor::new("array-1", "memory").with_tag("region", "us-east");
        registry.set("array-1", Cluster::new(&descriptor, None));

        let fetched = registry.get("array-1").unwrap();
        assert_eq!(fetched.id, "array-1");
        assert_eq!(fetched.affinity_tags.get("region").map(String::as_str), Some("us-east"));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_set_replaces() {
        let registry = ClusterRegistry::new();
        registry.set("array-1", cluster("array-1"));

        let replacement = ClusterDescriptor::new("array-1", "rest");
        registry.set("array-1", Cluster::new(&replacement, None));

        assert_eq!(registry.count(), 1);
        assert_eq!(registry.get("array-1").unwrap().vendor, "rest");
        assert_eq!(registry.stats().sets, 2);
    }

    #[test]
    fn test_remove() {
        let registry = ClusterRegistry::new();
        registry.set("array-1", cluster("array-1"));

        registry.remove("array-1").unwrap();
        assert!(!registry.contains("array-1"));
        assert_matches!(registry.remove("array-1"), Err(Error::ClusterNotFound { .. }));
        assert_eq!(registry.stats().removals, 1);
    }

    #[test]
    fn test_all_ids() {
        let registry = ClusterRegistry::new();
        registry.set("a", cluster("a"));
        registry.set("b", cluster("b"));

        let mut ids = registry.all_ids();
        ids.sort();
        assert_eq!(ids, vec![ClusterId::from("a"), ClusterId::from("b")]);
    }

    #[test]
    fn test_partially_registered_cluster() {
        let registry = ClusterRegistry::new();
        registry.set("a", cluster("a"));

        let fetched = registry.get("a").unwrap();
        assert!(!fetched.has_client());
        assert_matches!(fetched.client(), Err(Error::ClusterClientUnavailable { .. }));
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let registry = ClusterRegistry::new();
        registry.set("base", cluster("base"));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for n in 0..100 {
                        if i == 0 {
                            let id = format!("c-{}", n);
                            registry.set(id.as_str(), cluster(&id));
                        } else {
                            assert!(registry.get("base").is_ok());
                            let _ = registry.all_ids();
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.count(), 101);
    }
}
