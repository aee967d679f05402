//! Resource Ownership Registry
//!
//! Tracks which cluster owns each volume and snapshot. Individual calls are
//! serialized by a reader/writer lock; there is no atomicity across calls.

use crate::domain::ports::{ClusterId, ResourceType};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Ownership record for a volume or snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Globally unique resource ID
    pub id: String,
    /// Owning cluster
    pub cluster_id: ClusterId,
    /// Volume or snapshot
    pub resource_type: ResourceType,
}

impl Resource {
    pub fn volume(id: impl Into<String>, cluster_id: impl Into<ClusterId>) -> Self {
        Self {
            id: id.into(),
            cluster_id: cluster_id.into(),
            resource_type: ResourceType::Volume,
        }
    }

    pub fn snapshot(id: impl Into<String>, cluster_id: impl Into<ClusterId>) -> Self {
        Self {
            id: id.into(),
            cluster_id: cluster_id.into(),
            resource_type: ResourceType::Snapshot,
        }
    }
}

/// Counts of mapped resources by type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCounts {
    pub volumes: u64,
    pub snapshots: u64,
}

impl ResourceCounts {
    fn add(&mut self, resource_type: ResourceType) {
        match resource_type {
            ResourceType::Volume => self.volumes += 1,
            ResourceType::Snapshot => self.snapshots += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.volumes + self.snapshots
    }
}

/// Registry of resource ownership
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    resources: RwLock<HashMap<String, Resource>>,
}

impl ResourceRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert or overwrite the ownership record for `resource.id`
    ///
    /// Returns the record that was replaced, if any.
    pub fn map(&self, resource: Resource) -> Option<Resource> {
        let previous = self
            .resources
            .write()
            .insert(resource.id.clone(), resource.clone());

        if let Some(prev) = &previous {
            if prev.cluster_id != resource.cluster_id {
                debug!(
                    resource_id = %resource.id,
                    from = %prev.cluster_id,
                    to = %resource.cluster_id,
                    "Resource ownership reassigned"
                );
            }
        }

        previous
    }

    /// Insert many records under one write lock
    pub fn map_all(&self, resources: impl IntoIterator<Item = Resource>) -> usize {
        let mut map = self.resources.write();
        let mut count = 0;
        for resource in resources {
            map.insert(resource.id.clone(), resource);
            count += 1;
        }
        count
    }

    /// Remove the record for `id`; absent IDs are ignored
    pub fn unmap(&self, id: &str) -> Option<Resource> {
        self.resources.write().remove(id)
    }

    /// Owning cluster of a resource
    pub fn get_resource_cluster(&self, id: &str) -> Result<ClusterId> {
        self.get_resource(id).map(|resource| resource.cluster_id)
    }

    /// Full ownership record of a resource
    pub fn get_resource(&self, id: &str) -> Result<Resource> {
        self.resources
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ResourceUnmapped {
                resource_id: id.to_string(),
            })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resources.read().contains_key(id)
    }

    /// All resources owned by one cluster
    pub fn get_resources_of_cluster(&self, cluster_id: &ClusterId) -> Vec<Resource> {
        self.resources
            .read()
            .values()
            .filter(|resource| &resource.cluster_id == cluster_id)
            .cloned()
            .collect()
    }

    /// All resources grouped by owning cluster
    pub fn get_resources_of_all_clusters(&self) -> HashMap<ClusterId, Vec<Resource>> {
        let mut grouped: HashMap<ClusterId, Vec<Resource>> = HashMap::new();
        for resource in self.resources.read().values() {
            grouped
                .entry(resource.cluster_id.clone())
                .or_default()
                .push(resource.clone());
        }
        grouped
    }

    /// Number of mapped resources
    pub fn len(&self) -> usize {
        self.resources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counts by resource type across all clusters
    pub fn counts(&self) -> ResourceCounts {
        let mut counts = ResourceCounts::default();
        for resource in self.resources.read().values() {
            counts.add(resource.resource_type);
        }
        counts
    }

    /// Counts by resource type for each cluster
    pub fn counts_by_cluster(&self) -> HashMap<ClusterId, ResourceCounts> {
        let mut counts: HashMap<ClusterId, ResourceCounts> = HashMap::new();
        for resource in self.resources.read().values() {
            counts
                .entry(resource.cluster_id.clone())
                .or_default()
                .add(resource.resource_type);
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_map_and_lookup() {
        let registry = ResourceRegistry::new();
        registry.map(Resource::volume("vol-1", "a"));

        assert_eq!(registry.get_resource_cluster("vol-1").unwrap(), "a");
        assert_eq!(
            registry.get_resource("vol-1").unwrap().resource_type,
            ResourceType::Volume
        );
    }

    #[test]
    fn test_lookup_unmapped() {
        let registry = ResourceRegistry::new();
        assert_matches!(
            registry.get_resource_cluster("vol-404"),
            Err(Error::ResourceUnmapped { resource_id }) if resource_id == "vol-404"
        );
    }

    #[test]
    fn test_map_overwrites() {
        let registry = ResourceRegistry::new();
        assert!(registry.map(Resource::volume("vol-1", "a")).is_none());

        let previous = registry.map(Resource::volume("vol-1", "b")).unwrap();
        assert_eq!(previous.cluster_id, "a");
        assert_eq!(registry.get_resource_cluster("vol-1").unwrap(), "b");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unmap_is_idempotent() {
        let registry = ResourceRegistry::new();
        registry.map(Resource::volume("vol-1", "a"));
        registry.map(Resource::snapshot("snap-1", "a"));

        assert!(registry.unmap("vol-1").is_some());
        assert!(registry.unmap("vol-1").is_none());
        assert!(registry.unmap("never-mapped").is_none());

        assert!(!registry.contains("vol-1"));
        assert!(registry.contains("snap-1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resources_of_cluster() {
        let registry = ResourceRegistry::new();
        registry.map(Resource::volume("vol-1", "a"));
        registry.map(Resource::snapshot("snap-1", "a"));
        registry.map(Resource::volume("vol-2", "b"));

        let mut of_a: Vec<_> = registry
            .get_resources_of_cluster(&ClusterId::from("a"))
            .into_iter()
            .map(|r| r.id)
            .collect();
        of_a.sort();
        assert_eq!(of_a, vec!["snap-1", "vol-1"]);

        let grouped = registry.get_resources_of_all_clusters();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[&ClusterId::from("b")].len(), 1);
    }

    #[test]
    fn test_counts() {
        let registry = ResourceRegistry::new();
        registry.map_all(vec![
            Resource::volume("vol-1", "a"),
            Resource::volume("vol-2", "b"),
            Resource::snapshot("snap-1", "b"),
        ]);

        assert_eq!(
            registry.counts(),
            ResourceCounts {
                volumes: 2,
                snapshots: 1
            }
        );

        let by_cluster = registry.counts_by_cluster();
        assert_eq!(by_cluster[&ClusterId::from("b")].total(), 2);
        assert_eq!(by_cluster[&ClusterId::from("a")].snapshots, 0);
    }
}
