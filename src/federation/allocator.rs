//! Placement Allocator
//!
//! Selects the cluster a brand-new resource is created on. A cluster
//! qualifies when its affinity tags contain every required key/value pair;
//! ties are broken uniformly at random to spread load.

use super::cluster_registry::ClusterRegistry;
use crate::domain::ports::ClusterId;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Check whether `required` is a subset of `available`
pub fn tags_match(required: &BTreeMap<String, String>, available: &BTreeMap<String, String>) -> bool {
    required
        .iter()
        .all(|(key, value)| available.get(key) == Some(value))
}

/// Render tags as `k=v,k=v` for logs and errors
pub fn describe_tags(tags: &BTreeMap<String, String>) -> String {
    if tags.is_empty() {
        return "{}".to_string();
    }
    tags.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Cluster selection for new resources
pub struct ClusterAllocator {
    registry: Arc<ClusterRegistry>,
    rng: Mutex<StdRng>,
}

impl ClusterAllocator {
    /// Allocator seeded from OS entropy
    pub fn new(registry: Arc<ClusterRegistry>) -> Self {
        Self::with_rng(registry, StdRng::from_entropy())
    }

    /// Allocator with a fixed seed for reproducible tie-breaks
    pub fn with_seed(registry: Arc<ClusterRegistry>, seed: u64) -> Self {
        Self::with_rng(registry, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(registry: Arc<ClusterRegistry>, rng: StdRng) -> Self {
        Self {
            registry,
            rng: Mutex::new(rng),
        }
    }

    /// All clusters whose affinity tags satisfy `required`, sorted by ID
    pub fn qualified_clusters(&self, required: &BTreeMap<String, String>) -> Vec<ClusterId> {
        let mut qualified = Vec::new();

        for cluster_id in self.registry.all_ids() {
            // Removed between listing and lookup by a concurrent reconciliation
            let cluster = match self.registry.get(cluster_id.clone()) {
                Ok(cluster) => cluster,
                Err(e) => {
                    warn!("Skipping cluster {} during placement: {}", cluster_id, e);
                    continue;
                }
            };

            if tags_match(required, &cluster.affinity_tags) {
                qualified.push(cluster_id);
            }
        }

        // Registry iteration order is unspecified; sort so a seeded RNG is reproducible
        qualified.sort();
        qualified
    }

    /// Pick a cluster for a new resource
    pub fn allocate_cluster(&self, required: &BTreeMap<String, String>) -> Result<ClusterId> {
        let mut qualified = self.qualified_clusters(required);

        let selected = match qualified.len() {
            0 => {
                return Err(Error::NoQualifiedClusters {
                    tags: describe_tags(required),
                })
            }
            1 => qualified.swap_remove(0),
            n => {
                let idx = self.rng.lock().gen_range(0..n);
                qualified.swap_remove(idx)
            }
        };

        debug!(
            "Allocated cluster {} for tags {}",
            selected,
            describe_tags(required)
        );

        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterDescriptor;
    use crate::federation::cluster_registry::Cluster;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn two_region_registry() -> Arc<ClusterRegistry> {
        let registry = ClusterRegistry::new();
        let a = ClusterDescriptor::new("A", "memory").with_tag("region", "us-east");
        let b = ClusterDescriptor::new("B", "memory").with_tag("region", "us-west");
        registry.set("A", Cluster::new(&a, None));
        registry.set("B", Cluster::new(&b, None));
        registry
    }

    #[test]
    fn test_tags_match() {
        let available = tags(&[("region", "us-east"), ("tier", "ssd")]);
        assert!(tags_match(&tags(&[]), &available));
        assert!(tags_match(&tags(&[("region", "us-east")]), &available));
        assert!(!tags_match(&tags(&[("region", "eu")]), &available));
        assert!(!tags_match(&tags(&[("zone", "1")]), &available));
    }

    #[test]
    fn test_describe_tags() {
        assert_eq!(crate::federation::describe_tags(&tags(&[])), "{}");
        assert_eq!(
            describe_tags(&tags(&[("tier", "ssd"), ("region", "us-east")])),
            "region=us-east,tier=ssd"
        );
    }

    #[test]
    fn test_exact_tag_match_is_deterministic() {
        let allocator = ClusterAllocator::new(two_region_registry());
        for _ in 0..50 {
            let selected = allocator
                .allocate_cluster(&tags(&[("region", "us-east")]))
                .unwrap();
            assert_eq!(selected, "A");
        }
    }

    #[test]
    fn test_no_qualified_clusters() {
        let allocator = ClusterAllocator::new(two_region_registry());
        assert_matches!(
            allocator.allocate_cluster(&tags(&[("region", "eu")])),
            Err(Error::NoQualifiedClusters { tags }) if tags == "region=eu"
        );
    }

    #[test]
    fn test_empty_registry() {
        let allocator = ClusterAllocator::new(ClusterRegistry::new());
        assert_matches!(
            allocator.allocate_cluster(&BTreeMap::new()),
            Err(Error::NoQualifiedClusters { .. })
        );
    }

    #[test]
    fn test_empty_tags_spread_across_clusters() {
        let allocator = ClusterAllocator::with_seed(two_region_registry(), 7);
        let mut picks: HashMap<String, u32> = HashMap::new();

        for _ in 0..1000 {
            let selected = allocator.allocate_cluster(&BTreeMap::new()).unwrap();
            *picks.entry(selected.0).or_default() += 1;
        }

        assert_eq!(picks.len(), 2);
        // Uniform choice over 1000 draws stays well inside these bounds
        assert!(picks["A"] > 400 && picks["A"] < 600, "picks: {:?}", picks);
    }

    #[test]
    fn test_seeded_allocation_is_reproducible() {
        let first = ClusterAllocator::with_seed(two_region_registry(), 42);
        let second = ClusterAllocator::with_seed(two_region_registry(), 42);

        let a: Vec<_> = (0..20)
            .map(|_| first.allocate_cluster(&BTreeMap::new()).unwrap())
            .collect();
        let b: Vec<_> = (0..20)
            .map(|_| second.allocate_cluster(&BTreeMap::new()).unwrap())
            .collect();

        assert_eq!(a, b);
    }

    #[test]
    fn test_qualified_clusters_sorted() {
        let registry = ClusterRegistry::new();
        for id in ["c", "a", "b"] {
            registry.set(id, Cluster::new(&ClusterDescriptor::new(id, "memory"), None));
        }
        let allocator = ClusterAllocator::new(registry);

        assert_eq!(
            allocator.qualified_clusters(&BTreeMap::new()),
            vec![ClusterId::from("a"), ClusterId::from("b"), ClusterId::from("c")]
        );
    }
}
