//! Federation Core
//!
//! - Cluster registry: managed clusters and their vendor clients
//! - Resource registry: which cluster owns each volume and snapshot
//! - Allocator: affinity-tag placement for new volumes
//! - Reconciler: converges both registries with configuration and backends
//! - Service: routes every operation to the owning cluster

pub mod allocator;
pub mod cluster_registry;
pub mod reconciler;
pub mod resource_registry;
pub mod service;

pub use allocator::{describe_tags, tags_match, ClusterAllocator};
pub use cluster_registry::{Cluster, ClusterRegistry, ClusterRegistryStats};
pub use reconciler::{
    ClusterSyncReport, PeriodicReconciler, ReconcileReport, Reconciler, ReconcilerConfig,
    ResourceSyncReport,
};
pub use resource_registry::{Resource, ResourceCounts, ResourceRegistry};
pub use service::{
    ClusterFailure, ClusterSummary, FederationConfig, FederationService, FederationStatus,
    ListSnapshotsResponse, ListVolumesResponse, ResyncRequest, ResyncResponse,
};
