//! Federation Service
//!
//! Resolves the owning cluster for every volume and snapshot operation,
//! forwards the call to that cluster's vendor client and keeps the resource
//! ownership registry in step with successful vendor-side changes.
//!
//! Routing rules:
//! - By-ID operations route through the resource registry
//! - Brand-new volumes are placed by the allocator
//! - Clones and snapshots live on the cluster owning their source
//! - Listings fan out to every managed cluster (best-effort)

use super::allocator::ClusterAllocator;
use super::cluster_registry::ClusterRegistry;
use super::reconciler::{ReconcileReport, Reconciler, ReconcilerConfig, ResourceSyncReport};
use super::resource_registry::{Resource, ResourceCounts, ResourceRegistry};
use crate::config::ConfigSourceRef;
use crate::domain::context::CallContext;
use crate::domain::ports::{
    AttachVolumeRequest, Attachment, ClusterId, CreateSnapshotRequest, CreateVolumeRequest,
    DetachVolumeRequest, ResizeVolumeRequest, ResourceType, Snapshot, VendorClientRef, Volume,
    VolumeSource,
};
use crate::error::{Error, Result};
use crate::metrics::GatewayMetrics;
use crate::vendors::VendorFactory;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

// =============================================================================
// Service Configuration
// =============================================================================

/// Configuration for the federation service
#[derive(Debug, Clone, Default)]
pub struct FederationConfig {
    /// Reconciliation tuning
    pub reconciler: ReconcilerConfig,
    /// Fixed allocator seed (random when unset)
    pub allocator_seed: Option<u64>,
}

// =============================================================================
// Responses
// =============================================================================

/// A cluster that could not answer a fan-out listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterFailure {
    pub cluster_id: ClusterId,
    pub error: String,
}

/// Volumes from every cluster that answered
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListVolumesResponse {
    pub volumes: Vec<Volume>,
    pub failed_clusters: Vec<ClusterFailure>,
}

/// Snapshots from every cluster that answered
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListSnapshotsResponse {
    pub snapshots: Vec<Snapshot>,
    pub failed_clusters: Vec<ClusterFailure>,
}

/// Explicit resync of a single resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResyncRequest {
    pub resource_id: String,
    pub cluster_id: ClusterId,
    pub resource_type: ResourceType,
}

/// Result of a single-resource resync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResyncResponse {
    pub resource_id: String,
    pub cluster_id: ClusterId,
    pub resource_type: ResourceType,
    /// Whether the backend still reports the resource
    pub present: bool,
}

/// Administrative view of a managed cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub cluster_id: ClusterId,
    pub vendor: String,
    pub affinity_tags: BTreeMap<String, String>,
    pub has_client: bool,
    pub registered_at: DateTime<Utc>,
    pub resources: ResourceCounts,
}

/// Service-wide status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationStatus {
    pub clusters: usize,
    pub resources: ResourceCounts,
    pub last_reconcile: Option<ReconcileReport>,
}

/// Per-cluster batches gathered by a fan-out call
struct FanOut<T> {
    batches: Vec<(ClusterId, Vec<T>)>,
    failed: Vec<ClusterFailure>,
}

// =============================================================================
// Federation Service
// =============================================================================

/// Vendor-agnostic volume and snapshot operations over all managed clusters
pub struct FederationService {
    clusters: Arc<ClusterRegistry>,
    resources: Arc<ResourceRegistry>,
    allocator: ClusterAllocator,
    reconciler: Arc<Reconciler>,
    metrics: GatewayMetrics,
}

impl FederationService {
    /// Create a service with empty registries; call `reload` to populate them
    pub fn new(
        config: FederationConfig,
        source: ConfigSourceRef,
        factory: VendorFactory,
    ) -> Result<Arc<Self>> {
        let metrics = GatewayMetrics::new()?;
        let clusters = ClusterRegistry::new();
        let resources = ResourceRegistry::new();

        let allocator = match config.allocator_seed {
            Some(seed) => ClusterAllocator::with_seed(clusters.clone(), seed),
            None => ClusterAllocator::new(clusters.clone()),
        };
        let reconciler = Reconciler::new(
            config.reconciler,
            source,
            factory,
            clusters.clone(),
            resources.clone(),
        )
        .with_metrics(metrics.clone());

        Ok(Arc::new(Self {
            clusters,
            resources,
            allocator,
            reconciler: Arc::new(reconciler),
            metrics,
        }))
    }

    pub fn clusters(&self) -> &Arc<ClusterRegistry> {
        &self.clusters
    }

    pub fn resources(&self) -> &Arc<ResourceRegistry> {
        &self.resources
    }

    /// Shared handle for the periodic driver
    pub fn reconciler(&self) -> Arc<Reconciler> {
        self.reconciler.clone()
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    /// Look up the owning cluster of a resource
    pub fn get_resource_cluster(&self, resource_id: &str) -> Result<ClusterId> {
        self.resources.get_resource_cluster(resource_id)
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    pub async fn get_volume(&self, ctx: &CallContext, volume_id: &str) -> Result<Volume> {
        let result: Result<Volume> = async {
            let (cluster_id, client) = self.route(volume_id)?;
            let mut volume = ctx
                .run("get_volume", client.get_volume(ctx, volume_id))
                .await?;
            volume.cluster_id = Some(cluster_id);
            Ok(volume)
        }
        .await;
        self.observe("get_volume", result)
    }

    /// List volumes across all clusters, tolerating individual cluster failures
    pub async fn list_volumes(&self, ctx: &CallContext) -> Result<ListVolumesResponse> {
        let result = self
            .fan_out(ctx, "list_volumes", move |client: VendorClientRef| async move {
                client.list_volumes(ctx).await
            })
            .await
            .map(|fan_out| ListVolumesResponse {
                volumes: fan_out
                    .batches
                    .into_iter()
                    .flat_map(|(cluster_id, volumes)| {
                        volumes.into_iter().map(move |mut volume| {
                            volume.cluster_id = Some(cluster_id.clone());
                            volume
                        })
                    })
                    .collect(),
                failed_clusters: fan_out.failed,
            });
        self.observe("list_volumes", result)
    }

    /// Create a volume on an allocated cluster, or on its source snapshot's cluster
    pub async fn create_volume(
        &self,
        ctx: &CallContext,
        request: &CreateVolumeRequest,
    ) -> Result<Volume> {
        let result: Result<Volume> = async {
            if request.name.is_empty() {
                return Err(Error::ApiValidation("volume name must not be empty".into()));
            }
            if request.size_bytes == 0 {
                return Err(Error::ApiValidation("volume size must be positive".into()));
            }

            let cluster_id = match &request.source {
                VolumeSource::New => self.allocator.allocate_cluster(&request.affinity_tags)?,
                VolumeSource::Snapshot { snapshot_id } => {
                    self.resources.get_resource_cluster(snapshot_id)?
                }
            };
            let client = self.client_of(&cluster_id)?;

            let mut volume = ctx
                .run("create_volume", client.create_volume(ctx, request))
                .await?;
            self.resources
                .map(Resource::volume(volume.id.clone(), cluster_id.clone()));

            info!(
                "Created volume {} ({}) on cluster {}",
                volume.name, volume.id, cluster_id
            );
            volume.cluster_id = Some(cluster_id);
            Ok(volume)
        }
        .await;
        self.observe("create_volume", result)
    }

    pub async fn resize_volume(
        &self,
        ctx: &CallContext,
        request: &ResizeVolumeRequest,
    ) -> Result<Volume> {
        let result: Result<Volume> = async {
            let (cluster_id, client) = self.route(&request.volume_id)?;
            let mut volume = ctx
                .run("resize_volume", client.resize_volume(ctx, request))
                .await?;
            debug!(
                "Resized volume {} to {} bytes on {}",
                volume.id, volume.size_bytes, cluster_id
            );
            volume.cluster_id = Some(cluster_id);
            Ok(volume)
        }
        .await;
        self.observe("resize_volume", result)
    }

    /// Delete a volume; the mapping is dropped only after the backend confirms
    pub async fn delete_volume(&self, ctx: &CallContext, volume_id: &str) -> Result<()> {
        let result: Result<()> = async {
            let (cluster_id, client) = self.route(volume_id)?;
            ctx.run("delete_volume", client.delete_volume(ctx, volume_id))
                .await?;
            self.resources.unmap(volume_id);
            info!("Deleted volume {} from cluster {}", volume_id, cluster_id);
            Ok(())
        }
        .await;
        self.observe("delete_volume", result)
    }

    pub async fn attach_volume(
        &self,
        ctx: &CallContext,
        request: &AttachVolumeRequest,
    ) -> Result<Attachment> {
        let result: Result<Attachment> = async {
            let (_, client) = self.route(&request.volume_id)?;
            ctx.run("attach_volume", client.attach_volume(ctx, request))
                .await
        }
        .await;
        self.observe("attach_volume", result)
    }

    pub async fn detach_volume(
        &self,
        ctx: &CallContext,
        request: &DetachVolumeRequest,
    ) -> Result<()> {
        let result: Result<()> = async {
            let (_, client) = self.route(&request.volume_id)?;
            ctx.run("detach_volume", client.detach_volume(ctx, request))
                .await
        }
        .await;
        self.observe("detach_volume", result)
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub async fn get_snapshot(&self, ctx: &CallContext, snapshot_id: &str) -> Result<Snapshot> {
        let result: Result<Snapshot> = async {
            let (cluster_id, client) = self.route(snapshot_id)?;
            let mut snapshot = ctx
                .run("get_snapshot", client.get_snapshot(ctx, snapshot_id))
                .await?;
            snapshot.cluster_id = Some(cluster_id);
            Ok(snapshot)
        }
        .await;
        self.observe("get_snapshot", result)
    }

    /// List snapshots across all clusters, tolerating individual cluster failures
    pub async fn list_snapshots(&self, ctx: &CallContext) -> Result<ListSnapshotsResponse> {
        let result = self
            .fan_out(ctx, "list_snapshots", move |client: VendorClientRef| async move {
                client.list_snapshots(ctx).await
            })
            .await
            .map(|fan_out| ListSnapshotsResponse {
                snapshots: fan_out
                    .batches
                    .into_iter()
                    .flat_map(|(cluster_id, snapshots)| {
                        snapshots.into_iter().map(move |mut snapshot| {
                            snapshot.cluster_id = Some(cluster_id.clone());
                            snapshot
                        })
                    })
                    .collect(),
                failed_clusters: fan_out.failed,
            });
        self.observe("list_snapshots", result)
    }

    /// Snapshot a volume on the cluster that owns it
    pub async fn create_snapshot(
        &self,
        ctx: &CallContext,
        request: &CreateSnapshotRequest,
    ) -> Result<Snapshot> {
        let result: Result<Snapshot> = async {
            if request.name.is_empty() {
                return Err(Error::ApiValidation(
                    "snapshot name must not be empty".into(),
                ));
            }

            let (cluster_id, client) = self.route(&request.volume_id)?;
            let mut snapshot = ctx
                .run("create_snapshot", client.create_snapshot(ctx, request))
                .await?;
            self.resources
                .map(Resource::snapshot(snapshot.id.clone(), cluster_id.clone()));

            info!(
                "Created snapshot {} of volume {} on cluster {}",
                snapshot.id, request.volume_id, cluster_id
            );
            snapshot.cluster_id = Some(cluster_id);
            Ok(snapshot)
        }
        .await;
        self.observe("create_snapshot", result)
    }

    pub async fn delete_snapshot(&self, ctx: &CallContext, snapshot_id: &str) -> Result<()> {
        let result: Result<()> = async {
            let (cluster_id, client) = self.route(snapshot_id)?;
            ctx.run("delete_snapshot", client.delete_snapshot(ctx, snapshot_id))
                .await?;
            self.resources.unmap(snapshot_id);
            info!("Deleted snapshot {} from cluster {}", snapshot_id, cluster_id);
            Ok(())
        }
        .await;
        self.observe("delete_snapshot", result)
    }

    // =========================================================================
    // Resync & Administration
    // =========================================================================

    /// Map a resource to a cluster, then verify the cluster still has it
    ///
    /// A backend "not found" unmaps the resource again; any other backend error
    /// leaves the optimistic mapping in place and is returned.
    pub async fn resync_resource(
        &self,
        ctx: &CallContext,
        request: &ResyncRequest,
    ) -> Result<ResyncResponse> {
        let result: Result<ResyncResponse> = async {
            if request.resource_id.is_empty() {
                return Err(Error::ApiValidation("resource_id must not be empty".into()));
            }
            let client = self.client_of(&request.cluster_id)?;

            self.resources.map(Resource {
                id: request.resource_id.clone(),
                cluster_id: request.cluster_id.clone(),
                resource_type: request.resource_type,
            });

            let verified = match request.resource_type {
                ResourceType::Volume => ctx
                    .run(
                        "resync_resource",
                        client.get_volume(ctx, &request.resource_id),
                    )
                    .await
                    .map(|_| ()),
                ResourceType::Snapshot => ctx
                    .run(
                        "resync_resource",
                        client.get_snapshot(ctx, &request.resource_id),
                    )
                    .await
                    .map(|_| ()),
            };

            let present = match verified {
                Ok(()) => true,
                Err(e) if e.is_not_found() => {
                    // A concurrent resync may have moved it elsewhere
                    if let Ok(current) = self.resources.get_resource_cluster(&request.resource_id)
                    {
                        if current == request.cluster_id {
                            self.resources.unmap(&request.resource_id);
                        }
                    }
                    false
                }
                Err(e) => return Err(e),
            };

            info!(
                "Resynced {} {} on cluster {} (present: {})",
                request.resource_type, request.resource_id, request.cluster_id, present
            );

            Ok(ResyncResponse {
                resource_id: request.resource_id.clone(),
                cluster_id: request.cluster_id.clone(),
                resource_type: request.resource_type,
                present,
            })
        }
        .await;
        self.observe("resync_resource", result)
    }

    /// Full reconciliation pass: reload clusters, then rebuild ownership
    pub async fn reload(&self, ctx: &CallContext) -> Result<ReconcileReport> {
        let result = self.reconciler.reconcile(ctx).await;
        self.observe("reload", result)
    }

    /// Rebuild resource ownership against the current cluster set
    pub async fn resync_all(&self, ctx: &CallContext) -> Result<ResourceSyncReport> {
        let report = self.reconciler.sync_resources(ctx).await;
        self.refresh_gauges();
        self.observe("resync_all", Ok(report))
    }

    /// Summaries of every managed cluster, sorted by ID
    pub fn list_clusters(&self) -> Vec<ClusterSummary> {
        let counts = self.resources.counts_by_cluster();
        let mut cluster_ids = self.clusters.all_ids();
        cluster_ids.sort();

        cluster_ids
            .into_iter()
            .filter_map(|cluster_id| self.clusters.get(cluster_id).ok())
            .map(|cluster| ClusterSummary {
                resources: counts.get(&cluster.id).copied().unwrap_or_default(),
                cluster_id: cluster.id.clone(),
                vendor: cluster.vendor.clone(),
                affinity_tags: cluster.affinity_tags.clone(),
                has_client: cluster.has_client(),
                registered_at: cluster.registered_at,
            })
            .collect()
    }

    pub fn status(&self) -> FederationStatus {
        self.refresh_gauges();
        FederationStatus {
            clusters: self.clusters.count(),
            resources: self.resources.counts(),
            last_reconcile: self.reconciler.last_report(),
        }
    }

    /// Check every managed cluster's backend concurrently
    ///
    /// Clusters without a client, or whose health check errors, report unhealthy.
    pub async fn cluster_health(&self, ctx: &CallContext) -> BTreeMap<ClusterId, bool> {
        let checks = self.clusters.all_ids().into_iter().map(|cluster_id| async move {
            let healthy = match self.client_of(&cluster_id) {
                Ok(client) => ctx
                    .run("health_check", client.health_check(ctx))
                    .await
                    .unwrap_or_else(|e| {
                        debug!("Health check failed for cluster {}: {}", cluster_id, e);
                        false
                    }),
                Err(_) => false,
            };
            (cluster_id, healthy)
        });

        join_all(checks).await.into_iter().collect()
    }

    /// Ready once the first reconciliation pass has completed
    pub fn is_ready(&self) -> bool {
        self.reconciler.last_report().is_some()
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Resolve the owning cluster and its client for a mapped resource
    fn route(&self, resource_id: &str) -> Result<(ClusterId, VendorClientRef)> {
        let cluster_id = self.resources.get_resource_cluster(resource_id)?;
        let client = self.client_of(&cluster_id)?;
        Ok((cluster_id, client))
    }

    fn client_of(&self, cluster_id: &ClusterId) -> Result<VendorClientRef> {
        self.clusters.get(cluster_id.clone())?.client()
    }

    /// Query every managed cluster concurrently
    ///
    /// Fails only when every cluster failed (with the first error); no managed
    /// clusters yields an empty success.
    async fn fan_out<T, F, Fut>(
        &self,
        ctx: &CallContext,
        operation: &str,
        list: F,
    ) -> Result<FanOut<T>>
    where
        F: Fn(VendorClientRef) -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        let mut cluster_ids = self.clusters.all_ids();
        cluster_ids.sort();

        let list = &list;
        let results = join_all(cluster_ids.into_iter().map(|cluster_id| async move {
            let result: Result<Vec<T>> = async {
                let client = self.client_of(&cluster_id)?;
                ctx.run(operation, list(client)).await
            }
            .await;
            (cluster_id, result)
        }))
        .await;

        let total = results.len();
        let mut fan_out = FanOut {
            batches: Vec::with_capacity(total),
            failed: Vec::new(),
        };
        let mut first_error = None;

        for (cluster_id, result) in results {
            match result {
                Ok(batch) => fan_out.batches.push((cluster_id, batch)),
                Err(e) => {
                    warn!("{} failed on cluster {}: {}", operation, cluster_id, e);
                    fan_out.failed.push(ClusterFailure {
                        cluster_id,
                        error: e.to_string(),
                    });
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if fan_out.failed.len() == total => Err(e),
            _ => Ok(fan_out),
        }
    }

    fn refresh_gauges(&self) {
        let counts = self.resources.counts();
        self.metrics
            .set_registry_sizes(self.clusters.count(), counts.volumes, counts.snapshots);
    }

    fn observe<T>(&self, operation: &str, result: Result<T>) -> Result<T> {
        self.metrics.record_request(operation, &result);
        result
    }
}
