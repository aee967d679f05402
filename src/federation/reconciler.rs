//! Reconciliation Engine
//!
//! Rebuilds the cluster registry from configuration (phase A), then re-derives
//! resource ownership from every managed cluster's inventory (phase B).
//!
//! A single cluster's failure (client construction or inventory fetch) is
//! logged and only degrades that cluster's contribution; a pass never aborts
//! because of one backend.

use super::cluster_registry::{Cluster, ClusterRegistry};
use super::resource_registry::{Resource, ResourceRegistry};
use crate::config::ConfigSourceRef;
use crate::domain::context::CallContext;
use crate::domain::ports::ClusterId;
use crate::error::{Error, Result};
use crate::metrics::GatewayMetrics;
use crate::vendors::VendorFactory;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Reconciler tuning
#[derive(Debug, Clone, Default)]
pub struct ReconcilerConfig {
    /// Keep a cluster's existing mappings when its inventory fetch fails
    ///
    /// Off by default: a failed cluster contributes an empty inventory and its
    /// mappings are swept until the next successful pass rediscovers them.
    pub preserve_on_fetch_failure: bool,
    /// Deadline for each cluster's inventory fetch
    pub fetch_timeout: Option<Duration>,
}

// =============================================================================
// Reports
// =============================================================================

/// Outcome of phase A
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterSyncReport {
    /// Clusters installed from configuration
    pub registered: Vec<ClusterId>,
    /// Clusters removed because they left the configuration
    pub removed: Vec<ClusterId>,
    /// Clusters registered without a client
    pub client_failures: Vec<ClusterId>,
}

/// Outcome of phase B
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceSyncReport {
    /// Resources (re)mapped from cluster inventories
    pub mapped: u64,
    /// Resources unmapped by the orphan and stale sweeps
    pub unmapped: u64,
    /// Clusters whose inventory could not be fetched
    pub fetch_failures: Vec<ClusterId>,
    /// The pass was cancelled before the sweeps ran
    #[serde(default)]
    pub cancelled: bool,
}

/// Full reconciliation pass summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub clusters: ClusterSyncReport,
    pub resources: ResourceSyncReport,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ReconcileReport {
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// Inventory fetched from one cluster
struct Inventory {
    cluster_id: ClusterId,
    resources: Result<Vec<Resource>>,
}

// =============================================================================
// Reconciler
// =============================================================================

/// Keeps both registries consistent with configuration and backend truth
pub struct Reconciler {
    config: ReconcilerConfig,
    source: ConfigSourceRef,
    factory: VendorFactory,
    clusters: Arc<ClusterRegistry>,
    resources: Arc<ResourceRegistry>,
    metrics: Option<GatewayMetrics>,
    last_report: parking_lot::RwLock<Option<ReconcileReport>>,
    /// Serializes passes so phases of two passes never interleave
    pass_lock: tokio::sync::Mutex<()>,
}

impl Reconciler {
    pub fn new(
        config: ReconcilerConfig,
        source: ConfigSourceRef,
        factory: VendorFactory,
        clusters: Arc<ClusterRegistry>,
        resources: Arc<ResourceRegistry>,
    ) -> Self {
        Self {
            config,
            source,
            factory,
            clusters,
            resources,
            metrics: None,
            last_report: parking_lot::RwLock::new(None),
            pass_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Record pass counts, durations and registry sizes
    pub fn with_metrics(mut self, metrics: GatewayMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Summary of the most recent successful pass
    pub fn last_report(&self) -> Option<ReconcileReport> {
        self.last_report.read().clone()
    }

    /// Run phase A then phase B
    pub async fn reconcile(&self, ctx: &CallContext) -> Result<ReconcileReport> {
        let _pass = self.pass_lock.lock().await;
        let started_at = Utc::now();

        let clusters = self.sync_clusters_locked().await?;
        let resources = self.sync_resources_locked(ctx).await;

        let report = ReconcileReport {
            clusters,
            resources,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            clusters = self.clusters.count(),
            mapped = report.resources.mapped,
            unmapped = report.resources.unmapped,
            fetch_failures = report.resources.fetch_failures.len(),
            "Reconciliation pass finished in {:?}",
            report.duration()
        );

        if let Some(metrics) = &self.metrics {
            let counts = self.resources.counts();
            metrics.reconcile_passes.inc();
            metrics
                .reconcile_duration
                .observe(report.duration().as_secs_f64());
            metrics
                .inventory_failures
                .inc_by(report.resources.fetch_failures.len() as u64);
            metrics.set_registry_sizes(self.clusters.count(), counts.volumes, counts.snapshots);
        }
        *self.last_report.write() = Some(report.clone());

        Ok(report)
    }

    /// Phase A only
    pub async fn sync_clusters(&self) -> Result<ClusterSyncReport> {
        let _pass = self.pass_lock.lock().await;
        self.sync_clusters_locked().await
    }

    /// Phase B only
    pub async fn sync_resources(&self, ctx: &CallContext) -> ResourceSyncReport {
        let _pass = self.pass_lock.lock().await;
        self.sync_resources_locked(ctx).await
    }

    async fn sync_clusters_locked(&self) -> Result<ClusterSyncReport> {
        // A configuration that cannot be loaded leaves both registries untouched
        let descriptors = self.source.load().await?;
        let mut report = ClusterSyncReport::default();

        let configured: HashSet<ClusterId> = descriptors
            .iter()
            .map(|descriptor| descriptor.cluster_id.clone())
            .collect();

        for descriptor in &descriptors {
            let client = match self.factory.create(descriptor) {
                Ok(client) => Some(client),
                Err(e) => {
                    warn!(
                        "Failed to create {} client for cluster {}: {}",
                        descriptor.vendor, descriptor.cluster_id, e
                    );
                    report.client_failures.push(descriptor.cluster_id.clone());
                    None
                }
            };

            self.clusters.set(
                descriptor.cluster_id.clone(),
                Cluster::new(descriptor, client),
            );
            report.registered.push(descriptor.cluster_id.clone());
        }

        for cluster_id in self.clusters.all_ids() {
            if configured.contains(&cluster_id) {
                continue;
            }
            match self.clusters.remove(cluster_id.clone()) {
                Ok(_) => {
                    info!("Removed cluster {} (no longer configured)", cluster_id);
                    report.removed.push(cluster_id);
                }
                Err(e) => debug!("Cluster {} already removed: {}", cluster_id, e),
            }
        }

        info!(
            "Cluster registry synced: {} registered, {} removed, {} client failures",
            report.registered.len(),
            report.removed.len(),
            report.client_failures.len()
        );

        Ok(report)
    }

    async fn sync_resources_locked(&self, ctx: &CallContext) -> ResourceSyncReport {
        let mut report = ResourceSyncReport::default();
        let managed: HashSet<ClusterId> = self.clusters.all_ids().into_iter().collect();
        // Resources mapped after this point (e.g. by a concurrent create) are
        // not in any inventory yet and must survive the stale sweep
        let known_before: HashSet<String> = self
            .resources
            .get_resources_of_all_clusters()
            .into_values()
            .flatten()
            .map(|resource| resource.id)
            .collect();

        // One concurrent fetch per cluster; latency is bounded by the slowest
        let inventories = join_all(
            managed
                .iter()
                .cloned()
                .map(|cluster_id| self.fetch_inventory(ctx, cluster_id)),
        )
        .await;

        let mut reported: HashMap<ClusterId, HashSet<String>> = HashMap::new();
        let mut failed: HashSet<ClusterId> = HashSet::new();

        for inventory in inventories {
            match inventory.resources {
                Ok(resources) => {
                    let ids = resources.iter().map(|r| r.id.clone()).collect();
                    report.mapped += self.resources.map_all(resources) as u64;
                    reported.insert(inventory.cluster_id, ids);
                }
                Err(Error::Cancelled { .. }) => {
                    debug!("Inventory fetch for cluster {} cancelled", inventory.cluster_id);
                    report.cancelled = true;
                }
                Err(e) => {
                    warn!(
                        "Inventory fetch failed for cluster {}: {}",
                        inventory.cluster_id, e
                    );
                    report.fetch_failures.push(inventory.cluster_id.clone());
                    failed.insert(inventory.cluster_id.clone());
                    reported.insert(inventory.cluster_id, HashSet::new());
                }
            }
        }

        // An interrupted fetch says nothing about what the cluster holds
        if report.cancelled || ctx.is_cancelled() {
            warn!("Resource sync cancelled, skipping stale sweep");
            report.cancelled = true;
            return report;
        }

        for (cluster_id, resources) in self.resources.get_resources_of_all_clusters() {
            let orphaned = !managed.contains(&cluster_id);
            let keep: Option<&HashSet<String>> = if orphaned {
                None
            } else if failed.contains(&cluster_id) && self.config.preserve_on_fetch_failure {
                continue;
            } else {
                reported.get(&cluster_id)
            };

            for resource in resources {
                let still_reported = keep.map_or(false, |ids| ids.contains(&resource.id));
                if still_reported || (!orphaned && !known_before.contains(&resource.id)) {
                    continue;
                }
                // Only unmap if the record still points at this cluster
                if let Ok(current) = self.resources.get_resource(&resource.id) {
                    if current.cluster_id == cluster_id {
                        self.resources.unmap(&resource.id);
                        report.unmapped += 1;
                        debug!(
                            "Unmapped {} {} from {}",
                            resource.resource_type, resource.id, cluster_id
                        );
                    }
                }
            }
        }

        report
    }

    async fn fetch_inventory(&self, ctx: &CallContext, cluster_id: ClusterId) -> Inventory {
        let resources: Result<Vec<Resource>> = async {
            let client = self.clusters.get(cluster_id.clone())?.client()?;
            let fetch = async {
                let (volumes, snapshots) =
                    futures::try_join!(client.list_volumes(ctx), client.list_snapshots(ctx))?;

                let mut resources = Vec::with_capacity(volumes.len() + snapshots.len());
                resources.extend(
                    volumes
                        .into_iter()
                        .map(|v| Resource::volume(v.id, cluster_id.clone())),
                );
                resources.extend(
                    snapshots
                        .into_iter()
                        .map(|s| Resource::snapshot(s.id, cluster_id.clone())),
                );
                Ok::<_, Error>(resources)
            };

            match self.config.fetch_timeout {
                Some(timeout) => {
                    let scoped = CallContext::with_timeout(timeout).with_token(ctx.token().clone());
                    scoped.run("fetch_inventory", fetch).await
                }
                None => ctx.run("fetch_inventory", fetch).await,
            }
        }
        .await;

        if let Ok(resources) = &resources {
            debug!("Cluster {} reported {} resources", cluster_id, resources.len());
        }

        Inventory {
            cluster_id,
            resources,
        }
    }
}

// =============================================================================
// Periodic Driver
// =============================================================================

/// Runs reconciliation passes on a fixed interval until shut down
pub struct PeriodicReconciler {
    reconciler: Arc<Reconciler>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl PeriodicReconciler {
    pub fn new(reconciler: Arc<Reconciler>, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            reconciler,
            interval,
            shutdown,
        }
    }

    /// Spawn the loop; the first pass runs one interval from now
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Periodic reconciliation stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let ctx = CallContext::new().with_token(self.shutdown.child_token());
                    if let Err(e) = self.reconciler.reconcile(&ctx).await {
                        warn!("Periodic reconciliation failed: {}", e);
                    }
                }
            }
        }
    }
}
