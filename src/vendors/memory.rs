//! In-Memory Array Adapter
//!
//! An in-process storage array implementing the full vendor capability
//! surface. Used for development deployments and as the backend in tests.

use crate::config::ClusterDescriptor;
use crate::domain::context::CallContext;
use crate::domain::ports::{
    AttachVolumeRequest, Attachment, CreateSnapshotRequest, CreateVolumeRequest,
    DetachVolumeRequest, ResizeVolumeRequest, Snapshot, VendorClient, Volume, VolumeSource,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

pub const MEMORY_VENDOR: &str = "memory";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the in-memory array
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryVendorConfig {
    /// Prefix for generated resource IDs (defaults to the cluster ID)
    pub id_prefix: Option<String>,
    /// Largest volume the array accepts
    pub max_volume_bytes: Option<u64>,
    /// Simulated response time of inventory listings
    pub list_latency_ms: Option<u64>,
}

// =============================================================================
// Memory Vendor
// =============================================================================

/// In-process storage array
#[derive(Debug)]
pub struct MemoryVendor {
    prefix: String,
    config: MemoryVendorConfig,
    volumes: DashMap<String, Volume>,
    snapshots: DashMap<String, Snapshot>,
    next_id: AtomicU64,
    /// When false every call fails as if the array were unreachable
    available: AtomicBool,
}

impl MemoryVendor {
    /// Create an array whose IDs start with `prefix`
    pub fn new(prefix: impl Into<String>, config: MemoryVendorConfig) -> Self {
        let prefix = config.id_prefix.clone().unwrap_or_else(|| prefix.into());
        Self {
            prefix,
            config,
            volumes: DashMap::new(),
            snapshots: DashMap::new(),
            next_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
        }
    }

    /// Build from a cluster descriptor's opaque config
    pub fn from_descriptor(descriptor: &ClusterDescriptor) -> Result<Self> {
        let config: MemoryVendorConfig = if descriptor.config.is_null() {
            MemoryVendorConfig::default()
        } else {
            serde_json::from_value(descriptor.config.clone()).map_err(|e| {
                Error::Configuration(format!(
                    "invalid memory config for cluster {}: {}",
                    descriptor.cluster_id, e
                ))
            })?
        };
        Ok(Self::new(descriptor.cluster_id.as_str(), config))
    }

    /// Simulate the array going offline or coming back
    pub fn set_available(&self, available: bool) {
        info!("Memory array {} available: {}", self.prefix, available);
        self.available.store(available, Ordering::SeqCst);
    }

    /// Place a volume directly on the array, bypassing the gateway
    pub fn seed_volume(&self, volume: Volume) {
        self.volumes.insert(volume.id.clone(), volume);
    }

    /// Place a snapshot directly on the array, bypassing the gateway
    pub fn seed_snapshot(&self, snapshot: Snapshot) {
        self.snapshots.insert(snapshot.id.clone(), snapshot);
    }

    /// Remove a volume directly from the array
    pub fn evict_volume(&self, volume_id: &str) -> Option<Volume> {
        self.volumes.remove(volume_id).map(|(_, volume)| volume)
    }

    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    fn generate_id(&self, kind: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{:06}", self.prefix, kind, n)
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::BackendUnavailable {
                backend: format!("{}/{}", MEMORY_VENDOR, self.prefix),
            })
        }
    }

    fn failed(&self, operation: &str, reason: impl Into<String>) -> Error {
        Error::VendorOperationFailed {
            vendor: MEMORY_VENDOR.to_string(),
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    async fn list_latency(&self) {
        if let Some(ms) = self.config.list_latency_ms {
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        }
    }

    fn check_size(&self, operation: &str, size_bytes: u64) -> Result<()> {
        if size_bytes == 0 {
            return Err(self.failed(operation, "size must be greater than zero"));
        }
        if let Some(max) = self.config.max_volume_bytes {
            if size_bytes > max {
                return Err(self.failed(
                    operation,
                    format!("size {} exceeds array limit {}", size_bytes, max),
                ));
            }
        }
        Ok(())
    }
}

fn volume_not_found(volume_id: &str) -> Error {
    Error::ResourceNotFound {
        kind: "Volume".into(),
        name: volume_id.into(),
    }
}

fn snapshot_not_found(snapshot_id: &str) -> Error {
    Error::ResourceNotFound {
        kind: "Snapshot".into(),
        name: snapshot_id.into(),
    }
}

#[async_trait]
impl VendorClient for MemoryVendor {
    fn vendor(&self) -> &str {
        MEMORY_VENDOR
    }

    async fn get_volume(&self, _ctx: &CallContext, volume_id: &str) -> Result<Volume> {
        self.check_available()?;
        self.volumes
            .get(volume_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| volume_not_found(volume_id))
    }

    async fn list_volumes(&self, _ctx: &CallContext) -> Result<Vec<Volume>> {
        self.check_available()?;
        // Listings reflect the array as of the call, not the response
        let volumes = self.volumes.iter().map(|entry| entry.value().clone()).collect();
        self.list_latency().await;
        Ok(volumes)
    }

    async fn create_volume(
        &self,
        _ctx: &CallContext,
        request: &CreateVolumeRequest,
    ) -> Result<Volume> {
        self.check_available()?;

        let (size_bytes, source_snapshot_id) = match &request.source {
            VolumeSource::New => (request.size_bytes, None),
            VolumeSource::Snapshot { snapshot_id } => {
                let snapshot = self
                    .snapshots
                    .get(snapshot_id)
                    .map(|entry| entry.value().clone())
                    .ok_or_else(|| snapshot_not_found(snapshot_id))?;
                (
                    request.size_bytes.max(snapshot.size_bytes),
                    Some(snapshot.id),
                )
            }
        };
        self.check_size("create_volume", size_bytes)?;

        let volume = Volume {
            id: self.generate_id("vol"),
            name: request.name.clone(),
            size_bytes,
            source_snapshot_id,
            attached_hosts: Vec::new(),
            labels: request.labels.clone(),
            created_at: chrono::Utc::now(),
            cluster_id: None,
        };
        self.volumes.insert(volume.id.clone(), volume.clone());

        debug!("Memory array created volume {} ({} bytes)", volume.id, size_bytes);
        Ok(volume)
    }

    async fn resize_volume(
        &self,
        _ctx: &CallContext,
        request: &ResizeVolumeRequest,
    ) -> Result<Volume> {
        self.check_available()?;
        self.check_size("resize_volume", request.new_size_bytes)?;

        let mut volume = self
            .volumes
            .get_mut(&request.volume_id)
            .ok_or_else(|| volume_not_found(&request.volume_id))?;

        if request.new_size_bytes < volume.size_bytes {
            return Err(self.failed(
                "resize_volume",
                format!(
                    "cannot shrink volume from {} to {} bytes",
                    volume.size_bytes, request.new_size_bytes
                ),
            ));
        }

        volume.size_bytes = request.new_size_bytes;
        Ok(volume.clone())
    }

    async fn delete_volume(&self, _ctx: &CallContext, volume_id: &str) -> Result<()> {
        self.check_available()?;

        let volume = self
            .volumes
            .get(volume_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| volume_not_found(volume_id))?;

        if !volume.attached_hosts.is_empty() {
            return Err(self.failed(
                "delete_volume",
                format!("volume is attached to {}", volume.attached_hosts.join(",")),
            ));
        }
        if self
            .snapshots
            .iter()
            .any(|entry| entry.value().volume_id == volume_id)
        {
            return Err(self.failed("delete_volume", "volume has dependent snapshots"));
        }

        self.volumes.remove(volume_id);
        Ok(())
    }

    async fn attach_volume(
        &self,
        _ctx: &CallContext,
        request: &AttachVolumeRequest,
    ) -> Result<Attachment> {
        self.check_available()?;

        let mut volume = self
            .volumes
            .get_mut(&request.volume_id)
            .ok_or_else(|| volume_not_found(&request.volume_id))?;

        if !volume.attached_hosts.contains(&request.host) {
            volume.attached_hosts.push(request.host.clone());
        }

        let mut connection = BTreeMap::new();
        connection.insert("protocol".to_string(), "loopback".to_string());
        connection.insert("target".to_string(), format!("{}:{}", self.prefix, volume.id));

        Ok(Attachment {
            volume_id: volume.id.clone(),
            host: request.host.clone(),
            connection,
        })
    }

    async fn detach_volume(&self, _ctx: &CallContext, request: &DetachVolumeRequest) -> Result<()> {
        self.check_available()?;

        let mut volume = self
            .volumes
            .get_mut(&request.volume_id)
            .ok_or_else(|| volume_not_found(&request.volume_id))?;

        let before = volume.attached_hosts.len();
        volume.attached_hosts.retain(|host| host != &request.host);
        if volume.attached_hosts.len() == before {
            return Err(self.failed(
                "detach_volume",
                format!("volume is not attached to {}", request.host),
            ));
        }
        Ok(())
    }

    async fn get_snapshot(&self, _ctx: &CallContext, snapshot_id: &str) -> Result<Snapshot> {
        self.check_available()?;
        self.snapshots
            .get(snapshot_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| snapshot_not_found(snapshot_id))
    }

    async fn list_snapshots(&self, _ctx: &CallContext) -> Result<Vec<Snapshot>> {
        self.check_available()?;
        let snapshots = self
            .snapshots
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.list_latency().await;
        Ok(snapshots)
    }

    async fn create_snapshot(
        &self,
        _ctx: &CallContext,
        request: &CreateSnapshotRequest,
    ) -> Result<Snapshot> {
        self.check_available()?;

        let size_bytes = self
            .volumes
            .get(&request.volume_id)
            .map(|entry| entry.value().size_bytes)
            .ok_or_else(|| volume_not_found(&request.volume_id))?;

        let snapshot = Snapshot {
            id: self.generate_id("snap"),
            name: request.name.clone(),
            volume_id: request.volume_id.clone(),
            size_bytes,
            created_at: chrono::Utc::now(),
            cluster_id: None,
        };
        self.snapshots.insert(snapshot.id.clone(), snapshot.clone());
        Ok(snapshot)
    }

    async fn delete_snapshot(&self, _ctx: &CallContext, snapshot_id: &str) -> Result<()> {
        self.check_available()?;
        self.snapshots
            .remove(snapshot_id)
            .map(|_| ())
            .ok_or_else(|| snapshot_not_found(snapshot_id))
    }

    async fn health_check(&self, _ctx: &CallContext) -> Result<bool> {
        Ok(self.available.load(Ordering::SeqCst))
    }
}

/// Shared handle type used when a test or embedder keeps its own reference
pub type MemoryVendorRef = Arc<MemoryVendor>;
