//! Domain Ports - Core trait definitions for the federation gateway
//!
//! The vendor client trait is the boundary between the federation core and
//! the per-vendor adapters. Each adapter owns its own authentication, retries
//! and wire encoding; the core only sees the types defined here.

use super::context::CallContext;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Identifiers
// =============================================================================

/// Opaque unique identifier of a federated cluster
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub String);

impl ClusterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClusterId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClusterId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&String> for ClusterId {
    fn from(s: &String) -> Self {
        Self(s.clone())
    }
}

impl PartialEq<str> for ClusterId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ClusterId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Kind of a federated resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Volume,
    Snapshot,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Volume => write!(f, "volume"),
            ResourceType::Snapshot => write!(f, "snapshot"),
        }
    }
}

// =============================================================================
// Volumes
// =============================================================================

/// A block volume as reported by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    /// Globally unique volume ID (assigned by the backend)
    pub id: String,
    /// Human readable name
    pub name: String,
    /// Provisioned size in bytes
    pub size_bytes: u64,
    /// Snapshot this volume was cloned from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_snapshot_id: Option<String>,
    /// Hosts the volume is currently attached to
    #[serde(default)]
    pub attached_hosts: Vec<String>,
    /// Labels carried with the volume
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Owning cluster, stamped by the federation service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<ClusterId>,
}

/// Where a new volume's data comes from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VolumeSource {
    /// Brand-new empty volume, placed by the allocator
    #[default]
    New,
    /// Clone of an existing snapshot, placed on the snapshot's cluster
    Snapshot { snapshot_id: String },
}

/// Request to create a volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    pub name: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub source: VolumeSource,
    /// Placement constraints for brand-new volumes
    #[serde(default)]
    pub affinity_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Request to grow a volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResizeVolumeRequest {
    pub volume_id: String,
    pub new_size_bytes: u64,
}

/// Request to attach a volume to a host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachVolumeRequest {
    pub volume_id: String,
    /// Host identifier (initiator name, node name, ...)
    pub host: String,
}

/// Connection details for an attached volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub volume_id: String,
    pub host: String,
    /// Vendor-specific connection parameters
    #[serde(default)]
    pub connection: BTreeMap<String, String>,
}

/// Request to detach a volume from a host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetachVolumeRequest {
    pub volume_id: String,
    pub host: String,
}

// =============================================================================
// Snapshots
// =============================================================================

/// A point-in-time snapshot of a volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub name: String,
    /// Volume the snapshot was taken from
    pub volume_id: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<ClusterId>,
}

/// Request to snapshot a volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSnapshotRequest {
    pub name: String,
    pub volume_id: String,
}

// =============================================================================
// Vendor Client Port
// =============================================================================

/// Capability surface every federated cluster's client satisfies
#[async_trait]
pub trait VendorClient: Send + Sync {
    /// Vendor name this client speaks to
    fn vendor(&self) -> &str;

    async fn get_volume(&self, ctx: &CallContext, volume_id: &str) -> Result<Volume>;

    async fn list_volumes(&self, ctx: &CallContext) -> Result<Vec<Volume>>;

    async fn create_volume(&self, ctx: &CallContext, request: &CreateVolumeRequest)
        -> Result<Volume>;

    async fn resize_volume(&self, ctx: &CallContext, request: &ResizeVolumeRequest)
        -> Result<Volume>;

    async fn delete_volume(&self, ctx: &CallContext, volume_id: &str) -> Result<()>;

    async fn attach_volume(
        &self,
        ctx: &CallContext,
        request: &AttachVolumeRequest,
    ) -> Result<Attachment>;

    async fn detach_volume(&self, ctx: &CallContext, request: &DetachVolumeRequest) -> Result<()>;

    async fn get_snapshot(&self, ctx: &CallContext, snapshot_id: &str) -> Result<Snapshot>;

    async fn list_snapshots(&self, ctx: &CallContext) -> Result<Vec<Snapshot>>;

    async fn create_snapshot(
        &self,
        ctx: &CallContext,
        request: &CreateSnapshotRequest,
    ) -> Result<Snapshot>;

    async fn delete_snapshot(&self, ctx: &CallContext, snapshot_id: &str) -> Result<()>;

    /// Check if the backend is reachable
    async fn health_check(&self, ctx: &CallContext) -> Result<bool>;
}

impl std::fmt::Debug for dyn VendorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorClient")
            .field("vendor", &self.vendor())
            .finish()
    }
}

pub type VendorClientRef = Arc<dyn VendorClient>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type_display() {
        assert_eq!(format!("{}", ResourceType::Volume), "volume");
        assert_eq!(format!("{}", ResourceType::Snapshot), "snapshot");
    }

    #[test]
    fn test_volume_source_wire_format() {
        let source: VolumeSource =
            serde_json::from_str(r#"{"type":"snapshot","snapshot_id":"snap-1"}"#).unwrap();
        assert_eq!(
            source,
            VolumeSource::Snapshot {
                snapshot_id: "snap-1".into()
            }
        );

        let request: CreateVolumeRequest =
            serde_json::from_str(r#"{"name":"data","size_bytes":1024}"#).unwrap();
        assert_eq!(request.source, VolumeSource::New);
        assert!(request.affinity_tags.is_empty());
    }

    #[test]
    fn test_cluster_id_comparisons() {
        let id = ClusterId::from("array-east");
        assert_eq!(id, "array-east");
        assert_eq!(id.as_str(), "array-east");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""array-east""#);
    }
}
