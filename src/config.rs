//! Cluster Configuration
//!
//! Cluster descriptors are read from a configuration source on every
//! reconciliation pass. The vendor-specific part of a descriptor is kept as an
//! opaque JSON value and only interpreted by the matching vendor adapter.

use crate::domain::ports::ClusterId;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Cluster Descriptor
// =============================================================================

/// Configuration for one federated cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    /// Unique cluster ID
    pub cluster_id: ClusterId,
    /// Vendor adapter name (e.g. "rest", "memory")
    pub vendor: String,
    /// Labels used for placement matching
    #[serde(default)]
    pub affinity_tags: BTreeMap<String, String>,
    /// Opaque vendor-specific configuration
    #[serde(default)]
    pub config: serde_json::Value,
}

impl ClusterDescriptor {
    pub fn new(cluster_id: impl Into<ClusterId>, vendor: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            vendor: vendor.into(),
            affinity_tags: BTreeMap::new(),
            config: serde_json::Value::Null,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.affinity_tags.insert(key.into(), value.into());
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

/// Top-level gateway configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub clusters: Vec<ClusterDescriptor>,
}

impl GatewayConfig {
    /// Parse a YAML document
    pub fn from_yaml(document: &str) -> Result<Self> {
        let config: GatewayConfig = serde_yaml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject descriptors the reconciler cannot register
    pub fn validate(&self) -> Result<()> {
        validate_descriptors(&self.clusters)
    }
}

fn validate_descriptors(descriptors: &[ClusterDescriptor]) -> Result<()> {
    let mut seen = HashSet::new();

    for descriptor in descriptors {
        if descriptor.cluster_id.as_str().trim().is_empty() {
            return Err(Error::Configuration("cluster_id must not be empty".into()));
        }
        if descriptor.vendor.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "cluster {} has no vendor",
                descriptor.cluster_id
            )));
        }
        if !seen.insert(&descriptor.cluster_id) {
            return Err(Error::Configuration(format!(
                "duplicate cluster_id: {}",
                descriptor.cluster_id
            )));
        }
    }

    Ok(())
}

// =============================================================================
// Configuration Sources
// =============================================================================

/// Where the reconciler loads cluster descriptors from
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn load(&self) -> Result<Vec<ClusterDescriptor>>;
}

pub type ConfigSourceRef = Arc<dyn ConfigSource>;

/// YAML file re-read on every load
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn load(&self) -> Result<Vec<ClusterDescriptor>> {
        let document = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", self.path.display(), e))
        })?;

        let config = GatewayConfig::from_yaml(&document)?;
        debug!(
            "Loaded {} cluster descriptors from {}",
            config.clusters.len(),
            self.path.display()
        );

        Ok(config.clusters)
    }
}

/// In-memory descriptor list that can be swapped at runtime
#[derive(Debug, Default)]
pub struct StaticConfigSource {
    descriptors: RwLock<Vec<ClusterDescriptor>>,
}

impl StaticConfigSource {
    pub fn new(descriptors: Vec<ClusterDescriptor>) -> Arc<Self> {
        Arc::new(Self {
            descriptors: RwLock::new(descriptors),
        })
    }

    /// Replace the descriptor list; takes effect on the next reconciliation
    pub fn replace(&self, descriptors: Vec<ClusterDescriptor>) {
        *self.descriptors.write() = descriptors;
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn load(&self) -> Result<Vec<ClusterDescriptor>> {
        let descriptors = self.descriptors.read().clone();
        validate_descriptors(&descriptors)?;
        Ok(descriptors)
    }
}
