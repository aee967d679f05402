//! Vendor Adapters
//!
//! Provides vendor client adapters:
//! - Memory: in-process array for development and tests
//! - REST: JSON management API reached through the round-robin balancer
//!
//! New vendors are added by registering a constructor with the factory; the
//! federation core never needs to change.

pub mod memory;
pub mod rest;

pub use memory::*;
pub use rest::*;

use crate::config::ClusterDescriptor;
use crate::domain::ports::{ClusterId, VendorClientRef};
use crate::error::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds a vendor client from a cluster descriptor
pub type VendorConstructor =
    Arc<dyn Fn(&ClusterDescriptor) -> Result<VendorClientRef> + Send + Sync>;

/// Factory for creating vendor clients by vendor name
#[derive(Clone, Default)]
pub struct VendorFactory {
    constructors: BTreeMap<String, VendorConstructor>,
}

impl VendorFactory {
    /// Factory with no vendors registered
    pub fn empty() -> Self {
        Self::default()
    }

    /// Factory with the built-in adapters
    pub fn with_defaults() -> Self {
        let mut factory = Self::empty();

        // In-memory arrays outlive reloads, like a real array would
        let arrays: Arc<DashMap<ClusterId, MemoryVendorRef>> = Arc::default();
        factory.register(MEMORY_VENDOR, move |descriptor| {
            let array = match arrays.entry(descriptor.cluster_id.clone()) {
                Entry::Occupied(entry) => entry.get().clone(),
                Entry::Vacant(entry) => entry
                    .insert(Arc::new(MemoryVendor::from_descriptor(descriptor)?))
                    .value()
                    .clone(),
            };
            Ok(array as VendorClientRef)
        });
        factory.register(REST_VENDOR, |descriptor| {
            Ok(Arc::new(RestVendorClient::from_descriptor(descriptor)?) as VendorClientRef)
        });
        factory
    }

    /// Register (or replace) the constructor for a vendor name
    pub fn register<F>(&mut self, vendor: &str, constructor: F)
    where
        F: Fn(&ClusterDescriptor) -> Result<VendorClientRef> + Send + Sync + 'static,
    {
        self.constructors
            .insert(vendor.to_lowercase(), Arc::new(constructor));
    }

    /// Create a client for a cluster descriptor
    pub fn create(&self, descriptor: &ClusterDescriptor) -> Result<VendorClientRef> {
        let constructor = self
            .constructors
            .get(&descriptor.vendor.to_lowercase())
            .ok_or_else(|| Error::UnknownVendor {
                vendor: descriptor.vendor.clone(),
            })?;
        constructor(descriptor)
    }

    /// Registered vendor names
    pub fn vendors(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }
}

impl std::fmt::Debug for VendorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorFactory")
            .field("vendors", &self.vendors())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_default_vendors() {
        let factory = VendorFactory::with_defaults();
        assert_eq!(factory.vendors(), vec!["memory", "rest"]);

        let client = factory
            .create(&ClusterDescriptor::new("a", "Memory"))
            .unwrap();
        assert_eq!(client.vendor(), MEMORY_VENDOR);
        assert!(format!("{:?}", client).contains("memory"));
    }

    #[test]
    fn test_rest_client_debug_hides_token() {
        let descriptor = ClusterDescriptor::new("a", "rest").with_config(serde_json::json!({
            "endpoints": ["127.0.0.1:1"],
            "token": "s3cret"
        }));
        let client = rest::RestVendorClient::from_descriptor(&descriptor).unwrap();

        let rendered = format!("{:?}", client);
        assert!(rendered.contains("127.0.0.1:1"));
        assert!(rendered.contains("has_token: true"));
        assert!(!rendered.contains("s3cret"));
    }

    #[tokio::test]
    async fn test_memory_arrays_survive_recreation() {
        use crate::domain::context::CallContext;
        use crate::domain::ports::{CreateVolumeRequest, VolumeSource};

        let factory = VendorFactory::with_defaults();
        let descriptor = ClusterDescriptor::new("a", "memory");
        let ctx = CallContext::new();

        let first = factory.create(&descriptor).unwrap();
        first
            .create_volume(
                &ctx,
                &CreateVolumeRequest {
                    name: "db".into(),
                    size_bytes: 1024,
                    source: VolumeSource::New,
                    affinity_tags: BTreeMap::new(),
                    labels: BTreeMap::new(),
                },
            )
            .await
            .unwrap();

        let second = factory.create(&descriptor).unwrap();
        assert_eq!(second.list_volumes(&ctx).await.unwrap().len(), 1);

        let other = factory.create(&ClusterDescriptor::new("b", "memory")).unwrap();
        assert!(other.list_volumes(&ctx).await.unwrap().is_empty());
    }

    #[test]
    fn test_unknown_vendor() {
        let factory = VendorFactory::with_defaults();
        assert_matches!(
            factory.create(&ClusterDescriptor::new("a", "netapp")),
            Err(Error::UnknownVendor { vendor }) if vendor == "netapp"
        );
    }

    #[test]
    fn test_register_custom_vendor() {
        let shared = Arc::new(MemoryVendor::new("shared", MemoryVendorConfig::default()));
        let mut factory = VendorFactory::empty();

        let handle = shared.clone();
        factory.register("custom", move |_| Ok(handle.clone() as VendorClientRef));

        let client = factory
            .create(&ClusterDescriptor::new("a", "custom"))
            .unwrap();
        assert_eq!(client.vendor(), MEMORY_VENDOR);
        assert_eq!(Arc::strong_count(&shared), 3);
    }
}
