//! Storage Federation Gateway
//!
//! Presents many independently managed storage clusters, possibly from
//! different vendors, as a single volume and snapshot service.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                           REST API (axum)                                    │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                         Federation Service                                   │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │    Placement    │  │  Reconciliation │  │      Call Context           │  │
//! │  │    Allocator    │  │     Engine      │  │  (cancellation/deadline)    │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────────────────────┘  │
//! │           │                    │                                             │
//! │  ┌────────┴────────┐  ┌────────┴───────────────┐                            │
//! │  │ Cluster Registry│  │ Resource Ownership     │                            │
//! │  │ (id -> client)  │  │ Registry (id -> owner) │                            │
//! │  └────────┬────────┘  └────────────────────────┘                            │
//! ├───────────┴─────────────────────────────────────────────────────────────────┤
//! │                          Vendor Adapters                                     │
//! │  ┌─────────────────────────────┐  ┌─────────────────────────────────────┐   │
//! │  │      Memory (in-process)    │  │   REST (round-robin balancer)       │   │
//! │  └─────────────────────────────┘  └─────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`federation`]: Registries, placement, reconciliation and the service
//! - [`vendors`]: Vendor client adapters and their factory
//! - [`net`]: Round-robin connection balancer
//! - [`api`]: REST transport
//! - [`config`]: Cluster descriptors and configuration sources
//! - [`domain`]: Core domain types, the vendor client trait and call context
//! - [`metrics`]: Prometheus metrics
//! - [`error`]: Error types and handling

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod federation;
pub mod metrics;
pub mod net;
pub mod vendors;

// Re-export commonly used types
pub use api::{ApiServer, ApiServerConfig, RestRouter};

pub use config::{
    ClusterDescriptor, ConfigSource, ConfigSourceRef, FileConfigSource, GatewayConfig,
    StaticConfigSource,
};

pub use domain::{
    CallContext, ClusterId, CreateSnapshotRequest, CreateVolumeRequest, ResourceType, Snapshot,
    VendorClient, VendorClientRef, Volume, VolumeSource,
};

pub use error::{Error, Result};

pub use federation::{
    ClusterAllocator, ClusterRegistry, FederationConfig, FederationService, PeriodicReconciler,
    ReconcileReport, Reconciler, ReconcilerConfig, Resource, ResourceRegistry,
};

pub use metrics::GatewayMetrics;

pub use net::{RoundRobinBalancer, TcpDialer};

pub use vendors::{MemoryVendor, RestVendorClient, VendorFactory};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
