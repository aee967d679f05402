//! Error types for the Storage Federation Gateway
//!
//! Provides structured error types for the registries, placement, vendor
//! adapters, the connection balancer and the transport boundary.

use thiserror::Error;

/// Unified error type for the gateway
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Registry Errors
    // =========================================================================
    #[error("Cluster not found: {cluster_id}")]
    ClusterNotFound { cluster_id: String },

    #[error("Resource is not mapped to any cluster: {resource_id}")]
    ResourceUnmapped { resource_id: String },

    #[error("Cluster {cluster_id} has no usable vendor client")]
    ClusterClientUnavailable { cluster_id: String },

    // =========================================================================
    // Placement Errors
    // =========================================================================
    #[error("No clusters qualify for affinity tags: {tags}")]
    NoQualifiedClusters { tags: String },

    // =========================================================================
    // Vendor Errors
    // =========================================================================
    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Backend rejected credentials: {vendor}")]
    Unauthorized { vendor: String },

    #[error("Vendor operation failed: {vendor} - {operation}: {reason}")]
    VendorOperationFailed {
        vendor: String,
        operation: String,
        reason: String,
    },

    #[error("Unknown vendor: {vendor}")]
    UnknownVendor { vendor: String },

    #[error("Backend unavailable: {backend}")]
    BackendUnavailable { backend: String },

    // =========================================================================
    // Connection Errors
    // =========================================================================
    #[error("All {endpoints} endpoints failed to dial, last error: {last_error}")]
    AllEndpointsFailed { endpoints: usize, last_error: String },

    // =========================================================================
    // Call Control Errors
    // =========================================================================
    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    // =========================================================================
    // API Errors
    // =========================================================================
    #[error("API request validation failed: {0}")]
    ApiValidation(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is transient and safe for the caller to retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::AllEndpointsFailed { .. }
                | Error::BackendUnavailable { .. }
                | Error::Timeout { .. }
                | Error::Http(_)
                | Error::Io(_)
        )
    }

    /// Check if this error is retryable at all
    pub fn is_retryable(&self) -> bool {
        match self {
            // Placement failures are never retried automatically
            Error::NoQualifiedClusters { .. } => false,

            Error::Configuration(_)
            | Error::ApiValidation(_)
            | Error::Unauthorized { .. }
            | Error::UnknownVendor { .. }
            | Error::JsonParse(_)
            | Error::YamlParse(_) => false,

            _ => self.is_transient(),
        }
    }

    /// Check if a backend reported the resource as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ResourceNotFound { .. })
    }

    /// Short machine-readable kind used on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Internal(_) => "internal",
            Error::Configuration(_) => "configuration",
            Error::ClusterNotFound { .. } => "cluster_not_found",
            Error::ResourceUnmapped { .. } => "resource_unmapped",
            Error::ClusterClientUnavailable { .. } => "cluster_client_unavailable",
            Error::NoQualifiedClusters { .. } => "no_qualified_clusters",
            Error::ResourceNotFound { .. } => "resource_not_found",
            Error::Unauthorized { .. } => "unauthorized",
            Error::VendorOperationFailed { .. } => "vendor_error",
            Error::UnknownVendor { .. } => "unknown_vendor",
            Error::BackendUnavailable { .. } => "backend_unavailable",
            Error::AllEndpointsFailed { .. } => "all_endpoints_failed",
            Error::Cancelled { .. } => "cancelled",
            Error::Timeout { .. } => "timeout",
            Error::ApiValidation(_) => "invalid_request",
            Error::JsonParse(_) | Error::YamlParse(_) => "parse_error",
            Error::Http(_) => "http_error",
            Error::Io(_) => "io_error",
        }
    }
}

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;
