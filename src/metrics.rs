//! Gateway Metrics
//!
//! Prometheus metrics owned by the federation service and exposed on the
//! metrics endpoint.

use crate::error::{Error, Result};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

/// Metrics for federation operations and reconciliation
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    /// Requests by operation and outcome
    pub requests: IntCounterVec,
    /// Completed reconciliation passes
    pub reconcile_passes: IntCounter,
    /// Reconciliation pass duration
    pub reconcile_duration: Histogram,
    /// Per-cluster inventory fetch failures
    pub inventory_failures: IntCounter,
    /// Clusters currently managed
    pub managed_clusters: IntGauge,
    /// Mapped resources by type
    pub mapped_resources: IntGaugeVec,
}

fn register_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics registration failed: {}", e))
}

impl GatewayMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("federation_gateway".into()), None)
            .map_err(register_error)?;

        let requests = IntCounterVec::new(
            Opts::new("requests_total", "Federation requests by operation and outcome"),
            &["operation", "outcome"],
        )
        .map_err(register_error)?;
        let reconcile_passes = IntCounter::new(
            "reconcile_passes_total",
            "Completed reconciliation passes",
        )
        .map_err(register_error)?;
        let reconcile_duration = Histogram::with_opts(HistogramOpts::new(
            "reconcile_duration_seconds",
            "Duration of reconciliation passes",
        ))
        .map_err(register_error)?;
        let inventory_failures = IntCounter::new(
            "inventory_fetch_failures_total",
            "Cluster inventory fetches that failed during reconciliation",
        )
        .map_err(register_error)?;
        let managed_clusters = IntGauge::new("managed_clusters", "Clusters currently managed")
            .map_err(register_error)?;
        let mapped_resources = IntGaugeVec::new(
            Opts::new("mapped_resources", "Resources in the ownership registry"),
            &["type"],
        )
        .map_err(register_error)?;

        registry
            .register(Box::new(requests.clone()))
            .map_err(register_error)?;
        registry
            .register(Box::new(reconcile_passes.clone()))
            .map_err(register_error)?;
        registry
            .register(Box::new(reconcile_duration.clone()))
            .map_err(register_error)?;
        registry
            .register(Box::new(inventory_failures.clone()))
            .map_err(register_error)?;
        registry
            .register(Box::new(managed_clusters.clone()))
            .map_err(register_error)?;
        registry
            .register(Box::new(mapped_resources.clone()))
            .map_err(register_error)?;

        Ok(Self {
            registry,
            requests,
            reconcile_passes,
            reconcile_duration,
            inventory_failures,
            managed_clusters,
            mapped_resources,
        })
    }

    /// Count one request outcome
    pub fn record_request<T>(&self, operation: &str, result: &Result<T>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        self.requests.with_label_values(&[operation, outcome]).inc();
    }

    /// Refresh the registry-size gauges
    pub fn set_registry_sizes(&self, clusters: usize, volumes: u64, snapshots: u64) {
        self.managed_clusters.set(clusters as i64);
        self.mapped_resources
            .with_label_values(&["volume"])
            .set(volumes as i64);
        self.mapped_resources
            .with_label_values(&["snapshot"])
            .set(snapshots as i64);
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("metrics encoding failed: {}", e)))?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_encode() {
        let metrics = GatewayMetrics::new().unwrap();
        metrics.record_request::<()>("get_volume", &Ok(()));
        metrics.record_request::<()>(
            "get_volume",
            &Err(Error::ResourceUnmapped {
                resource_id: "vol-1".into(),
            }),
        );
        metrics.set_registry_sizes(2, 5, 1);

        let (content_type, body) = metrics.encode().unwrap();
        let text = String::from_utf8(body).unwrap();

        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("federation_gateway_requests_total"));
        assert!(text.contains("outcome=\"resource_unmapped\""));
        assert!(text.contains("federation_gateway_managed_clusters 2"));
    }

    #[test]
    fn test_instances_are_independent() {
        let first = GatewayMetrics::new().unwrap();
        let second = GatewayMetrics::new().unwrap();
        first.reconcile_passes.inc();
        assert_eq!(second.reconcile_passes.get(), 0);
    }
}
