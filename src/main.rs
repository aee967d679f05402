//! Storage Federation Gateway
//!
//! Presents many storage clusters as a single volume and snapshot service.
//! Clusters are described in a YAML file that is re-read on every
//! reconciliation pass, so edits take effect on `POST /v1/reload` or at the
//! next periodic pass.

use clap::Parser;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storage_federation_gateway::{
    ApiServer, ApiServerConfig, CallContext, Error, FederationConfig, FederationService,
    FileConfigSource, GatewayMetrics, PeriodicReconciler, ReconcilerConfig, Result,
    VendorFactory,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage Federation Gateway - one volume/snapshot API over many clusters
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cluster configuration file (YAML)
    #[arg(long, env = "GATEWAY_CONFIG", default_value = "/etc/federation-gateway/clusters.yaml")]
    config: PathBuf,

    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8090")]
    api_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Reconciliation interval in seconds (0 disables periodic passes)
    #[arg(long, env = "RECONCILE_INTERVAL", default_value = "300")]
    reconcile_interval_secs: u64,

    /// Per-request deadline in seconds
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "30")]
    request_timeout_secs: u64,

    /// Per-cluster inventory fetch deadline in seconds (0 means none)
    #[arg(long, env = "FETCH_TIMEOUT", default_value = "60")]
    fetch_timeout_secs: u64,

    /// Keep a cluster's mappings when its inventory fetch fails
    #[arg(long, env = "PRESERVE_ON_FETCH_FAILURE")]
    preserve_on_fetch_failure: bool,

    /// Fixed seed for placement tie-breaks
    #[arg(long, env = "ALLOCATOR_SEED")]
    allocator_seed: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;

    info!("Starting Storage Federation Gateway");
    info!("  Version: {}", storage_federation_gateway::VERSION);
    info!("  Config: {}", args.config.display());
    info!("  REST API: {}", args.api_addr);
    info!("  Reconcile interval: {}s", args.reconcile_interval_secs);

    let api_addr: SocketAddr = args
        .api_addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid REST API address: {}", e)))?;
    let metrics_addr: SocketAddr = args
        .metrics_addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid metrics address: {}", e)))?;

    let config = FederationConfig {
        reconciler: ReconcilerConfig {
            preserve_on_fetch_failure: args.preserve_on_fetch_failure,
            fetch_timeout: (args.fetch_timeout_secs > 0)
                .then(|| Duration::from_secs(args.fetch_timeout_secs)),
        },
        allocator_seed: args.allocator_seed,
    };
    let source = Arc::new(FileConfigSource::new(&args.config));
    let service = FederationService::new(config, source, VendorFactory::with_defaults())?;

    // Serve even if the first pass fails; readiness stays false until one succeeds
    match service.reload(&CallContext::new()).await {
        Ok(report) => info!(
            "Initial reconciliation: {} clusters, {} resources mapped",
            report.clusters.registered.len(),
            report.resources.mapped
        ),
        Err(e) => error!("Initial reconciliation failed: {}", e),
    }

    let shutdown = CancellationToken::new();

    let periodic = (args.reconcile_interval_secs > 0).then(|| {
        PeriodicReconciler::new(
            service.reconciler(),
            Duration::from_secs(args.reconcile_interval_secs),
            shutdown.clone(),
        )
        .spawn()
    });

    // Start metrics server
    let metrics = service.metrics().clone();
    let metrics_shutdown = shutdown.clone();
    let metrics_handle = tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, metrics, metrics_shutdown).await {
            error!("Metrics server error: {}", e);
        }
    });

    let api_server = Arc::new(ApiServer::new(
        ApiServerConfig {
            rest_addr: api_addr,
            request_timeout: Duration::from_secs(args.request_timeout_secs),
        },
        service.clone(),
    ));

    // Stop everything on ctrl-c
    {
        let api_server = api_server.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            info!("Shutdown signal received");
            shutdown.cancel();
            api_server.shutdown();
        });
    }

    let result = api_server.run().await;

    shutdown.cancel();
    if let Some(handle) = periodic {
        let _ = handle.await;
    }
    let _ = metrics_handle.await;

    info!("Gateway shutdown complete");
    result
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "tower=warn", "axum=info"] {
        filter = filter.add_directive(directive.parse().map_err(|e| {
            Error::Configuration(format!("Invalid log directive {}: {}", directive, e))
        })?);
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(
    addr: SocketAddr,
    metrics: GatewayMetrics,
    shutdown: CancellationToken,
) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let response = metrics_response(&metrics, req.uri().path());
                async move { Ok::<_, Infallible>(response) }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)?
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

fn metrics_response(metrics: &GatewayMetrics, path: &str) -> hyper::Response<hyper::Body> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::{Body, Response, StatusCode};

    let (status, content_type, body) = match path {
        "/metrics" => match metrics.encode() {
            Ok((content_type, buffer)) => (StatusCode::OK, content_type, Body::from(buffer)),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain".to_string(),
                Body::from(e.to_string()),
            ),
        },
        "/healthz" | "/livez" => (StatusCode::OK, "text/plain".to_string(), Body::from("ok")),
        _ => (
            StatusCode::NOT_FOUND,
            "text/plain".to_string(),
            Body::from("not found"),
        ),
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}
