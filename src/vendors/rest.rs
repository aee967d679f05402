//! REST Array Adapter
//!
//! Talks JSON over HTTP/1.1 to a storage array's management API. Every request
//! dials through the round-robin balancer so that a dead management endpoint
//! is skipped transparently.

use crate::config::ClusterDescriptor;
use crate::domain::context::CallContext;
use crate::domain::ports::{
    AttachVolumeRequest, Attachment, CreateSnapshotRequest, CreateVolumeRequest,
    DetachVolumeRequest, ResizeVolumeRequest, Snapshot, VendorClient, Volume,
};
use crate::error::{Error, Result};
use crate::net::balancer::{EndpointStats, RoundRobinBalancer, TcpDialer};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use bytes::Bytes;
use hyper::client::conn::SendRequest;
use hyper::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HOST};
use hyper::{Body, Method, Request, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

pub const REST_VENDOR: &str = "rest";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the REST array adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestVendorConfig {
    /// Management API endpoints (host:port), all equivalent
    pub endpoints: Vec<String>,
    /// Bearer token presented on every request
    #[serde(default)]
    pub token: Option<String>,
    /// TCP connect timeout per endpoint
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Retries after a transient failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff interval between retries
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_initial_ms() -> u64 {
    200
}

impl RestVendorConfig {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            token: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            max_retries: default_max_retries(),
            retry_initial_ms: default_retry_initial_ms(),
        }
    }
}

#[derive(Serialize)]
struct ResizeBody {
    size_bytes: u64,
}

#[derive(Serialize)]
struct HostBody<'a> {
    host: &'a str,
}

// =============================================================================
// REST Vendor Client
// =============================================================================

/// Vendor client for arrays exposing the JSON management API
pub struct RestVendorClient {
    cluster_id: String,
    config: RestVendorConfig,
    balancer: RoundRobinBalancer<TcpDialer>,
}

impl std::fmt::Debug for RestVendorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Token stays out of logs
        f.debug_struct("RestVendorClient")
            .field("cluster_id", &self.cluster_id)
            .field("endpoints", &self.config.endpoints)
            .field("has_token", &self.config.token.is_some())
            .finish()
    }
}

impl RestVendorClient {
    pub fn new(cluster_id: impl Into<String>, config: RestVendorConfig) -> Result<Self> {
        let balancer = RoundRobinBalancer::tcp(
            config.endpoints.clone(),
            Duration::from_millis(config.connect_timeout_ms),
        )?;

        Ok(Self {
            cluster_id: cluster_id.into(),
            config,
            balancer,
        })
    }

    /// Build from a cluster descriptor's opaque config
    pub fn from_descriptor(descriptor: &ClusterDescriptor) -> Result<Self> {
        let config: RestVendorConfig = serde_json::from_value(descriptor.config.clone())
            .map_err(|e| {
                Error::Configuration(format!(
                    "invalid rest config for cluster {}: {}",
                    descriptor.cluster_id, e
                ))
            })?;
        Self::new(descriptor.cluster_id.as_str(), config)
    }

    /// Per-endpoint dial diagnostics
    pub fn endpoint_stats(&self) -> Vec<EndpointStats> {
        self.balancer.endpoint_stats()
    }

    /// Issue one request, retrying transient failures with backoff
    ///
    /// Failures before the request is written are always retried. Once it
    /// may have reached the backend, only idempotent methods are replayed.
    #[allow(clippy::too_many_arguments)]
    async fn send(
        &self,
        ctx: &CallContext,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        kind: &str,
        name: &str,
    ) -> Result<Bytes> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.retry_initial_ms))
            .with_max_elapsed_time(None)
            .build();

        let max_retries = self.config.max_retries;
        let idempotent = is_idempotent(&method);
        let mut attempts = 0u32;

        let retried = backoff::future::retry(policy, || {
            attempts += 1;
            let last_attempt = attempts > max_retries;
            let method = method.clone();
            let body = body.clone();

            async move {
                let retry = |e: Error, request_sent: bool| {
                    if !last_attempt && is_replay_safe(&e, request_sent, idempotent) {
                        warn!(
                            cluster = %self.cluster_id,
                            "{} failed, retrying: {}", operation, e
                        );
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                };

                match self.connect().await {
                    Ok((sender, host)) => self
                        .exchange(sender, host, method, path, body, kind, name)
                        .await
                        .map_err(|e| retry(e, true)),
                    Err(e) => Err(retry(e, false)),
                }
            }
        });

        ctx.run(operation, retried).await
    }

    /// Dial an endpoint and complete the HTTP/1.1 handshake
    async fn connect(&self) -> Result<(SendRequest<Body>, String)> {
        let conn = self.balancer.dial().await?;
        let host = conn.address().to_string();

        let (sender, connection) = hyper::client::conn::handshake(conn).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("Vendor connection closed with error: {}", e);
            }
        });

        Ok((sender, host))
    }

    #[allow(clippy::too_many_arguments)]
    async fn exchange(
        &self,
        mut sender: SendRequest<Body>,
        host: String,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        kind: &str,
        name: &str,
    ) -> Result<Bytes> {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, host)
            .header(ACCEPT, "application/json");
        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        if let Some(token) = &self.config.token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let request = builder
            .body(body.map(Body::from).unwrap_or_else(Body::empty))
            .map_err(|e| Error::Internal(format!("invalid vendor request: {}", e)))?;

        let response = sender.send_request(request).await?;
        let status = response.status();
        let payload = hyper::body::to_bytes(response.into_body()).await?;

        match status {
            s if s.is_success() => Ok(payload),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Unauthorized {
                vendor: format!("{}/{}", REST_VENDOR, self.cluster_id),
            }),
            StatusCode::NOT_FOUND => Err(Error::ResourceNotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            }),
            StatusCode::SERVICE_UNAVAILABLE => Err(Error::BackendUnavailable {
                backend: format!("{}/{}", REST_VENDOR, self.cluster_id),
            }),
            s => Err(Error::VendorOperationFailed {
                vendor: REST_VENDOR.to_string(),
                operation: path.to_string(),
                reason: format!("{}: {}", s, String::from_utf8_lossy(&payload)),
            }),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        operation: &str,
        path: &str,
        kind: &str,
        name: &str,
    ) -> Result<T> {
        let payload = self
            .send(ctx, operation, Method::GET, path, None, kind, name)
            .await?;
        Ok(serde_json::from_slice(&payload)?)
    }

    async fn send_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        operation: &str,
        method: Method,
        path: &str,
        body: &B,
        kind: &str,
        name: &str,
    ) -> Result<T> {
        let body = serde_json::to_vec(body)?;
        let payload = self
            .send(ctx, operation, method, path, Some(body), kind, name)
            .await?;
        Ok(serde_json::from_slice(&payload)?)
    }
}

fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE
    )
}

/// Whether a failed attempt may be sent again without duplicating its effect
fn is_replay_safe(error: &Error, request_sent: bool, idempotent: bool) -> bool {
    match error {
        // The backend refused the request without executing it
        Error::BackendUnavailable { .. } => true,
        e if e.is_transient() => !request_sent || idempotent,
        _ => false,
    }
}

fn volume_path(volume_id: &str) -> String {
    format!("/v1/volumes/{}", urlencoding::encode(volume_id))
}

fn snapshot_path(snapshot_id: &str) -> String {
    format!("/v1/snapshots/{}", urlencoding::encode(snapshot_id))
}

#[async_trait]
impl VendorClient for RestVendorClient {
    fn vendor(&self) -> &str {
        REST_VENDOR
    }

    async fn get_volume(&self, ctx: &CallContext, volume_id: &str) -> Result<Volume> {
        self.get_json(ctx, "get_volume", &volume_path(volume_id), "Volume", volume_id)
            .await
    }

    async fn list_volumes(&self, ctx: &CallContext) -> Result<Vec<Volume>> {
        self.get_json(ctx, "list_volumes", "/v1/volumes", "Volume", "*")
            .await
    }

    async fn create_volume(
        &self,
        ctx: &CallContext,
        request: &CreateVolumeRequest,
    ) -> Result<Volume> {
        self.send_json(
            ctx,
            "create_volume",
            Method::POST,
            "/v1/volumes",
            request,
            "Volume",
            &request.name,
        )
        .await
    }

    async fn resize_volume(
        &self,
        ctx: &CallContext,
        request: &ResizeVolumeRequest,
    ) -> Result<Volume> {
        let path = format!("{}/size", volume_path(&request.volume_id));
        self.send_json(
            ctx,
            "resize_volume",
            Method::PUT,
            &path,
            &ResizeBody {
                size_bytes: request.new_size_bytes,
            },
            "Volume",
            &request.volume_id,
        )
        .await
    }

    async fn delete_volume(&self, ctx: &CallContext, volume_id: &str) -> Result<()> {
        self.send(
            ctx,
            "delete_volume",
            Method::DELETE,
            &volume_path(volume_id),
            None,
            "Volume",
            volume_id,
        )
        .await
        .map(|_| ())
    }

    async fn attach_volume(
        &self,
        ctx: &CallContext,
        request: &AttachVolumeRequest,
    ) -> Result<Attachment> {
        let path = format!("{}/attach", volume_path(&request.volume_id));
        self.send_json(
            ctx,
            "attach_volume",
            Method::POST,
            &path,
            &HostBody {
                host: &request.host,
            },
            "Volume",
            &request.volume_id,
        )
        .await
    }

    async fn detach_volume(&self, ctx: &CallContext, request: &DetachVolumeRequest) -> Result<()> {
        let path = format!("{}/detach", volume_path(&request.volume_id));
        let body = serde_json::to_vec(&HostBody {
            host: &request.host,
        })?;
        self.send(
            ctx,
            "detach_volume",
            Method::POST,
            &path,
            Some(body),
            "Volume",
            &request.volume_id,
        )
        .await
        .map(|_| ())
    }

    async fn get_snapshot(&self, ctx: &CallContext, snapshot_id: &str) -> Result<Snapshot> {
        self.get_json(
            ctx,
            "get_snapshot",
            &snapshot_path(snapshot_id),
            "Snapshot",
            snapshot_id,
        )
        .await
    }

    async fn list_snapshots(&self, ctx: &CallContext) -> Result<Vec<Snapshot>> {
        self.get_json(ctx, "list_snapshots", "/v1/snapshots", "Snapshot", "*")
            .await
    }

    async fn create_snapshot(
        &self,
        ctx: &CallContext,
        request: &CreateSnapshotRequest,
    ) -> Result<Snapshot> {
        self.send_json(
            ctx,
            "create_snapshot",
            Method::POST,
            "/v1/snapshots",
            request,
            "Snapshot",
            &request.name,
        )
        .await
    }

    async fn delete_snapshot(&self, ctx: &CallContext, snapshot_id: &str) -> Result<()> {
        self.send(
            ctx,
            "delete_snapshot",
            Method::DELETE,
            &snapshot_path(snapshot_id),
            None,
            "Snapshot",
            snapshot_id,
        )
        .await
        .map(|_| ())
    }

    async fn health_check(&self, ctx: &CallContext) -> Result<bool> {
        match self
            .send(ctx, "health_check", Method::GET, "/v1/health", None, "Health", "")
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_transient() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
