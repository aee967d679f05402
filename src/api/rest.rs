//! REST API Handlers
//!
//! Parses wire requests into federation requests, invokes the matching
//! service operation and maps error kinds to HTTP status codes.

use crate::domain::context::CallContext;
use crate::domain::ports::{
    AttachVolumeRequest, CreateSnapshotRequest, CreateVolumeRequest, DetachVolumeRequest,
    ResizeVolumeRequest, VolumeSource,
};
use crate::error::{Error, Result};
use crate::federation::{FederationService, ResyncRequest};
use axum::{
    extract::{rejection::JsonRejection, Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Volume create request
///
/// The size is given either in bytes or as a capacity string such as `100Gi`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVolumeBody {
    pub name: String,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub capacity: Option<String>,
    #[serde(default)]
    pub source: VolumeSource,
    #[serde(default)]
    pub affinity_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl CreateVolumeBody {
    fn into_request(self) -> Result<CreateVolumeRequest> {
        let size_bytes = resolve_size(self.size_bytes, self.capacity.as_deref())?;
        Ok(CreateVolumeRequest {
            name: self.name,
            size_bytes,
            source: self.source,
            affinity_tags: self.affinity_tags,
            labels: self.labels,
        })
    }
}

/// Volume resize request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResizeVolumeBody {
    #[serde(default)]
    pub new_size_bytes: Option<u64>,
    #[serde(default)]
    pub capacity: Option<String>,
}

/// Attach or detach request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostBody {
    pub host: String,
}

/// Resource ownership lookup response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceOwnerResponse {
    pub resource_id: String,
    pub cluster_id: String,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// HTTP status for a federation error
pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::ClusterNotFound { .. }
        | Error::ResourceUnmapped { .. }
        | Error::ResourceNotFound { .. } => StatusCode::NOT_FOUND,
        Error::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        Error::NoQualifiedClusters { .. } => StatusCode::CONFLICT,
        Error::ApiValidation(_) | Error::Configuration(_) => StatusCode::BAD_REQUEST,
        Error::AllEndpointsFailed { .. }
        | Error::BackendUnavailable { .. }
        | Error::ClusterClientUnavailable { .. }
        | Error::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        Error::VendorOperationFailed { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Federation error rendered as `{error, message}`
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::ApiValidation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            debug!("Request rejected: {}", self.0);
        }

        (
            status,
            Json(ApiErrorResponse {
                error: self.0.kind().into(),
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    service: Arc<FederationService>,
    request_timeout: Duration,
}

impl RestRouter {
    /// Create a new REST router
    pub fn new(service: Arc<FederationService>, request_timeout: Duration) -> Self {
        Self {
            service,
            request_timeout,
        }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            service: self.service,
            request_timeout: self.request_timeout,
        };

        Router::new()
            // Volume endpoints
            .route("/v1/volumes", get(list_volumes).post(create_volume))
            .route("/v1/volumes/:id", get(get_volume).delete(delete_volume))
            .route("/v1/volumes/:id/size", put(resize_volume))
            .route("/v1/volumes/:id/attach", post(attach_volume))
            .route("/v1/volumes/:id/detach", post(detach_volume))
            // Snapshot endpoints
            .route("/v1/snapshots", get(list_snapshots).post(create_snapshot))
            .route("/v1/snapshots/:id", get(get_snapshot).delete(delete_snapshot))
            // Ownership and administration
            .route("/v1/resources/:id", get(get_resource_owner))
            .route("/v1/resync", post(resync_resource))
            .route("/v1/resync/all", post(resync_all))
            .route("/v1/reload", post(reload))
            .route("/v1/clusters", get(list_clusters))
            .route("/v1/clusters/health", get(cluster_health))
            .route("/v1/status", get(status))
            // Health endpoints
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    service: Arc<FederationService>,
    request_timeout: Duration,
}

impl AppState {
    /// Per-request context bounded by the configured timeout
    fn context(&self) -> CallContext {
        CallContext::with_timeout(self.request_timeout).with_request_id(request_id())
    }
}

// =============================================================================
// Volume Handlers
// =============================================================================

async fn list_volumes(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let response = state.service.list_volumes(&state.context()).await?;
    Ok(Json(response))
}

async fn create_volume(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CreateVolumeBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = payload?;
    let request = body.into_request()?;
    let volume = state
        .service
        .create_volume(&state.context(), &request)
        .await?;
    Ok((StatusCode::CREATED, Json(volume)))
}

async fn get_volume(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let volume = state.service.get_volume(&state.context(), &id).await?;
    Ok(Json(volume))
}

async fn delete_volume(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.service.delete_volume(&state.context(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn resize_volume(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<ResizeVolumeBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = payload?;
    let request = ResizeVolumeRequest {
        volume_id: id,
        new_size_bytes: resolve_size(body.new_size_bytes, body.capacity.as_deref())?,
    };
    let volume = state
        .service
        .resize_volume(&state.context(), &request)
        .await?;
    Ok(Json(volume))
}

async fn attach_volume(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<HostBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = payload?;
    let request = AttachVolumeRequest {
        volume_id: id,
        host: body.host,
    };
    let attachment = state
        .service
        .attach_volume(&state.context(), &request)
        .await?;
    Ok(Json(attachment))
}

async fn detach_volume(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<HostBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = payload?;
    let request = DetachVolumeRequest {
        volume_id: id,
        host: body.host,
    };
    state
        .service
        .detach_volume(&state.context(), &request)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Snapshot Handlers
// =============================================================================

async fn list_snapshots(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let response = state.service.list_snapshots(&state.context()).await?;
    Ok(Json(response))
}

async fn create_snapshot(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CreateSnapshotRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let snapshot = state
        .service
        .create_snapshot(&state.context(), &request)
        .await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn get_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let snapshot = state.service.get_snapshot(&state.context(), &id).await?;
    Ok(Json(snapshot))
}

async fn delete_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.service.delete_snapshot(&state.context(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Administration Handlers
// =============================================================================

async fn get_resource_owner(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let cluster_id = state.service.get_resource_cluster(&id)?;
    Ok(Json(ResourceOwnerResponse {
        resource_id: id,
        cluster_id: cluster_id.to_string(),
    }))
}

async fn resync_resource(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ResyncRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let response = state
        .service
        .resync_resource(&state.context(), &request)
        .await?;
    Ok(Json(response))
}

async fn resync_all(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let report = state.service.resync_all(&state.context()).await?;
    Ok(Json(report))
}

async fn reload(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let report = state.service.reload(&state.context()).await?;
    Ok(Json(report))
}

async fn list_clusters(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.list_clusters())
}

async fn cluster_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.cluster_health(&state.context()).await)
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.status())
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "healthy" })))
}

/// Readiness check; ready after the first reconciliation pass
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.service.is_ready() {
        (StatusCode::OK, Json(serde_json::json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "not_ready" })),
        )
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Pick the byte size from an explicit count or a capacity string
fn resolve_size(size_bytes: Option<u64>, capacity: Option<&str>) -> Result<u64> {
    match (size_bytes, capacity) {
        (Some(bytes), None) => Ok(bytes),
        (None, Some(capacity)) => parse_capacity(capacity),
        (Some(_), Some(_)) => Err(Error::ApiValidation(
            "specify either size in bytes or capacity, not both".into(),
        )),
        (None, None) => Err(Error::ApiValidation("a size or capacity is required".into())),
    }
}

/// Parse capacity string (e.g., "100Gi", "1Ti") to bytes
fn parse_capacity(s: &str) -> Result<u64> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (number, unit) = (&s[..split], s[split..].trim());

    let value: f64 = number
        .parse()
        .map_err(|_| Error::ApiValidation(format!("invalid capacity: {:?}", s)))?;

    let multiplier: u64 = match unit.to_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KI" | "KIB" => 1 << 10,
        "M" | "MB" | "MI" | "MIB" => 1 << 20,
        "G" | "GB" | "GI" | "GIB" => 1 << 30,
        "T" | "TB" | "TI" | "TIB" => 1 << 40,
        "P" | "PB" | "PI" | "PIB" => 1 << 50,
        _ => {
            return Err(Error::ApiValidation(format!(
                "unknown capacity unit: {}",
                unit
            )))
        }
    };

    let bytes = value * multiplier as f64;
    // u64::MAX rounds up to 2^64 as f64, so anything at or above it overflows
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(Error::ApiValidation(format!("capacity too large: {:?}", s)));
    }

    Ok(bytes as u64)
}

/// Random request ID for log correlation
fn request_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterDescriptor, StaticConfigSource};
    use crate::federation::FederationConfig;
    use crate::vendors::VendorFactory;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn app() -> (Router, Arc<FederationService>) {
        let source = StaticConfigSource::new(vec![
            ClusterDescriptor::new("A", "memory").with_tag("region", "us-east"),
            ClusterDescriptor::new("B", "memory").with_tag("region", "us-west"),
        ]);
        let service = FederationService::new(
            FederationConfig::default(),
            source,
            VendorFactory::with_defaults(),
        )
        .unwrap();
        service.reload(&CallContext::new()).await.unwrap();

        let router = RestRouter::new(service.clone(), Duration::from_secs(5)).build();
        (router, service)
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[test]
    fn test_parse_capacity() {
        assert_eq!(parse_capacity("100").unwrap(), 100);
        assert_eq!(parse_capacity("1Ki").unwrap(), 1024);
        assert_eq!(parse_capacity("1G").unwrap(), 1 << 30);
        assert_eq!(parse_capacity("100Gi").unwrap(), 100 << 30);
        assert_eq!(parse_capacity("1.5Ti").unwrap(), 3 << 39);

        assert!(parse_capacity("").is_err());
        assert!(parse_capacity("abc").is_err());
        assert!(parse_capacity("100X").is_err());

        assert_eq!(parse_capacity("8191Pi").unwrap(), 8191 << 50);
        assert!(matches!(
            parse_capacity("99999999999Pi"),
            Err(Error::ApiValidation(_))
        ));
        assert!(parse_capacity("16384Pi").is_err());
    }

    #[test]
    fn test_resolve_size() {
        assert_eq!(resolve_size(Some(10), None).unwrap(), 10);
        assert_eq!(resolve_size(None, Some("1Ki")).unwrap(), 1024);
        assert!(resolve_size(Some(10), Some("1Ki")).is_err());
        assert!(resolve_size(None, None).is_err());
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                Error::ResourceUnmapped {
                    resource_id: "x".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                Error::Unauthorized {
                    vendor: "rest".into(),
                },
                StatusCode::UNAUTHORIZED,
            ),
            (
                Error::NoQualifiedClusters { tags: "{}".into() },
                StatusCode::CONFLICT,
            ),
            (
                Error::AllEndpointsFailed {
                    endpoints: 2,
                    last_error: "refused".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                Error::Timeout {
                    operation: "get_volume".into(),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                Error::VendorOperationFailed {
                    vendor: "rest".into(),
                    operation: "create_volume".into(),
                    reason: "pool full".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (Error::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            assert_eq!(status_for(&error), expected, "{}", error);
        }
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let (router, _) = app().await;

        let (status, body) = call(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, _) = call(&router, "GET", "/ready", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_volume_lifecycle() {
        let (router, _) = app().await;

        let (status, volume) = call(
            &router,
            "POST",
            "/v1/volumes",
            Some(json!({
                "name": "db",
                "capacity": "10Gi",
                "affinity_tags": { "region": "us-west" }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(volume["cluster_id"], "B");
        assert_eq!(volume["size_bytes"], 10u64 << 30);
        let id = volume["id"].as_str().unwrap().to_string();

        let (status, owner) = call(&router, "GET", &format!("/v1/resources/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(owner["cluster_id"], "B");

        let (status, resized) = call(
            &router,
            "PUT",
            &format!("/v1/volumes/{}/size", id),
            Some(json!({ "capacity": "20Gi" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resized["size_bytes"], 20u64 << 30);

        let (status, attachment) = call(
            &router,
            "POST",
            &format!("/v1/volumes/{}/attach", id),
            Some(json!({ "host": "node-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(attachment["host"], "node-1");

        // Attached volumes cannot be deleted
        let (status, body) = call(&router, "DELETE", &format!("/v1/volumes/{}", id), None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "vendor_error");

        let (status, _) = call(
            &router,
            "POST",
            &format!("/v1/volumes/{}/detach", id),
            Some(json!({ "host": "node-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(&router, "DELETE", &format!("/v1/volumes/{}", id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(&router, "GET", &format!("/v1/volumes/{}", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "resource_unmapped");
    }

    #[tokio::test]
    async fn test_snapshots_and_listing() {
        let (router, _) = app().await;

        let (_, volume) = call(
            &router,
            "POST",
            "/v1/volumes",
            Some(json!({ "name": "db", "size_bytes": 1024 })),
        )
        .await;
        let (status, snapshot) = call(
            &router,
            "POST",
            "/v1/snapshots",
            Some(json!({ "name": "nightly", "volume_id": volume["id"] })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(snapshot["cluster_id"], volume["cluster_id"]);

        let (status, listed) = call(&router, "GET", "/v1/volumes", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed["volumes"].as_array().unwrap().len(), 1);
        assert!(listed["failed_clusters"].as_array().unwrap().is_empty());

        let (_, listed) = call(&router, "GET", "/v1/snapshots", None).await;
        assert_eq!(listed["snapshots"].as_array().unwrap().len(), 1);

        let snapshot_uri = format!("/v1/snapshots/{}", snapshot["id"].as_str().unwrap());
        let (status, _) = call(&router, "GET", &snapshot_uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&router, "DELETE", &snapshot_uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_placement_conflict() {
        let (router, _) = app().await;

        let (status, body) = call(
            &router,
            "POST",
            "/v1/volumes",
            Some(json!({
                "name": "db",
                "size_bytes": 1024,
                "affinity_tags": { "region": "eu" }
            })),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "no_qualified_clusters");
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let (router, _) = app().await;

        let (status, body) = call(
            &router,
            "POST",
            "/v1/volumes",
            Some(json!({ "size_bytes": 1024 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_request");

        let (status, _) = call(
            &router,
            "POST",
            "/v1/volumes",
            Some(json!({ "name": "db" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_admin_endpoints() {
        let (router, _) = app().await;

        let (status, clusters) = call(&router, "GET", "/v1/clusters", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(clusters.as_array().unwrap().len(), 2);
        assert_eq!(clusters[0]["cluster_id"], "A");

        let (status, health) = call(&router, "GET", "/v1/clusters/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["A"], true);

        let (status, report) = call(&router, "POST", "/v1/reload", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["clusters"]["registered"].as_array().unwrap().len(), 2);

        let (status, _) = call(&router, "POST", "/v1/resync/all", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, resync) = call(
            &router,
            "POST",
            "/v1/resync",
            Some(json!({
                "resource_id": "vol-ghost",
                "cluster_id": "A",
                "resource_type": "volume"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resync["present"], false);

        let (status, body) = call(&router, "GET", "/v1/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["clusters"], 2);
    }
}
