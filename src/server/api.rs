//! Admin HTTP surface
//!
//! Every handler performs its local effect first and then broadcasts to the
//! cluster. Peer failures are logged by the broadcaster and never fail the
//! response.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{middleware, Json, Router};
use base64::Engine;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::info;

use super::context::require_admin;
use super::{heal, AppState};
use crate::auth::Credentials;
use crate::error::{ApiError, ApiErrorCode, ApiResult};
use crate::peer::{BroadcastResult, ServiceSignal};
use crate::profiling::{self, ProfilerKind};
use crate::storage::{AccountStatus, UserInfo};
use crate::version::{ADMIN_API_VERSION, COMMIT_ID, SERVER_VERSION};

/// Largest accepted admin request body
pub const MAX_CONFIG_BODY: usize = 256 * 1024 + 128;

pub fn admin_router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/heal/", post(heal::heal_cluster))
        .route("/heal/{bucket}", post(heal::heal_bucket))
        .route("/heal/{bucket}/", post(heal::heal_bucket))
        .route("/heal/{bucket}/{*prefix}", post(heal::heal_prefix))
        .route("/service", get(service_status).post(service_signal))
        .route("/info", get(server_info))
        .route("/performance", get(performance))
        .route("/profiling/start", post(start_profiling))
        .route("/profiling/download", get(download_profiling))
        .route("/add-user", put(add_user))
        .route("/remove-user", delete(remove_user))
        .route("/set-user-status", put(set_user_status))
        .route("/list-users", get(list_users))
        .route("/add-canned-policy", put(add_canned_policy))
        .route("/remove-canned-policy", delete(remove_canned_policy))
        .route("/list-canned-policies", get(list_canned_policies))
        .route("/set-user-policy", put(set_user_policy))
        .route("/config/credential", post(update_credentials));

    Router::new()
        .route("/admin/version", get(version))
        .nest("/admin/v1", v1)
        .route_layer(middleware::from_fn_with_state(
            state.node.clone(),
            require_admin,
        ))
        .with_state(state)
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    if body.len() > MAX_CONFIG_BODY {
        return Err(ApiErrorCode::AdminConfigTooLarge.into());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::with_detail(ApiErrorCode::MalformedPostRequest, e.to_string()))
}

fn required(value: Option<String>, name: &str) -> ApiResult<String> {
    value.filter(|v| !v.is_empty()).ok_or_else(|| {
        ApiError::with_detail(
            ApiErrorCode::InvalidRequest,
            format!("missing query parameter {name}"),
        )
    })
}

async fn version() -> Json<Value> {
    Json(json!({ "version": ADMIN_API_VERSION }))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub server_version: String,
    pub commit_id: String,
    /// Uptime of the most recently started node
    pub uptime_secs: u64,
}

async fn service_status(State(state): State<AppState>) -> Json<ServiceStatus> {
    let uptime_secs = state
        .peers
        .server_info()
        .await
        .into_iter()
        .filter_map(|r| r.result.ok())
        .map(|info| info.properties.uptime_secs)
        .min()
        .unwrap_or_else(|| state.node.uptime_secs());

    Json(ServiceStatus {
        server_version: SERVER_VERSION.to_string(),
        commit_id: COMMIT_ID.to_string(),
        uptime_secs,
    })
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ServiceAction {
    pub action: ServiceSignal,
}

async fn service_signal(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<Vec<BroadcastResult<()>>>> {
    let ServiceAction { action } = parse_body(&body)?;
    info!(signal = %action, "service signal requested");
    Ok(Json(state.peers.signal_service(action).await))
}

async fn server_info(State(state): State<AppState>) -> ApiResult<Response> {
    state.node.object_layer()?;
    Ok(Json(state.peers.server_info().await).into_response())
}

#[derive(Debug, Deserialize)]
struct PerfQuery {
    #[serde(rename = "perfType")]
    perf_type: Option<String>,
}

async fn performance(
    State(state): State<AppState>,
    Query(query): Query<PerfQuery>,
) -> ApiResult<Response> {
    let response = match query.perf_type.as_deref() {
        Some("drive") => {
            state.node.object_layer()?;
            Json(state.peers.drive_perf_info().await).into_response()
        }
        Some("cpu") => Json(state.peers.cpu_load_info().await).into_response(),
        Some("mem") => Json(state.peers.mem_usage_info().await).into_response(),
        _ => return Err(ApiErrorCode::MethodNotAllowed.into()),
    };
    Ok(response)
}

#[derive(Debug, Deserialize)]
struct ProfilerQuery {
    #[serde(rename = "profilerType")]
    profiler_type: Option<String>,
}

async fn start_profiling(
    State(state): State<AppState>,
    Query(query): Query<ProfilerQuery>,
) -> ApiResult<Json<Vec<BroadcastResult<()>>>> {
    let kind = required(query.profiler_type, "profilerType")?
        .parse::<ProfilerKind>()
        .map_err(|e| ApiError::with_detail(ApiErrorCode::InvalidRequest, e.to_string()))?;
    Ok(Json(state.peers.start_profiling(kind).await))
}

async fn download_profiling(State(state): State<AppState>) -> ApiResult<Response> {
    let engine = base64::engine::general_purpose::STANDARD;
    let reports: Vec<(String, Vec<u8>)> = state
        .peers
        .download_profiling_data()
        .await
        .into_iter()
        .filter_map(|r| {
            let data = r.result.ok()?;
            engine.decode(data.data).ok().map(|bytes| (r.host, bytes))
        })
        .collect();

    if reports.is_empty() {
        return Err(ApiErrorCode::AdminProfilerNotEnabled.into());
    }

    let archive = profiling::bundle_reports(
        reports
            .iter()
            .map(|(host, data)| (host.as_str(), data.as_slice())),
    )
    .map_err(ApiError::internal)?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"profiling.zip\"",
            ),
        ],
        archive,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    #[serde(rename = "accessKey")]
    access_key: Option<String>,
    status: Option<String>,
    #[serde(rename = "policyName")]
    policy_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddUserRequest {
    pub secret_key: String,
    #[serde(default = "enabled")]
    pub status: AccountStatus,
}

fn enabled() -> AccountStatus {
    AccountStatus::Enabled
}

async fn add_user(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let access_key = required(query.access_key, "accessKey")?;
    let request: AddUserRequest = parse_body(&body)?;
    state
        .node
        .iam()
        .add_user(&access_key, &request.secret_key, request.status)?;
    state.peers.load_users().await;
    Ok(StatusCode::OK)
}

async fn remove_user(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> ApiResult<StatusCode> {
    let access_key = required(query.access_key, "accessKey")?;
    state.node.iam().remove_user(&access_key)?;
    state.peers.load_users().await;
    Ok(StatusCode::OK)
}

async fn set_user_status(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> ApiResult<StatusCode> {
    let access_key = required(query.access_key, "accessKey")?;
    let status = required(query.status, "status")?
        .parse::<AccountStatus>()
        .map_err(ApiError::from)?;
    state.node.iam().set_user_status(&access_key, status)?;
    state.peers.load_users().await;
    Ok(StatusCode::OK)
}

async fn list_users(State(state): State<AppState>) -> Json<BTreeMap<String, UserInfo>> {
    Json(state.node.iam().list_users())
}

async fn set_user_policy(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> ApiResult<StatusCode> {
    let access_key = required(query.access_key, "accessKey")?;
    let policy = required(query.policy_name, "policyName")?;
    state.node.iam().set_user_policy(&access_key, &policy)?;
    state.peers.load_users().await;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct PolicyQuery {
    name: Option<String>,
}

async fn add_canned_policy(
    State(state): State<AppState>,
    Query(query): Query<PolicyQuery>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let name = required(query.name, "name")?;
    let policy: Value = parse_body(&body)?;
    state.node.iam().add_policy(&name, policy)?;
    state.peers.load_policies().await;
    Ok(StatusCode::OK)
}

async fn remove_canned_policy(
    State(state): State<AppState>,
    Query(query): Query<PolicyQuery>,
) -> ApiResult<StatusCode> {
    let name = required(query.name, "name")?;
    state.node.iam().remove_policy(&name)?;
    state.peers.load_policies().await;
    state.peers.load_users().await;
    Ok(StatusCode::OK)
}

async fn list_canned_policies(State(state): State<AppState>) -> Json<BTreeMap<String, Value>> {
    Json(state.node.iam().list_policies())
}

async fn update_credentials(State(state): State<AppState>, body: Bytes) -> ApiResult<StatusCode> {
    let credentials: Credentials = parse_body(&body)?;
    credentials.validate()?;
    state.node.iam().stage_credentials(credentials)?;
    state.peers.load_credentials().await;
    info!("admin credentials updated");
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{sign_now, Credentials};
    use crate::config::AdminConfig;
    use crate::server::AdminServer;
    use crate::storage::{MemoryObjectLayer, ObjectLayer};
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let config = AdminConfig::default();
        let layer: Arc<dyn ObjectLayer> = Arc::new(MemoryObjectLayer::new(4));
        AdminServer::new(config, Some(layer)).unwrap().router()
    }

    fn signed(method: &str, uri: &str, body: Body) -> Request<Body> {
        let config = AdminConfig::default();
        let token = sign_now(&Credentials::new(config.access_key, config.secret_key));
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(body)
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_unsigned_request_rejected() {
        let request = Request::builder()
            .uri("/admin/version")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = json_body(response).await;
        assert_eq!(body["Code"], "AccessDenied");
        assert_eq!(body["Resource"], "/admin/version");
    }

    #[tokio::test]
    async fn test_version() {
        let response = app()
            .oneshot(signed("GET", "/admin/version", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"version": "1"}));
    }

    #[tokio::test]
    async fn test_user_lifecycle() {
        let app = app();

        let response = app
            .clone()
            .oneshot(signed(
                "PUT",
                "/admin/v1/add-user?accessKey=alice",
                Body::from(r#"{"secretKey": "alicesecret"}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(signed("GET", "/admin/v1/list-users", Body::empty()))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["alice"]["status"], "enabled");

        let response = app
            .clone()
            .oneshot(signed(
                "PUT",
                "/admin/v1/set-user-policy?accessKey=alice&policyName=missing",
                Body::empty(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["Code"], "XAdminAdminNoSuchPolicy");
    }

    #[tokio::test]
    async fn test_unknown_perf_type() {
        let response = app()
            .oneshot(signed("GET", "/admin/v1/performance?perfType=gpu", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let body = format!(r#"{{"accessKey": "{}"}}"#, "a".repeat(MAX_CONFIG_BODY));
        let response = app()
            .oneshot(signed("POST", "/admin/v1/config/credential", Body::from(body)))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["Code"], "XAdminAdminConfigTooLarge");
    }
}
