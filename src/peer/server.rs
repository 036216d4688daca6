//! Peer RPC endpoint
//!
//! Requests must be signed with the cluster credentials and carry a
//! compatible protocol version. Every response, failures included, states
//! this node's version.

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

use super::rpc::{PeerRequest, PEER_RPC_PATH};
use super::service::PeerService;
use crate::auth::{self, CredentialsProvider};
use crate::error::{ApiError, ApiErrorCode, ApiResult};
use crate::version::{peer_rpc_version, ProtocolVersion, PEER_RPC_VERSION_HEADER};

pub fn peer_router(service: Arc<PeerService>) -> Router {
    Router::new()
        .route(PEER_RPC_PATH, post(handle_rpc))
        .with_state(service)
}

async fn handle_rpc(
    State(service): State<Arc<PeerService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut response = match dispatch(&service, &headers, &body).await {
        Ok(value) => Json(value).into_response(),
        Err(err) => {
            debug!(error = %err, "peer request rejected");
            err.into_response()
        }
    };
    if let Ok(value) = HeaderValue::from_str(&peer_rpc_version().to_string()) {
        response.headers_mut().insert(PEER_RPC_VERSION_HEADER, value);
    }
    response
}

async fn dispatch(
    service: &PeerService,
    headers: &HeaderMap,
    body: &[u8],
) -> ApiResult<serde_json::Value> {
    auth::verify_headers(headers, &service.node().iam().credentials())?;
    check_version(headers)?;

    let request: PeerRequest = serde_json::from_slice(body)
        .map_err(|e| ApiError::with_detail(ApiErrorCode::RequestBodyParse, e.to_string()))?;
    debug!(method = request.method(), "peer request");
    service.handle(&request).await
}

fn check_version(headers: &HeaderMap) -> ApiResult<()> {
    let local = peer_rpc_version();
    let remote = headers
        .get(PEER_RPC_VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ApiError::with_detail(ApiErrorCode::InvalidRequest, "missing peer RPC version")
        })?;

    match remote.parse::<ProtocolVersion>() {
        Ok(version) if local.is_compatible_with(&version) => Ok(()),
        _ => Err(ApiError::with_detail(
            ApiErrorCode::InvalidRequest,
            format!("peer RPC version {remote} is not compatible with {local}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{sign_now, Credentials};
    use crate::node::Node;
    use crate::storage::IamStore;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    fn creds() -> Credentials {
        Credentials::new("admin", "adminsecret")
    }

    fn router() -> Router {
        let iam = Arc::new(IamStore::in_memory(creds()));
        let node = Arc::new(Node::new("node1:9000", "us-east-1", None, iam));
        peer_router(Arc::new(PeerService::new(node)))
    }

    fn request(version: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(PEER_RPC_PATH)
            .header(header::AUTHORIZATION, format!("Bearer {}", sign_now(&creds())))
            .header(PEER_RPC_VERSION_HEADER, version)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_dispatches_signed_request() {
        let response = router()
            .oneshot(request("1.0.0", r#"{"method": "cpuLoadInfo"}"#))
            .await
            .unwrap();
        assert_eq!(response.headers()[PEER_RPC_VERSION_HEADER], "1.0.0");
        // Load averages come from /proc; only the version header is certain
        assert!(response.status().is_success() || response.status().is_server_error());
    }

    #[tokio::test]
    async fn test_incompatible_version_rejected() {
        let response = router()
            .oneshot(request("2.0.0", r#"{"method": "loadUsers"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[PEER_RPC_VERSION_HEADER], "1.0.0");
    }

    #[tokio::test]
    async fn test_unsigned_and_malformed() {
        let unsigned = Request::builder()
            .method("POST")
            .uri(PEER_RPC_PATH)
            .header(PEER_RPC_VERSION_HEADER, "1.0.0")
            .body(Body::from(r#"{"method": "loadUsers"}"#))
            .unwrap();
        let response = router().oneshot(unsigned).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = router()
            .oneshot(request("1.0.0", r#"{"method": "reboot"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let err = response.extensions().get::<ApiError>().unwrap();
        assert_eq!(err.code, ApiErrorCode::RequestBodyParse);
    }
}
