//! Per-request context and the middleware that establishes it
//!
//! Every request gets an id, its resource path and the client's source IP.
//! Handlers that fail return an [`ApiError`]; this middleware turns it into
//! the JSON error envelope so the envelope always carries the request id.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::{self, CredentialsProvider};
use crate::error::{ApiError, ErrorCategory};
use crate::node::Node;
use crate::stats::HttpStats;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub resource: String,
    pub source_ip: String,
}

impl RequestContext {
    fn from_request(request: &Request) -> Self {
        let connect_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Self {
            request_id: Uuid::new_v4().simple().to_string().to_uppercase(),
            resource: request.uri().path().to_string(),
            source_ip: source_ip(request.headers(), connect_addr),
        }
    }
}

/// Client address, preferring proxy headers over the socket peer
pub fn source_ip(headers: &HeaderMap, connect_addr: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or(real_ip)
        .map(str::to_string)
        .or_else(|| connect_addr.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn content_length(headers: &HeaderMap) -> u64 {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

pub async fn request_context(
    State(stats): State<Arc<HttpStats>>,
    mut request: Request,
    next: Next,
) -> Response {
    let ctx = RequestContext::from_request(&request);
    let method = request.method().to_string();
    let input_bytes = content_length(request.headers());
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    if let Some(err) = response.extensions_mut().remove::<ApiError>() {
        let category = err.category();
        if category == ErrorCategory::Internal {
            warn!(request_id = %ctx.request_id, resource = %ctx.resource, error = %err, "request failed");
        } else {
            debug!(
                request_id = %ctx.request_id,
                resource = %ctx.resource,
                category = ?category,
                retryable = category.is_retryable(),
                error = %err,
                "request failed"
            );
        }
        let handler_headers = std::mem::take(response.headers_mut());
        response = err.render(&ctx.resource, &ctx.request_id);
        for (name, value) in handler_headers.iter() {
            if !response.headers().contains_key(name) {
                response.headers_mut().insert(name.clone(), value.clone());
            }
        }
    }
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    stats.record(
        &method,
        response.status().is_success(),
        input_bytes,
        content_length(response.headers()),
    );
    response
}

/// Reject requests not signed with the current admin credentials
pub async fn require_admin(State(node): State<Arc<Node>>, request: Request, next: Next) -> Response {
    if let Err(err) = auth::verify_headers(request.headers(), &node.iam().credentials()) {
        debug!(resource = %request.uri().path(), error = %err, "admin request rejected");
        return ApiError::from(err).into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_ip_precedence() {
        let mut headers = HeaderMap::new();
        let addr: SocketAddr = "192.168.1.5:5555".parse().unwrap();
        assert_eq!(source_ip(&headers, Some(addr)), "192.168.1.5");
        assert_eq!(source_ip(&headers, None), "unknown");

        headers.insert("x-real-ip", "10.1.1.1".parse().unwrap());
        assert_eq!(source_ip(&headers, Some(addr)), "10.1.1.1");

        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(source_ip(&headers, Some(addr)), "203.0.113.7");
    }
}
