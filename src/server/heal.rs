//! `POST /admin/v1/heal/...`
//!
//! Without a client token the request starts a heal sequence for the scope.
//! With one it pops buffered status. `forceStart` replaces a running sequence
//! and `forceStop` stops it. Start and stop run on their own task and are
//! delivered through the keep-alive responder.

use axum::extract::{Extension, Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

use super::context::RequestContext;
use super::{keepalive, AppState};
use crate::error::{ApiError, ApiErrorCode, ApiResult};
use crate::heal::{HealOpts, HealScope, HealSequence, HealStartSuccess};
use crate::storage::BackendType;

#[derive(Debug, Default, Deserialize)]
pub struct HealQuery {
    #[serde(rename = "clientToken")]
    client_token: Option<String>,
    #[serde(rename = "forceStart")]
    force_start: Option<String>,
    #[serde(rename = "forceStop")]
    force_stop: Option<String>,
}

/// Validated heal request parameters
#[derive(Debug)]
struct HealParams {
    scope: HealScope,
    opts: HealOpts,
    client_token: Option<String>,
    force_start: bool,
    force_stop: bool,
}

impl HealParams {
    fn parse(bucket: &str, prefix: &str, query: HealQuery, body: &[u8]) -> ApiResult<Self> {
        let scope = HealScope::parse(bucket, prefix)?;
        let client_token = query.client_token.filter(|t| !t.is_empty());

        // The body is only read when starting a new sequence
        let opts = if client_token.is_some() || body.iter().all(u8::is_ascii_whitespace) {
            HealOpts::default()
        } else {
            serde_json::from_slice(body)
                .map_err(|e| ApiError::with_detail(ApiErrorCode::RequestBodyParse, e.to_string()))?
        };

        Ok(Self {
            scope,
            opts,
            client_token,
            force_start: query.force_start.is_some(),
            force_stop: query.force_stop.is_some(),
        })
    }
}

pub async fn heal_cluster(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<HealQuery>,
    body: Bytes,
) -> Response {
    heal(state, ctx, "", "", query, body).await
}

pub async fn heal_bucket(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(bucket): Path<String>,
    Query(query): Query<HealQuery>,
    body: Bytes,
) -> Response {
    heal(state, ctx, &bucket, "", query, body).await
}

pub async fn heal_prefix(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((bucket, prefix)): Path<(String, String)>,
    Query(query): Query<HealQuery>,
    body: Bytes,
) -> Response {
    heal(state, ctx, &bucket, &prefix, query, body).await
}

async fn heal(
    state: AppState,
    ctx: RequestContext,
    bucket: &str,
    prefix: &str,
    query: HealQuery,
    body: Bytes,
) -> Response {
    let layer = match state.node.object_layer() {
        Ok(layer) => layer,
        Err(err) => return err.into_response(),
    };

    let info = layer.storage_info().await;
    if info.backend.backend_type != BackendType::Erasure {
        return ApiError::new(ApiErrorCode::HealNotImplemented).into_response();
    }

    let params = match HealParams::parse(bucket, prefix, query, &body) {
        Ok(params) => params,
        Err(err) => return err.into_response(),
    };
    let path = params.scope.path();
    let registry = state.registry.clone();
    let plain = !params.force_start && !params.force_stop;

    match &params.client_token {
        // A repeated start for a scope that already has progress buffered
        // gets the running sequence's token back
        None if plain => {
            if let Some(existing) = registry.get_sequence(&path) {
                if !existing.has_ended() && existing.has_items() {
                    debug!(scope = %params.scope, "returning token of running heal sequence");
                    return json_response(&HealStartSuccess {
                        client_token: existing.client_token().to_string(),
                        client_address: existing.client_address().to_string(),
                        start_time: existing.start_time(),
                    });
                }
            }
        }
        Some(token) if plain => {
            return match registry.pop_status(&path, token) {
                Ok(status) => json_response(&status),
                Err(err) => err.into_response(),
            };
        }
        _ => {}
    }

    let (tx, rx) = oneshot::channel();
    if params.force_stop {
        tokio::spawn(async move {
            let _ = tx.send(registry.stop(&path).and_then(|r| encode(&r)));
        });
    } else {
        let sequence = HealSequence::new(
            params.scope,
            ctx.source_ip.clone(),
            params.opts,
            info.total_disks(),
            params.force_start,
        )
        .with_limits(registry.limits());
        let force_start = params.force_start;
        tokio::spawn(async move {
            let launched = if force_start {
                registry.force_launch(sequence, layer).await
            } else {
                registry.launch(sequence, layer)
            };
            let _ = tx.send(launched.and_then(|r| encode(&r)));
        });
    }

    keepalive::respond(state.keepalive, &ctx, rx).await
}

fn encode<T: Serialize>(value: &T) -> ApiResult<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(ApiError::internal)
}

fn json_response<T: Serialize>(value: &T) -> Response {
    match encode(value) {
        Ok(bytes) => ([(header::CONTENT_TYPE, "application/json")], bytes).into_response(),
        Err(err) => err.into_response(),
    }
}
