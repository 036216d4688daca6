//! Keep-alive delivery for operations that may outlast idle timeouts
//!
//! While the result is pending, a ticker fires every `interval`. If the result
//! arrives before the first tick, the client gets an ordinary JSON response.
//! Otherwise the response is committed as `200 application/json` and each tick
//! writes whitespace filler until the payload (or error envelope) ends the
//! body. Dropping the response stream drops the ticker and the receiver.

use axum::body::Body;
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant};

use super::context::RequestContext;
use crate::error::{ApiError, ApiResult};

/// Written on every tick while the result is pending
pub const FILLER: &[u8] = b"\n\r";

/// Wait for `rx`, upgrading to a streamed response if it takes longer than
/// one `interval`
pub async fn respond(
    interval: Duration,
    ctx: &RequestContext,
    mut rx: oneshot::Receiver<ApiResult<Bytes>>,
) -> Response {
    let mut ticker = interval_at(Instant::now() + interval, interval);

    tokio::select! {
        outcome = &mut rx => return buffered(flatten(outcome), ctx),
        _ = ticker.tick() => {}
    }

    let resource = ctx.resource.clone();
    let request_id = ctx.request_id.clone();
    let rest = stream::unfold(Some((ticker, rx)), move |state| {
        let resource = resource.clone();
        let request_id = request_id.clone();
        async move {
            let (mut ticker, mut rx) = state?;
            tokio::select! {
                outcome = &mut rx => {
                    let chunk = match flatten(outcome) {
                        Ok(payload) => payload,
                        Err(err) => envelope_bytes(&err, &resource, &request_id),
                    };
                    Some((Ok::<_, Infallible>(chunk), None))
                }
                _ = ticker.tick() => Some((Ok(Bytes::from_static(FILLER)), Some((ticker, rx)))),
            }
        }
    });
    let body = stream::once(async { Ok::<_, Infallible>(Bytes::from_static(FILLER)) }).chain(rest);

    let mut response = Response::new(Body::from_stream(body));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn flatten(outcome: Result<ApiResult<Bytes>, oneshot::error::RecvError>) -> ApiResult<Bytes> {
    outcome.unwrap_or_else(|_| Err(ApiError::internal("operation ended without a result")))
}

fn buffered(outcome: ApiResult<Bytes>, ctx: &RequestContext) -> Response {
    match outcome {
        Ok(payload) => ([(header::CONTENT_TYPE, "application/json")], payload).into_response(),
        Err(err) => err.render(&ctx.resource, &ctx.request_id),
    }
}

fn envelope_bytes(err: &ApiError, resource: &str, request_id: &str) -> Bytes {
    serde_json::to_vec(&err.envelope(resource, request_id))
        .map(Bytes::from)
        .unwrap_or_default()
}
