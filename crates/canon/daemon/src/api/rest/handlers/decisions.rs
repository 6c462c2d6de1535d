//! Decision handlers: decide, promote, check-non-interference.
//!
//! Responses are the exact bytes the service produced, so a replayed
//! request returns a body identical to the first one.

use crate::api::rest::state::AppState;
use crate::auth::{SCOPE_DECIDE, SCOPE_PROMOTE};
use crate::error::ApiResult;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use canon_service::{DecideRequest, NonInterferenceRequest, PromoteRequest, Reply};

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";
pub const REPLAYED_HEADER: &str = "idempotent-replayed";

/// Header key, ignoring an empty value so the body field can still apply.
fn idempotency_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
}

fn reply_response<T>(reply: Reply<T>) -> Response {
    let replayed = HeaderValue::from_static(if reply.replayed { "true" } else { "false" });
    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (header::HeaderName::from_static(REPLAYED_HEADER), replayed),
        ],
        reply.body,
    )
        .into_response()
}

pub async fn decide(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<DecideRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let caller = state.authorize(&headers, SCOPE_DECIDE)?;
    let Json(request) = payload?;
    let reply = state
        .service
        .decide(&caller, request, idempotency_key(&headers))
        .await?;
    Ok(reply_response(reply))
}

pub async fn promote(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<PromoteRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let caller = state.authorize(&headers, SCOPE_PROMOTE)?;
    let Json(request) = payload?;
    let reply = state
        .service
        .promote(&caller, request, idempotency_key(&headers))
        .await?;
    Ok(reply_response(reply))
}

pub async fn check_non_interference(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<NonInterferenceRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let caller = state.authorize(&headers, SCOPE_DECIDE)?;
    let Json(request) = payload?;
    let reply = state
        .service
        .check_non_interference(&caller, request, idempotency_key(&headers))
        .await?;
    Ok(reply_response(reply))
}
