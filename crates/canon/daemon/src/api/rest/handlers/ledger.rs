//! Ledger read handlers

use crate::api::rest::state::AppState;
use crate::auth::SCOPE_READ;
use crate::error::ApiResult;
use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::HeaderMap,
    Json,
};
use canon_service::{LedgerView, RecentView, VerifyView};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

/// Every event on one chain, oldest first.
pub async fn get_ledger(
    State(state): State<AppState>,
    headers: HeaderMap,
    pointer: Result<Path<String>, PathRejection>,
) -> ApiResult<Json<LedgerView>> {
    let caller = state.authorize(&headers, SCOPE_READ)?;
    let Path(pointer) = pointer?;
    Ok(Json(state.service.ledger_events(&caller, &pointer).await?))
}

/// Replay a chain's hashes. A broken chain is still a 200 with `ok: false`.
pub async fn verify_ledger(
    State(state): State<AppState>,
    headers: HeaderMap,
    pointer: Result<Path<String>, PathRejection>,
) -> ApiResult<Json<VerifyView>> {
    let caller = state.authorize(&headers, SCOPE_READ)?;
    let Path(pointer) = pointer?;
    Ok(Json(state.service.verify(&caller, &pointer).await?))
}

pub async fn recent_ledger(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<RecentQuery>, QueryRejection>,
) -> ApiResult<Json<RecentView>> {
    let caller = state.authorize(&headers, SCOPE_READ)?;
    let Query(query) = query?;
    Ok(Json(state.service.recent(&caller, query.limit).await?))
}
