//! Canon store views

use crate::api::rest::state::AppState;
use crate::auth::SCOPE_READ;
use crate::error::ApiResult;
use axum::{extract::State, http::HeaderMap, Json};
use canon_service::{CanonStoreView, CanonVersionView};

pub async fn canon_version(State(state): State<AppState>) -> ApiResult<Json<CanonVersionView>> {
    Ok(Json(state.service.canon_version().await?))
}

pub async fn canon_store(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<CanonStoreView>> {
    state.authorize(&headers, SCOPE_READ)?;
    Ok(Json(state.service.canon_store().await?))
}
