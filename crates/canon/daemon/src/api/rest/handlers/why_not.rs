//! Denial lookup

use crate::api::rest::state::AppState;
use crate::auth::SCOPE_READ;
use crate::error::ApiResult;
use axum::{
    extract::{rejection::PathRejection, Path, State},
    http::HeaderMap,
    Json,
};
use canon_service::WhyNotView;

/// A stored denial with its proof re-verified on read.
pub async fn get_why_not(
    State(state): State<AppState>,
    headers: HeaderMap,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<Json<WhyNotView>> {
    let caller = state.authorize(&headers, SCOPE_READ)?;
    let Path(id) = id?;
    Ok(Json(state.service.why_not(&caller, &id).await?))
}
