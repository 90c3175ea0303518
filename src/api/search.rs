use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::api::error_response;
use crate::models::{ProviderSearchRequest, ProviderSearchResponse};
use crate::state::AppState;

/// POST /provider/search - hybrid knowledge search
pub async fn search(
    State(state): State<AppState>,
    Json(req): Json<ProviderSearchRequest>,
) -> Result<Json<ProviderSearchResponse>, (StatusCode, String)> {
    let response = state
        .engine
        .search(
            &req.user_id,
            &req.query,
            req.limit,
            req.token_budget,
            None,
        )
        .await
        .map_err(error_response)?;
    Ok(Json(response))
}
