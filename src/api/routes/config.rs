//! Bidding policy endpoints

use super::{db_error, error_response, ApiResult};
use crate::api::server::AppState;
use crate::config::Policy;
use axum::{extract::State, http::StatusCode, Json};
use serde_json::{Map, Value};
use tracing::info;

/// Current policy. Credentials live in the environment and are never returned.
pub async fn get_config(State(state): State<AppState>) -> ApiResult<Policy> {
    let policy = state.db.load_policy().await.map_err(db_error)?;
    Ok(Json(policy))
}

/// Partial update keyed by setting name; returns the full policy
pub async fn update_config(
    State(state): State<AppState>,
    Json(updates): Json<Map<String, Value>>,
) -> ApiResult<Policy> {
    let current = state.db.load_policy().await.map_err(db_error)?;

    let policy = current
        .merged(&updates)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))?;

    state.db.save_policy(&policy).await.map_err(db_error)?;
    info!("[Config] Updated settings: {:?}", updates.keys().collect::<Vec<_>>());

    Ok(Json(policy))
}
