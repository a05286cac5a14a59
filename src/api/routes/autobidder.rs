//! Bidder process control endpoints

use super::{error_response, ApiResult, SuccessResponse};
use crate::api::server::AppState;
use crate::services::{ProcessStatus, SupervisorError};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

const DEFAULT_LOG_LINES: usize = 200;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub lines: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub lines: Vec<String>,
}

pub async fn status(State(state): State<AppState>) -> Json<ProcessStatus> {
    Json(state.supervisor.status().await)
}

pub async fn logs(State(state): State<AppState>, Query(query): Query<LogsQuery>) -> Json<LogsResponse> {
    let n = query.lines.unwrap_or(DEFAULT_LOG_LINES);
    Json(LogsResponse {
        lines: state.supervisor.tail_logs(n).await,
    })
}

pub async fn start(State(state): State<AppState>) -> ApiResult<SuccessResponse> {
    match state.supervisor.start().await {
        Ok(message) => Ok(Json(SuccessResponse {
            success: true,
            message: Some(message),
        })),
        Err(SupervisorError::AlreadyRunning) => Err(error_response(
            StatusCode::CONFLICT,
            SupervisorError::AlreadyRunning.to_string(),
        )),
        Err(e) => {
            error!("[Supervisor] Start failed: {}", e);
            Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

pub async fn stop(State(state): State<AppState>) -> Json<SuccessResponse> {
    let message = state.supervisor.stop().await;
    Json(SuccessResponse {
        success: true,
        message: Some(message),
    })
}
