//! Message template endpoints

use super::{db_error, error_response, ApiResult, SuccessResponse};
use crate::api::server::AppState;
use crate::db::{NewPrompt, PromptUpdate};
use crate::services::drafter::DEFAULT_PROMPT_TEMPLATE;
use crate::types::PromptTemplate;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Templates response
#[derive(Debug, Serialize)]
pub struct PromptsResponse {
    pub prompts: Vec<PromptTemplate>,
    pub total: usize,
}

/// Create template request; `name` and `template` are required
#[derive(Debug, Deserialize)]
pub struct CreatePromptRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub template: Option<String>,
    #[serde(default)]
    pub is_active: bool,
}

/// The template manual mode would use
#[derive(Debug, Serialize)]
pub struct ActivePromptResponse {
    /// `None` for the built-in template
    pub id: Option<i64>,
    pub name: String,
    pub template: String,
    pub is_builtin: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetActivePromptRequest {
    pub template: String,
    pub name: Option<String>,
}

fn not_found(id: i64) -> (StatusCode, Json<super::ErrorResponse>) {
    error_response(StatusCode::NOT_FOUND, format!("Prompt {} not found", id))
}

fn required(value: Option<String>, field: &str) -> Result<String, (StatusCode, Json<super::ErrorResponse>)> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, format!("{} is required", field)))
}

/// List templates with freshly recomputed usage counters
pub async fn list_prompts(State(state): State<AppState>) -> ApiResult<PromptsResponse> {
    if let Err(e) = state.db.sync_prompt_stats().await {
        warn!("[Prompts] Could not refresh stats: {:#}", e);
    }

    let prompts = state.db.list_prompt_templates().await.map_err(db_error)?;
    let total = prompts.len();
    Ok(Json(PromptsResponse { prompts, total }))
}

pub async fn create_prompt(
    State(state): State<AppState>,
    Json(request): Json<CreatePromptRequest>,
) -> Result<(StatusCode, Json<PromptTemplate>), (StatusCode, Json<super::ErrorResponse>)> {
    let prompt = NewPrompt {
        name: required(request.name, "name")?,
        description: request.description,
        template: required(request.template, "template")?,
        is_active: request.is_active,
    };

    let created = state.db.create_prompt(&prompt).await.map_err(db_error)?;
    info!("[Prompts] Created prompt {} ({})", created.id, created.name);
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_prompt(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<PromptUpdate>,
) -> ApiResult<PromptTemplate> {
    if update.template.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(error_response(StatusCode::BAD_REQUEST, "template must not be empty"));
    }

    state
        .db
        .update_prompt(id, &update)
        .await
        .map_err(db_error)?
        .map(Json)
        .ok_or_else(|| not_found(id))
}

pub async fn activate_prompt(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<SuccessResponse> {
    if !state.db.activate_prompt(id).await.map_err(db_error)? {
        return Err(not_found(id));
    }

    info!("[Prompts] Activated prompt {}", id);
    Ok(Json(SuccessResponse {
        success: true,
        message: Some(format!("Prompt {} activated", id)),
    }))
}

pub async fn delete_prompt(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<SuccessResponse> {
    if !state.db.delete_prompt(id).await.map_err(db_error)? {
        return Err(not_found(id));
    }

    info!("[Prompts] Deleted prompt {}", id);
    Ok(Json(SuccessResponse {
        success: true,
        message: Some(format!("Prompt {} deleted", id)),
    }))
}

/// Active template, or the built-in one when none is active
pub async fn get_active_prompt(State(state): State<AppState>) -> ApiResult<ActivePromptResponse> {
    let active = state.db.get_active_prompt_template().await.map_err(db_error)?;

    Ok(Json(match active {
        Some(prompt) => ActivePromptResponse {
            id: Some(prompt.id),
            name: prompt.name,
            template: prompt.template,
            is_builtin: false,
        },
        None => ActivePromptResponse {
            id: None,
            name: "Built-in default".to_string(),
            template: DEFAULT_PROMPT_TEMPLATE.trim().to_string(),
            is_builtin: true,
        },
    }))
}

/// Replace the active template's body, or create and activate one
pub async fn set_active_prompt(
    State(state): State<AppState>,
    Json(request): Json<SetActivePromptRequest>,
) -> ApiResult<PromptTemplate> {
    if request.template.trim().is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "template is required"));
    }

    let active = state.db.get_active_prompt_template().await.map_err(db_error)?;

    let saved = match active {
        Some(prompt) => {
            let update = PromptUpdate {
                name: request.name,
                template: Some(request.template),
                ..Default::default()
            };
            state
                .db
                .update_prompt(prompt.id, &update)
                .await
                .map_err(db_error)?
                .ok_or_else(|| not_found(prompt.id))?
        }
        None => {
            let prompt = NewPrompt {
                name: request.name.unwrap_or_else(|| "Default".to_string()),
                description: None,
                template: request.template,
                is_active: true,
            };
            state.db.create_prompt(&prompt).await.map_err(db_error)?
        }
    };

    Ok(Json(saved))
}
