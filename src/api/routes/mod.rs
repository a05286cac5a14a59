//! API route handlers

pub mod autobidder;
pub mod bids;
pub mod config;
pub mod prompts;

use axum::{http::StatusCode, Json};
use serde::Serialize;

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: Option<String>,
}

pub type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

pub(crate) fn error_response(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse { error: error.into() }))
}

pub(crate) fn db_error(e: anyhow::Error) -> (StatusCode, Json<ErrorResponse>) {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Database error: {:#}", e))
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::api::{create_app, AppState};
    use crate::currency::StaticRateTable;
    use crate::services::{BidSync, ProcessSupervisor};
    use crate::{Config, Database};
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use axum::Router;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    pub async fn state() -> AppState {
        let config = Config::default();
        let db = Arc::new(Database::in_memory().await.unwrap());
        let dir = std::env::temp_dir();
        let tag = format!("{}-{:?}", std::process::id(), std::thread::current().id());
        let supervisor = ProcessSupervisor::new(
            "/nonexistent/autobidder",
            dir.join(format!("bidder-api-{}.log", tag)),
            dir.join(format!("bidder-api-{}.stop", tag)),
        )
        .with_process_name("no-such-bidder-process");

        AppState {
            bid_sync: Arc::new(BidSync::new(None, db.clone())),
            db,
            supervisor: Arc::new(supervisor),
            converter: Arc::new(StaticRateTable::default()),
            config: Arc::new(config),
        }
    }

    pub async fn app() -> (Router, AppState) {
        let state = state().await;
        (create_app(state.clone()), state)
    }

    /// Send one request and decode the JSON reply
    pub async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{app, call};
    use axum::http::{Method, StatusCode};

    #[tokio::test]
    async fn test_service_info_and_health() {
        let (app, _) = app().await;

        let (status, body) = call(&app, Method::GET, "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "freelance-bidder");

        let (status, _) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_routes_served_under_api_prefix() {
        let (app, _) = app().await;

        let (plain, _) = call(&app, Method::GET, "/config", None).await;
        let (prefixed, _) = call(&app, Method::GET, "/api/config", None).await;
        assert_eq!(plain, StatusCode::OK);
        assert_eq!(prefixed, StatusCode::OK);
    }
}
