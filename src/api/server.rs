//! Axum server setup and configuration

use crate::api::routes;
use crate::currency::{CurrencyConverter, StaticRateTable};
use crate::services::{BidSync, ProcessSupervisor};
use crate::{Config, Database};
use anyhow::Result;
use axum::{
    http::{header, Method},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub config: Arc<Config>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub bid_sync: Arc<BidSync>,
    pub converter: Arc<dyn CurrencyConverter>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        let db = Arc::new(Database::new(&config.database_path).await?);
        let supervisor = ProcessSupervisor::from_config(&config);
        let bid_sync = BidSync::from_config(&config, db.clone());

        Ok(Self {
            db,
            supervisor: Arc::new(supervisor),
            bid_sync: Arc::new(bid_sync),
            converter: Arc::new(StaticRateTable::default()),
            config: Arc::new(config),
        })
    }
}

/// Create the Axum application with all routes, served both at the root and
/// under `/api`
pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let api_routes = Router::new()
        // Policy
        .route("/config", get(routes::config::get_config).post(routes::config::update_config))
        // Templates
        .route("/prompts", get(routes::prompts::list_prompts).post(routes::prompts::create_prompt))
        .route(
            "/prompts/:id",
            put(routes::prompts::update_prompt).delete(routes::prompts::delete_prompt),
        )
        .route("/prompts/:id/activate", post(routes::prompts::activate_prompt))
        .route("/prompt", get(routes::prompts::get_active_prompt).post(routes::prompts::set_active_prompt))
        // Bid history
        .route("/bids", get(routes::bids::list_bids))
        .route("/bids/sync", post(routes::bids::sync_bids))
        .route("/stats", get(routes::bids::get_stats))
        .route("/analytics/prompts", get(routes::bids::prompt_analytics))
        // Bidder process
        .route("/autobidder/status", get(routes::autobidder::status))
        .route("/autobidder/logs", get(routes::autobidder::logs))
        .route("/autobidder/start", post(routes::autobidder::start))
        .route("/autobidder/stop", post(routes::autobidder::stop));

    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health_check))
        .merge(api_routes.clone())
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "name": "freelance-bidder",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
