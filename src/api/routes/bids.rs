//! Bid history, statistics and template analytics endpoints

use super::{db_error, error_response, ApiResult};
use crate::api::server::AppState;
use crate::types::{BidRecord, BidSummaryStats, PromptAnalytics};
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

/// Bids response
#[derive(Debug, Serialize)]
pub struct BidsResponse {
    pub bids: Vec<BidRecord>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub success: bool,
    pub synced: usize,
}

#[derive(Debug, Serialize)]
pub struct AnalyticsResponse {
    pub prompts: Vec<PromptAnalytics>,
}

/// Every bid, newest first. Kicks off a remote sync when one is due.
pub async fn list_bids(State(state): State<AppState>) -> ApiResult<BidsResponse> {
    state.bid_sync.sync_in_background_if_due();

    let bids = state.db.list_bids(None).await.map_err(db_error)?;
    let total = bids.len();
    Ok(Json(BidsResponse { bids, total }))
}

/// Pull bids from the marketplace now
pub async fn sync_bids(State(state): State<AppState>) -> ApiResult<SyncResponse> {
    if !state.bid_sync.is_configured() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Bid sync needs FREELANCER_OAUTH_TOKEN and FREELANCER_BIDDER_ID",
        ));
    }

    let synced = state
        .bid_sync
        .sync_now()
        .await
        .map_err(|e| error_response(StatusCode::BAD_GATEWAY, format!("Sync failed: {:#}", e)))?;

    Ok(Json(SyncResponse { success: true, synced }))
}

pub async fn get_stats(State(state): State<AppState>) -> ApiResult<BidSummaryStats> {
    let stats = state.db.bid_stats(state.converter.as_ref()).await.map_err(db_error)?;
    Ok(Json(stats))
}

pub async fn prompt_analytics(State(state): State<AppState>) -> ApiResult<AnalyticsResponse> {
    let prompts = state.db.prompt_analytics().await.map_err(db_error)?;
    Ok(Json(AnalyticsResponse { prompts }))
}

#[cfg(test)]
mod tests {
    use crate::api::routes::test_support::{app, call};
    use crate::types::{BidRecord, BidStatus};
    use axum::http::{Method, StatusCode};
    use chrono::{Duration, Utc};

    fn record(project_id: i64, amount: i64, minutes_ago: i64) -> BidRecord {
        BidRecord {
            project_id,
            title: format!("Project {}", project_id),
            bid_amount: amount,
            currency_code: "USD".to_string(),
            status: BidStatus::Applied,
            bid_message: "Pitch".to_string(),
            prompt_id: None,
            prompt_hash: None,
            outsource_cost: None,
            profit: None,
            reply_count: 0,
            applied_at: Some(Utc::now() - Duration::minutes(minutes_ago)),
            prompt_name: None,
        }
    }

    #[tokio::test]
    async fn test_list_bids_newest_first() {
        let (app, state) = app().await;
        state.db.upsert_bid_record(&record(1, 300, 30)).await.unwrap();
        state.db.upsert_bid_record(&record(2, 500, 5)).await.unwrap();

        let (status, body) = call(&app, Method::GET, "/api/bids", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["bids"][0]["project_id"], 2);
        assert_eq!(body["bids"][1]["project_id"], 1);
    }

    #[tokio::test]
    async fn test_stats_totals() {
        let (app, state) = app().await;
        state.db.upsert_bid_record(&record(1, 300, 30)).await.unwrap();
        state.db.upsert_bid_record(&record(2, 500, 5)).await.unwrap();

        let (status, body) = call(&app, Method::GET, "/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_bids"], 2);
        assert_eq!(body["applied"], 2);
        assert_eq!(body["total_value"].as_f64(), Some(800.0));
    }

    #[tokio::test]
    async fn test_sync_without_credentials_is_rejected() {
        let (app, _) = app().await;
        let (status, _) = call(&app, Method::POST, "/bids/sync", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_analytics_lists_prompts() {
        let (app, _) = app().await;
        let (status, body) = call(&app, Method::GET, "/analytics/prompts", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["prompts"].as_array().unwrap().is_empty());
    }
}
