//! Listing scanner for the Freelancer REST API

use crate::config::{Config, FreelancerApi};
use crate::db::SyncedBid;
use crate::errors::ApiError;
use crate::types::{currency_code_of, integer_field, Listing, RawTimestamp};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

/// Header carrying the OAuth token
const OAUTH_HEADER: &str = "freelancer-oauth-v1";

/// Page size for bid history requests
const BID_PAGE_SIZE: usize = 100;

/// Upper bound on bid history pages fetched per sync
const MAX_BID_PAGES: usize = 10;

/// Source of newly posted listings
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Newest active listings first, at most `limit`
    async fn fetch_active_listings(&self, limit: u32) -> Result<Vec<Listing>, ApiError>;
}

/// Authenticated Freelancer API client
#[derive(Clone)]
pub struct FreelancerClient {
    client: Client,
    base_url: String,
    token: String,
}

impl FreelancerClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
        })
    }

    /// Client for the configured API, using the bidding token
    pub fn from_config(config: &Config) -> Result<Self> {
        let token = config
            .freelancer_oauth_token
            .clone()
            .context("FREELANCER_OAUTH_TOKEN not configured")?;
        Self::new(config.freelancer_api_url.clone(), token)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url).header(OAUTH_HEADER, &self.token)
    }

    pub(crate) fn post(&self, url: &str) -> RequestBuilder {
        self.client.post(url).header(OAUTH_HEADER, &self.token)
    }

    /// Send a request and return the `result` object of the response envelope
    pub(crate) async fn send_for_result(&self, request: RequestBuilder) -> Result<Value, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::from_network_error(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::from_network_error(&e))?;

        if !status.is_success() {
            return Err(ApiError::from_response(status.as_u16(), &body));
        }

        let envelope: Value =
            serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))?;

        if envelope.get("status").and_then(Value::as_str) == Some("error") {
            return Err(ApiError::from_response(status.as_u16(), &body));
        }

        Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Every bid placed by `bidder_id`, newest pages first
    pub async fn fetch_my_bids(&self, bidder_id: i64) -> Result<Vec<SyncedBid>, ApiError> {
        let url = FreelancerApi::bids_url(&self.base_url);
        let mut bids = Vec::new();

        for page in 0..MAX_BID_PAGES {
            let offset = page * BID_PAGE_SIZE;
            let request = self.get(&url).query(&[
                ("bidders[]", bidder_id.to_string()),
                ("limit", BID_PAGE_SIZE.to_string()),
                ("offset", offset.to_string()),
            ]);

            let result = self.send_for_result(request).await?;
            let batch = result
                .get("bids")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let batch_size = batch.len();

            bids.extend(
                batch
                    .iter()
                    .filter(|b| b.get("bidder_id").and_then(integer_field) == Some(bidder_id))
                    .filter_map(synced_bid_from_value),
            );

            debug!("Fetched bid page at offset {} ({} bids)", offset, batch_size);
            if batch_size < BID_PAGE_SIZE {
                break;
            }
        }

        info!("Fetched {} bids from marketplace", bids.len());
        Ok(bids)
    }

    /// Raw project objects by id, for titles and currency
    pub async fn fetch_projects(&self, ids: &[i64]) -> Result<HashMap<i64, Value>, ApiError> {
        let mut projects = HashMap::new();
        if ids.is_empty() {
            return Ok(projects);
        }

        let url = FreelancerApi::projects_url(&self.base_url);
        for chunk in ids.chunks(BID_PAGE_SIZE) {
            let mut query: Vec<(&str, String)> =
                chunk.iter().map(|id| ("projects[]", id.to_string())).collect();
            query.push(("limit", chunk.len().to_string()));

            let result = self.send_for_result(self.get(&url).query(&query)).await?;
            for project in result
                .get("projects")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                if let Some(id) = project.get("id").and_then(integer_field) {
                    projects.insert(id, project.clone());
                }
            }
        }

        Ok(projects)
    }
}

#[async_trait]
impl ListingSource for FreelancerClient {
    async fn fetch_active_listings(&self, limit: u32) -> Result<Vec<Listing>, ApiError> {
        let url = FreelancerApi::active_projects_url(&self.base_url);
        let request = self.get(&url).query(&[
            ("limit", limit.to_string()),
            ("full_description", "true".to_string()),
            ("job_details", "true".to_string()),
            ("user_details", "false".to_string()),
            ("sort_field", "time_updated".to_string()),
        ]);

        let result = self.send_for_result(request).await?;
        let listings = parse_listings(&result);

        let total = result
            .get("total_count")
            .and_then(integer_field)
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        info!(
            "Fetched {} newest active projects (total on platform: {})",
            listings.len(),
            total
        );

        Ok(listings)
    }
}

/// Listings from a `result` object, in the order returned
pub fn parse_listings(result: &Value) -> Vec<Listing> {
    result
        .get("projects")
        .and_then(Value::as_array)
        .map(|projects| projects.iter().filter_map(Listing::from_value).collect())
        .unwrap_or_default()
}

/// Read one remote bid. Title is left for the caller to resolve from the project.
pub fn synced_bid_from_value(bid: &Value) -> Option<SyncedBid> {
    let project_id = bid.get("project_id").and_then(integer_field)?;

    let bid_amount = ["amount", "bid_amount"]
        .iter()
        .find_map(|key| bid.get(*key).and_then(integer_field))
        .unwrap_or(0);

    let has_currency = bid.get("currency").is_some() || bid.get("currency_code").is_some();
    let currency_code = has_currency.then(|| currency_code_of(bid));

    let bid_message = ["description", "message", "bid_message"]
        .iter()
        .find_map(|key| bid.get(*key).and_then(Value::as_str).filter(|s| !s.is_empty()))
        .unwrap_or_default()
        .to_string();

    let reply_count = ["reply_count", "message_count", "replies"]
        .iter()
        .find_map(|key| bid.get(*key).and_then(integer_field).filter(|n| *n > 0))
        .unwrap_or(0);

    let applied_at = ["submitted_on", "time_submitted", "created_time", "submitted_time"]
        .iter()
        .filter_map(|key| bid.get(*key))
        .find_map(RawTimestamp::from_value)
        .and_then(|raw| raw.to_datetime());

    Some(SyncedBid {
        project_id,
        title: None,
        bid_amount,
        currency_code,
        bid_message,
        reply_count,
        applied_at,
    })
}
