//! Pulls the account's bid history from the marketplace into the local store

use crate::config::Config;
use crate::db::{Database, SyncedBid};
use crate::scanner::FreelancerClient;
use crate::types::currency_code_of;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Background syncs triggered by bid listing run at most this often
pub const SYNC_INTERVAL: Duration = Duration::from_secs(300);

pub struct BidSync {
    remote: Option<(FreelancerClient, i64)>,
    db: Arc<Database>,
    min_interval: Duration,
    last_started: Mutex<Option<Instant>>,
    running: AtomicBool,
}

impl BidSync {
    pub fn new(remote: Option<(FreelancerClient, i64)>, db: Arc<Database>) -> Self {
        Self {
            remote,
            db,
            min_interval: SYNC_INTERVAL,
            last_started: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Sync is available only with both a token and a bidder id
    pub fn from_config(config: &Config, db: Arc<Database>) -> Self {
        let remote = match (FreelancerClient::from_config(config), config.bidder_id) {
            (Ok(client), Some(bidder_id)) => Some((client, bidder_id)),
            _ => None,
        };
        Self::new(remote, db)
    }

    pub fn is_configured(&self) -> bool {
        self.remote.is_some()
    }

    /// Fetch remote bids and merge them; returns how many were merged
    pub async fn sync_now(&self) -> Result<usize> {
        let (client, bidder_id) = self
            .remote
            .as_ref()
            .context("Bid sync needs FREELANCER_OAUTH_TOKEN and FREELANCER_BIDDER_ID")?;

        let bids = client
            .fetch_my_bids(*bidder_id)
            .await
            .context("Failed to fetch bids from marketplace")?;
        if bids.is_empty() {
            info!("[Sync] No bids fetched from marketplace");
            return Ok(0);
        }

        let ids: Vec<i64> = bids.iter().map(|b| b.project_id).collect();
        let projects = match client.fetch_projects(&ids).await {
            Ok(projects) => projects,
            Err(e) => {
                warn!("[Sync] Project lookup failed, keeping stored titles and currency: {}", e);
                HashMap::new()
            }
        };

        let mut synced = 0;
        for bid in with_project_details(bids, &projects) {
            match self.db.upsert_synced_bid(&bid).await {
                Ok(()) => synced += 1,
                Err(e) => error!("[Sync] Error processing bid {}: {:#}", bid.project_id, e),
            }
        }

        info!("[Sync] Synced {} bids to database", synced);
        Ok(synced)
    }

    /// Whether a background sync should start now; claims the slot if so
    fn claim(&self, now: Instant) -> bool {
        if !self.is_configured() || self.running.load(Ordering::Acquire) {
            return false;
        }
        let Ok(mut last) = self.last_started.lock() else {
            return false;
        };
        let due = last.map_or(true, |t| now.duration_since(t) >= self.min_interval);
        if due {
            *last = Some(now);
        }
        due
    }

    /// Start a sync in the background unless one ran recently
    pub fn sync_in_background_if_due(self: &Arc<Self>) -> bool {
        if !self.claim(Instant::now()) {
            return false;
        }

        let sync = Arc::clone(self);
        tokio::spawn(async move {
            sync.running.store(true, Ordering::Release);
            if let Err(e) = sync.sync_now().await {
                error!("[Sync] Background sync error: {:#}", e);
            }
            sync.running.store(false, Ordering::Release);
        });
        true
    }
}

/// Fill title and currency from the project objects
fn with_project_details(bids: Vec<SyncedBid>, projects: &HashMap<i64, Value>) -> Vec<SyncedBid> {
    bids.into_iter()
        .map(|mut bid| {
            if let Some(project) = projects.get(&bid.project_id) {
                if let Some(title) = project
                    .get("title")
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
                {
                    bid.title = Some(title.to_string());
                }
                bid.currency_code = Some(currency_code_of(project));
            }
            bid
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn remote_bid(project_id: i64) -> SyncedBid {
        SyncedBid {
            project_id,
            title: None,
            bid_amount: 100,
            currency_code: None,
            bid_message: String::new(),
            reply_count: 0,
            applied_at: None,
        }
    }

    #[test]
    fn test_project_details_fill_title_and_currency() {
        let mut projects = HashMap::new();
        projects.insert(
            1,
            json!({"id": 1, "title": "Landing page", "currency": {"code": "GBP"}}),
        );

        let merged = with_project_details(vec![remote_bid(1), remote_bid(2)], &projects);
        assert_eq!(merged[0].title.as_deref(), Some("Landing page"));
        assert_eq!(merged[0].currency_code.as_deref(), Some("GBP"));
        assert!(merged[1].title.is_none());
        assert!(merged[1].currency_code.is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_sync() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let sync = Arc::new(BidSync::from_config(&Config::default(), db));

        assert!(!sync.is_configured());
        assert!(sync.sync_now().await.is_err());
        assert!(!sync.sync_in_background_if_due());
    }

    #[tokio::test]
    async fn test_claim_respects_interval() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let client = FreelancerClient::new("http://127.0.0.1:9", "token").unwrap();
        let sync = BidSync::new(Some((client, 1)), db);

        let t0 = Instant::now();
        assert!(sync.claim(t0));
        assert!(!sync.claim(t0 + Duration::from_secs(10)));
        assert!(sync.claim(t0 + SYNC_INTERVAL));
    }
}
