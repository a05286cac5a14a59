//! Bid placement on the marketplace
//!
//! [`BidSubmitter`] places one bid and records it. A failed placement is logged
//! and reported, never retried here. Once the marketplace has accepted a bid, a
//! failure to record it is only a reporting loss.

use crate::config::{FreelancerApi, Policy};
use crate::db::Database;
use crate::errors::ApiError;
use crate::notifier::Notifier;
use crate::scanner::FreelancerClient;
use crate::services::drafter::Draft;
use crate::types::{BidRecord, BidStatus, Listing};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Body of a bid placement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceBidRequest {
    pub project_id: i64,
    pub bidder_id: i64,
    pub amount: i64,
    /// Delivery period in days
    pub period: u32,
    pub milestone_percentage: u32,
    pub description: String,
}

/// Remote bid placement
#[async_trait]
pub trait BidPlacer: Send + Sync {
    async fn place_bid(&self, request: &PlaceBidRequest) -> Result<(), ApiError>;
}

#[async_trait]
impl BidPlacer for FreelancerClient {
    async fn place_bid(&self, request: &PlaceBidRequest) -> Result<(), ApiError> {
        let url = FreelancerApi::bids_url(self.base_url());
        self.send_for_result(self.post(&url).json(request)).await?;
        Ok(())
    }
}

/// Result of one submission
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Marketplace accepted the bid
    Placed { recorded: bool },
    /// Marketplace rejected the bid or could not be reached
    Failed(ApiError),
}

impl SubmitOutcome {
    pub fn is_placed(&self) -> bool {
        matches!(self, SubmitOutcome::Placed { .. })
    }
}

pub struct BidSubmitter {
    placer: Arc<dyn BidPlacer>,
    db: Arc<Database>,
    notifier: Arc<dyn Notifier>,
    bidder_id: i64,
}

impl BidSubmitter {
    pub fn new(
        placer: Arc<dyn BidPlacer>,
        db: Arc<Database>,
        notifier: Arc<dyn Notifier>,
        bidder_id: i64,
    ) -> Self {
        Self {
            placer,
            db,
            notifier,
            bidder_id,
        }
    }

    /// Place a bid of `amount` with the drafted message, then record it
    pub async fn submit(
        &self,
        listing: &Listing,
        amount: i64,
        draft: &Draft,
        policy: &Policy,
    ) -> SubmitOutcome {
        let started = Instant::now();
        let pid = listing.id;

        info!("Attempting to bid on project {}: {}", pid, listing.short_title(60));

        let request = PlaceBidRequest {
            project_id: pid,
            bidder_id: self.bidder_id,
            amount,
            period: policy.default_delivery_days,
            milestone_percentage: policy.milestone_percent,
            description: draft.message.clone(),
        };

        if let Err(e) = self.placer.place_bid(&request).await {
            error!("Bid failed on {}: {}", pid, e);
            return SubmitOutcome::Failed(e);
        }

        let recorded = self.record(listing, amount, draft).await;

        self.notifier.notify(&format!(
            "BID PLACED → {} | ${} | ID: {}",
            listing.short_title(50),
            amount,
            pid
        ));
        info!(
            "BID SUCCESS → {} | {} {} | {} | Time: {:.1}s",
            pid,
            amount,
            listing.currency_code,
            listing.short_title(60),
            started.elapsed().as_secs_f64()
        );

        SubmitOutcome::Placed { recorded }
    }

    async fn record(&self, listing: &Listing, amount: i64, draft: &Draft) -> bool {
        match self.db.get_bid_status(listing.id).await {
            Ok(Some(BidStatus::Won)) => info!("Re-bid on won project {}, keeping won status", listing.id),
            Ok(Some(_)) => info!("Re-bid on project {}, overwriting previous record", listing.id),
            _ => {}
        }

        let record = BidRecord {
            project_id: listing.id,
            title: listing.title.clone(),
            bid_amount: amount,
            currency_code: listing.currency_code.clone(),
            status: BidStatus::Applied,
            bid_message: draft.message.clone(),
            prompt_id: draft.template_id,
            prompt_hash: draft.prompt_hash.clone(),
            outsource_cost: None,
            profit: None,
            reply_count: 0,
            applied_at: Some(Utc::now()),
            prompt_name: None,
        };

        match self.db.record_placed_bid(&record).await {
            Ok(()) => true,
            Err(e) => {
                error!("Bid {} placed but not recorded: {:#}", listing.id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewPrompt;
    use crate::types::{BidStats, Budget};
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPlacer {
        fail_with: Option<ApiError>,
        requests: Mutex<Vec<PlaceBidRequest>>,
    }

    #[async_trait]
    impl BidPlacer for RecordingPlacer {
        async fn place_bid(&self, request: &PlaceBidRequest) -> Result<(), ApiError> {
            self.requests.lock().unwrap().push(request.clone());
            match &self.fail_with {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }
    }

    #[derive(Default)]
    struct CollectingNotifier {
        messages: Mutex<Vec<String>>,
    }

    impl Notifier for CollectingNotifier {
        fn notify(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    fn listing() -> Listing {
        Listing {
            id: 501,
            title: "Flutter delivery app".to_string(),
            description: "Courier tracking".to_string(),
            skills: vec!["Flutter".to_string()],
            budget: Budget {
                minimum: dec!(20000),
                maximum: Some(dec!(50000)),
            },
            bid_stats: BidStats::default(),
            submitted_at: None,
            currency_code: "INR".to_string(),
        }
    }

    fn draft(template_id: Option<i64>) -> Draft {
        Draft {
            message: "Pitch".to_string(),
            template_id,
            prompt_hash: Some("0123456789abcdef".to_string()),
        }
    }

    #[tokio::test]
    async fn test_successful_bid_is_recorded_and_counted() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let prompt = db
            .create_prompt(&NewPrompt {
                name: "Mobile".to_string(),
                description: None,
                template: "body".to_string(),
                is_active: true,
            })
            .await
            .unwrap();

        let placer = Arc::new(RecordingPlacer::default());
        let notifier = Arc::new(CollectingNotifier::default());
        let submitter = BidSubmitter::new(placer.clone(), db.clone(), notifier.clone(), 42);

        let outcome = submitter
            .submit(&listing(), 22000, &draft(Some(prompt.id)), &Policy::default())
            .await;
        assert_eq!(outcome, SubmitOutcome::Placed { recorded: true });

        let sent = placer.requests.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].bidder_id, 42);
        assert_eq!(sent[0].period, 7);
        assert_eq!(sent[0].milestone_percentage, 50);

        let stored = db.get_bid(501).await.unwrap().unwrap();
        assert_eq!(stored.bid_amount, 22000);
        assert_eq!(stored.currency_code, "INR");
        assert_eq!(stored.prompt_id, Some(prompt.id));

        let prompt = db.get_prompt(prompt.id).await.unwrap().unwrap();
        assert_eq!(prompt.stats_bids, 1);

        let messages = notifier.messages.lock().unwrap().clone();
        assert_eq!(messages, vec!["BID PLACED → Flutter delivery app | $22000 | ID: 501".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_bid_is_not_recorded() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let placer = Arc::new(RecordingPlacer {
            fail_with: Some(ApiError::Unknown {
                status: 409,
                body: "You have already bid on this project".to_string(),
            }),
            ..Default::default()
        });
        let notifier = Arc::new(CollectingNotifier::default());
        let submitter = BidSubmitter::new(placer.clone(), db.clone(), notifier.clone(), 42);

        let outcome = submitter.submit(&listing(), 22000, &draft(None), &Policy::default()).await;

        assert!(!outcome.is_placed());
        assert_eq!(placer.requests.lock().unwrap().len(), 1);
        assert!(db.get_bid(501).await.unwrap().is_none());
        assert!(notifier.messages.lock().unwrap().is_empty());
    }

    #[test]
    fn test_request_body_field_names() {
        let request = PlaceBidRequest {
            project_id: 1,
            bidder_id: 2,
            amount: 300,
            period: 7,
            milestone_percentage: 50,
            description: "Hi".to_string(),
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["period"], 7);
        assert_eq!(body["milestone_percentage"], 50);
        assert_eq!(body["description"], "Hi");
    }
}
