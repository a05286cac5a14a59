//! The polling-and-bidding loop
//!
//! One sequential loop fetches the newest listings, filters the unseen ones and
//! hands each eligible listing to its own task (price → draft → submit), so a
//! slow model or marketplace call never delays scanning. The seen-set and the
//! backoff state belong to the loop alone; bid tasks only touch the store.

use crate::config::Policy;
use crate::currency::CurrencyConverter;
use crate::db::Database;
use crate::executor::{BidSubmitter, SubmitOutcome};
use crate::scanner::ListingSource;
use crate::services::backoff::RateLimitController;
use crate::services::drafter::MessageDrafter;
use crate::services::seen_set::SeenSet;
use crate::strategies::{compute_bid_amount, EligibilityFilter, Verdict};
use crate::types::Listing;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// First log line of a run; the control service treats it as activity
const STARTED_BANNER: &str = "AUTOBIDDER STARTED - Press Ctrl+C to stop";

/// How often the shutdown watcher checks for the stop file
const STOP_FILE_POLL: Duration = Duration::from_secs(1);

/// Price, draft and submit one eligible listing
pub struct BidPipeline {
    drafter: MessageDrafter,
    submitter: BidSubmitter,
}

impl BidPipeline {
    pub fn new(drafter: MessageDrafter, submitter: BidSubmitter) -> Self {
        Self { drafter, submitter }
    }

    pub async fn run(&self, listing: &Listing, policy: &Policy) -> SubmitOutcome {
        let amount = compute_bid_amount(listing, policy);
        let draft = self
            .drafter
            .draft(listing, policy.prompt_selection_mode, Utc::now())
            .await;
        self.submitter.submit(listing, amount, &draft, policy).await
    }
}

/// Loop settings fixed for the life of the process
#[derive(Debug, Clone)]
pub struct PollLoopConfig {
    /// Listings requested per poll
    pub fetch_limit: u32,
    /// In-flight bid tasks get this long to finish on shutdown
    pub grace_period: Duration,
    /// Removed on exit so the next start is not stopped immediately
    pub stop_file: Option<PathBuf>,
}

impl Default for PollLoopConfig {
    fn default() -> Self {
        Self {
            fetch_limit: 100,
            grace_period: Duration::from_secs(10),
            stop_file: None,
        }
    }
}

/// Counts for one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub expired: usize,
    pub fetched: usize,
    pub new_listings: usize,
    pub matched: usize,
    pub skipped: usize,
    pub already_seen: usize,
    pub throttled: bool,
    pub fetch_failed: bool,
}

pub struct PollLoop {
    config: PollLoopConfig,
    source: Arc<dyn ListingSource>,
    pipeline: Arc<BidPipeline>,
    db: Arc<Database>,
    converter: Arc<dyn CurrencyConverter>,
    seen: SeenSet,
    backoff: RateLimitController,
    tasks: JoinSet<()>,
    last_policy: Option<Policy>,
    fallback_skills_logged: bool,
}

impl PollLoop {
    pub fn new(
        config: PollLoopConfig,
        source: Arc<dyn ListingSource>,
        pipeline: Arc<BidPipeline>,
        db: Arc<Database>,
        converter: Arc<dyn CurrencyConverter>,
    ) -> Self {
        Self {
            config,
            source,
            pipeline,
            db,
            converter,
            seen: SeenSet::default(),
            backoff: RateLimitController::default(),
            tasks: JoinSet::new(),
            last_policy: None,
            fallback_skills_logged: false,
        }
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    pub fn backoff(&self) -> &RateLimitController {
        &self.backoff
    }

    /// Bid tasks not yet reaped
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Run until `shutdown` is cancelled. Errors returned here are fatal.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        info!("{}", "=".repeat(60));
        info!("{}", STARTED_BANNER);
        info!("{}", "=".repeat(60));

        while !shutdown.is_cancelled() {
            let (report, policy) = self.run_cycle(Utc::now()).await?;
            self.reap_finished();

            let base = Duration::from_secs(policy.poll_interval);
            let sleep = self.backoff.next_sleep(base, report.throttled);
            info!("Sleeping for {} seconds...", sleep.as_secs());

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(sleep) => {}
            }
        }

        self.drain(self.config.grace_period).await;

        if let Some(stop_file) = &self.config.stop_file {
            remove_stop_file(stop_file);
        }

        // Must stay the final line; the supervisor reads it as the stopped marker
        info!("{}", "=".repeat(60));
        info!("AUTOBIDDER STOPPED");
        Ok(())
    }

    /// One fetch-and-filter pass. Eligible listings are dispatched, not awaited.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<(CycleReport, Policy)> {
        let mut report = CycleReport {
            expired: self.seen.evict_expired(now),
            ..Default::default()
        };
        if report.expired > 0 {
            info!("Expired {} old project entries (re-checking them now)", report.expired);
        }

        let policy = self.current_policy().await?;

        info!("Scanning for new projects... (tracking: {})", self.seen.len());

        let listings = match self.source.fetch_active_listings(self.config.fetch_limit).await {
            Ok(listings) => {
                self.backoff.on_success();
                listings
            }
            Err(e) if e.is_rate_limited() => {
                let multiplier = self.backoff.on_throttled();
                warn!(
                    "Rate limited! Backing off: {} seconds (backoff multiplier: {}x)",
                    policy.poll_interval.saturating_mul(u64::from(multiplier)),
                    multiplier
                );
                report.throttled = true;
                return Ok((report, policy));
            }
            Err(e) => {
                error!("Search error: {}", e);
                report.fetch_failed = true;
                return Ok((report, policy));
            }
        };
        report.fetched = listings.len();

        let converter = self.converter.clone();
        let filter = EligibilityFilter::new(&policy, converter.as_ref());
        for listing in listings {
            if self.seen.is_seen(listing.id, now) {
                report.already_seen += 1;
                continue;
            }

            report.new_listings += 1;
            self.seen.mark_seen(listing.id, now);
            let trimmed = self.seen.trim_to_capacity();
            if trimmed > 0 {
                info!(
                    "Trimmed seen set to {} projects (removed {} oldest)",
                    self.seen.len(),
                    trimmed
                );
            }

            match filter.evaluate(&listing, now) {
                Verdict::Eligible { matched_skill } => {
                    report.matched += 1;
                    info!(
                        "✓ MATCHING PROJECT: {} - {} (skill: {})",
                        listing.id,
                        listing.short_title(50),
                        matched_skill
                    );
                    self.dispatch(listing, policy.clone());
                }
                Verdict::Rejected(_) => report.skipped += 1,
            }
        }

        if report.new_listings == 0 {
            info!("No new projects found ({} already seen)", report.already_seen);
        } else {
            info!(
                "Found {} new projects: {} matched, {} skipped",
                report.new_listings, report.matched, report.skipped
            );
        }

        Ok((report, policy))
    }

    /// Policy for this cycle; the previous one if the store cannot be read
    async fn current_policy(&mut self) -> Result<Policy> {
        let policy = match self.db.load_policy().await {
            Ok(policy) => policy,
            Err(e) => match &self.last_policy {
                Some(last) => {
                    warn!("Failed to load policy, keeping previous: {:#}", e);
                    last.clone()
                }
                None => return Err(e).context("Failed to load bidding policy"),
            },
        };

        let (_, fallback) = policy.effective_skills();
        if fallback && !self.fallback_skills_logged {
            info!("No skills configured, using the built-in skill list");
            self.fallback_skills_logged = true;
        }

        self.last_policy = Some(policy.clone());
        Ok(policy)
    }

    fn dispatch(&mut self, listing: Listing, policy: Policy) {
        let pipeline = self.pipeline.clone();
        self.tasks.spawn(async move {
            let outcome = pipeline.run(&listing, &policy).await;
            debug!("Bid task for {} finished: placed={}", listing.id, outcome.is_placed());
        });
    }

    fn reap_finished(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                error!("Bid task panicked: {}", e);
            }
        }
    }

    /// Wait up to `grace` for in-flight bid tasks, then abandon the rest
    pub async fn drain(&mut self, grace: Duration) {
        if self.tasks.is_empty() {
            return;
        }
        info!("Waiting up to {}s for {} bid task(s)", grace.as_secs(), self.tasks.len());

        let tasks = &mut self.tasks;
        let finished = tokio::time::timeout(grace, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    error!("Bid task panicked: {}", e);
                }
            }
        })
        .await;

        if finished.is_err() {
            warn!("Abandoning {} unfinished bid task(s)", self.tasks.len());
            self.tasks.abort_all();
            // Reap the cancelled tasks so nothing is left in flight
            while self.tasks.join_next().await.is_some() {}
        }
    }
}

/// Cancel `token` on Ctrl-C or when `stop_file` appears
pub fn spawn_shutdown_watcher(stop_file: Option<PathBuf>, token: CancellationToken) {
    tokio::spawn(async move {
        let stop_file_seen = async {
            match &stop_file {
                Some(path) => loop {
                    if path.exists() {
                        return;
                    }
                    tokio::time::sleep(STOP_FILE_POLL).await;
                },
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Interrupt received, stopping"),
            _ = stop_file_seen => info!("Stop file found, stopping"),
            _ = token.cancelled() => {}
        }
        token.cancel();
    });
}

fn remove_stop_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed stop file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove stop file {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::StaticRateTable;
    use crate::errors::ApiError;
    use crate::executor::{BidPlacer, PlaceBidRequest};
    use crate::llm::TextGenerator;
    use crate::notifier::NoopNotifier;
    use crate::types::{BidStats, Budget};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::Semaphore;

    struct ScriptedSource {
        batches: Mutex<VecDeque<Result<Vec<Listing>, ApiError>>>,
    }

    impl ScriptedSource {
        fn new(batches: Vec<Result<Vec<Listing>, ApiError>>) -> Arc<Self> {
            Arc::new(Self {
                batches: Mutex::new(batches.into()),
            })
        }
    }

    #[async_trait]
    impl ListingSource for ScriptedSource {
        async fn fetch_active_listings(&self, _limit: u32) -> Result<Vec<Listing>, ApiError> {
            self.batches.lock().unwrap().pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    struct EchoGenerator;

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, ApiError> {
            Ok("Drafted pitch".to_string())
        }
    }

    #[derive(Default)]
    struct RecordingPlacer {
        requests: Mutex<Vec<PlaceBidRequest>>,
    }

    #[async_trait]
    impl BidPlacer for RecordingPlacer {
        async fn place_bid(&self, request: &PlaceBidRequest) -> Result<(), ApiError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    /// Holds every bid until the test releases a permit
    struct GatedPlacer {
        gate: Semaphore,
        placed: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl BidPlacer for GatedPlacer {
        async fn place_bid(&self, request: &PlaceBidRequest) -> Result<(), ApiError> {
            let _permit = self.gate.acquire().await.unwrap();
            self.placed.lock().unwrap().push(request.project_id);
            Ok(())
        }
    }

    struct StalledPlacer;

    #[async_trait]
    impl BidPlacer for StalledPlacer {
        async fn place_bid(&self, _request: &PlaceBidRequest) -> Result<(), ApiError> {
            std::future::pending().await
        }
    }

    fn listing(id: i64, skill: &str, bid_count: u32) -> Listing {
        Listing {
            id,
            title: format!("Project {}", id),
            description: "Details".to_string(),
            skills: vec![skill.to_string()],
            budget: Budget {
                minimum: dec!(400),
                maximum: Some(dec!(800)),
            },
            bid_stats: BidStats {
                bid_count,
                bid_avg: None,
            },
            submitted_at: None,
            currency_code: "USD".to_string(),
        }
    }

    async fn poll_loop(
        source: Arc<ScriptedSource>,
        placer: Arc<dyn BidPlacer>,
    ) -> (PollLoop, Arc<Database>) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let drafter = MessageDrafter::new(db.clone(), Arc::new(EchoGenerator));
        let submitter = BidSubmitter::new(placer, db.clone(), Arc::new(NoopNotifier), 99);
        let pipeline = Arc::new(BidPipeline::new(drafter, submitter));
        let poll = PollLoop::new(
            PollLoopConfig::default(),
            source,
            pipeline,
            db.clone(),
            Arc::new(StaticRateTable::default()),
        );
        (poll, db)
    }

    #[tokio::test]
    async fn test_cycle_bids_on_eligible_listings_only() {
        let source = ScriptedSource::new(vec![Ok(vec![
            listing(1, "React", 3),
            listing(2, "Cobol", 3),
            listing(3, "React", 40),
        ])]);
        let placer = Arc::new(RecordingPlacer::default());
        let (mut poll, db) = poll_loop(source, placer.clone()).await;

        let (report, _) = poll.run_cycle(Utc::now()).await.unwrap();
        poll.drain(Duration::from_secs(5)).await;

        assert_eq!(report.new_listings, 3);
        assert_eq!(report.matched, 1);
        assert_eq!(report.skipped, 2);

        let requests = placer.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].project_id, 1);
        // No average bid: 440 lifted to the min + 50 floor
        assert_eq!(requests[0].amount, 450);
        assert_eq!(requests[0].description, "Drafted pitch");

        assert!(db.get_bid(1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_slow_bid_does_not_hold_up_scanning() {
        let source = ScriptedSource::new(vec![
            Ok(vec![listing(1, "React", 0)]),
            Ok(vec![listing(2, "React", 0)]),
        ]);
        let placer = Arc::new(GatedPlacer {
            gate: Semaphore::new(0),
            placed: Mutex::new(Vec::new()),
        });
        let (mut poll, db) = poll_loop(source, placer.clone()).await;

        let (first, _) = tokio::time::timeout(Duration::from_secs(5), poll.run_cycle(Utc::now()))
            .await
            .expect("cycle waited on the bid")
            .unwrap();
        assert_eq!(first.matched, 1);
        assert_eq!(poll.in_flight(), 1);
        assert!(placer.placed.lock().unwrap().is_empty());

        let (second, _) = tokio::time::timeout(Duration::from_secs(5), poll.run_cycle(Utc::now()))
            .await
            .expect("cycle waited on the bid")
            .unwrap();
        assert_eq!(second.new_listings, 1);
        assert_eq!(second.matched, 1);
        assert_eq!(poll.in_flight(), 2);

        placer.gate.add_permits(2);
        poll.drain(Duration::from_secs(5)).await;

        assert_eq!(poll.in_flight(), 0);
        let mut placed = placer.placed.lock().unwrap().clone();
        placed.sort();
        assert_eq!(placed, vec![1, 2]);
        assert!(db.get_bid(1).await.unwrap().is_some());
        assert!(db.get_bid(2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_drain_abandons_stalled_bids() {
        let source = ScriptedSource::new(vec![Ok(vec![listing(1, "React", 0)])]);
        let (mut poll, db) = poll_loop(source, Arc::new(StalledPlacer)).await;

        let (report, _) = poll.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.matched, 1);
        assert_eq!(poll.in_flight(), 1);

        tokio::time::timeout(Duration::from_secs(5), poll.drain(Duration::from_millis(100)))
            .await
            .expect("drain outlived its grace period");

        assert_eq!(poll.in_flight(), 0);
        assert!(db.get_bid(1).await.unwrap().is_none());
    }

    #[test]
    fn test_started_banner_is_plain_ascii() {
        assert!(STARTED_BANNER.is_ascii());
        assert!(STARTED_BANNER.starts_with("AUTOBIDDER STARTED"));
    }

    #[tokio::test]
    async fn test_seen_listings_are_not_rebid() {
        let source = ScriptedSource::new(vec![
            Ok(vec![listing(1, "React", 0)]),
            Ok(vec![listing(1, "React", 0)]),
        ]);
        let placer = Arc::new(RecordingPlacer::default());
        let (mut poll, _db) = poll_loop(source, placer.clone()).await;

        let now = Utc::now();
        poll.run_cycle(now).await.unwrap();
        let (second, _) = poll.run_cycle(now + chrono::Duration::seconds(30)).await.unwrap();
        poll.drain(Duration::from_secs(5)).await;

        assert_eq!(second.already_seen, 1);
        assert_eq!(second.new_listings, 0);
        assert_eq!(placer.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_listing_is_reconsidered() {
        let source = ScriptedSource::new(vec![
            Ok(vec![listing(1, "Cobol", 0)]),
            Ok(vec![listing(1, "Cobol", 0)]),
        ]);
        let (mut poll, _db) = poll_loop(source, Arc::new(RecordingPlacer::default())).await;

        let now = Utc::now();
        poll.run_cycle(now).await.unwrap();
        let (later, _) = poll.run_cycle(now + chrono::Duration::seconds(3601)).await.unwrap();

        assert_eq!(later.expired, 1);
        assert_eq!(later.new_listings, 1);
    }

    #[tokio::test]
    async fn test_throttling_drives_backoff() {
        let throttled = || Err(ApiError::RateLimited("429".to_string()));
        let source = ScriptedSource::new(vec![
            throttled(),
            throttled(),
            throttled(),
            Ok(vec![]),
            Err(ApiError::Network("Connection failed".to_string())),
        ]);
        let (mut poll, _db) = poll_loop(source, Arc::new(RecordingPlacer::default())).await;

        let now = Utc::now();
        let mut multipliers = Vec::new();
        for _ in 0..3 {
            let (report, _) = poll.run_cycle(now).await.unwrap();
            assert!(report.throttled);
            multipliers.push(poll.backoff().backoff_multiplier());
        }
        assert_eq!(multipliers, vec![2, 4, 8]);

        let (report, policy) = poll.run_cycle(now).await.unwrap();
        assert!(!report.throttled);
        assert_eq!(poll.backoff().backoff_multiplier(), 0);
        assert_eq!(
            poll.backoff().next_sleep(Duration::from_secs(policy.poll_interval), false),
            Duration::from_secs(30)
        );

        let (report, _) = poll.run_cycle(now).await.unwrap();
        assert!(report.fetch_failed);
        assert!(!report.throttled);
        assert_eq!(poll.backoff().consecutive_throttles(), 0);
    }

    #[tokio::test]
    async fn test_policy_edits_apply_next_cycle() {
        let source = ScriptedSource::new(vec![
            Ok(vec![listing(1, "Rust", 0)]),
            Ok(vec![listing(2, "Rust", 0)]),
        ]);
        let placer = Arc::new(RecordingPlacer::default());
        let (mut poll, db) = poll_loop(source, placer.clone()).await;

        let (first, _) = poll.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(first.matched, 0);

        let mut policy = db.load_policy().await.unwrap();
        policy.my_skills = vec!["rust".to_string()];
        db.save_policy(&policy).await.unwrap();

        let (second, _) = poll.run_cycle(Utc::now()).await.unwrap();
        poll.drain(Duration::from_secs(5)).await;
        assert_eq!(second.matched, 1);
        assert_eq!(placer.requests.lock().unwrap()[0].project_id, 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel_and_removes_stop_file() {
        let dir = std::env::temp_dir().join(format!("bidder-stop-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let stop_file = dir.join("stop");
        std::fs::write(&stop_file, "stop").unwrap();

        let source = ScriptedSource::new(vec![]);
        let (mut poll, _db) = poll_loop(source, Arc::new(RecordingPlacer::default())).await;
        poll.config.stop_file = Some(stop_file.clone());

        let token = CancellationToken::new();
        spawn_shutdown_watcher(Some(stop_file.clone()), token.clone());

        tokio::time::timeout(Duration::from_secs(10), poll.run(token))
            .await
            .expect("loop did not stop")
            .unwrap();

        assert!(!stop_file.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
