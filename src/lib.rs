//! Freelance Marketplace Auto-Bidder Library
//!
//! Polls the marketplace for newly posted projects, filters them against a
//! skill and budget policy, drafts a pitch with a generative model and places
//! a bid. Every placed bid is recorded for reporting.
//!
//! The companion HTTP service (`api`) exposes the policy, bid history, message
//! templates and start/stop control of the bidder process.

pub mod api;
pub mod config;
pub mod currency;
pub mod db;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod notifier;
pub mod scanner;
pub mod services;
pub mod strategies;
pub mod types;

pub use config::{Config, Policy, PromptSelectionMode};
pub use currency::{CurrencyConverter, StaticRateTable};
pub use db::Database;
pub use errors::ApiError;
pub use executor::{BidPlacer, BidSubmitter, SubmitOutcome};
pub use llm::{GeminiClient, TextGenerator};
pub use notifier::{notifier_from_config, Notifier};
pub use scanner::{FreelancerClient, ListingSource};
pub use strategies::{compute_bid_amount, EligibilityFilter, Verdict};
pub use types::{BidRecord, BidStatus, Listing, PromptTemplate};
