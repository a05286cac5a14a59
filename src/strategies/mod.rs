//! Bidding strategies: which listings to bid on and for how much

pub mod eligibility;
pub mod pricing;

pub use eligibility::{skills_match, EligibilityFilter, Rejection, Verdict};
pub use pricing::compute_bid_amount;
