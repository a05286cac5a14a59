//! Bid amount calculation
//!
//! Fresh listings (no average yet) get 10% over the budget minimum; otherwise the
//! average bid scaled by the policy multiplier. The result is clamped to
//! `[min + 50, floor(max * 0.9)]` where a missing maximum means `2 * min`.
//! When the range is inverted the lower bound wins.

use crate::config::Policy;
use crate::types::Listing;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;

/// Added to the budget minimum for the lowest acceptable bid
const MIN_MARKUP: Decimal = dec!(50);

/// Share of the budget maximum a bid may reach
const MAX_SHARE: Decimal = dec!(0.9);

/// Markup over the minimum when no average bid exists
const FRESH_LISTING_FACTOR: Decimal = dec!(1.1);

/// Integer bid amount in the listing's own currency
pub fn compute_bid_amount(listing: &Listing, policy: &Policy) -> i64 {
    let min = listing.budget.minimum;
    let max = listing
        .budget
        .maximum
        .filter(|m| *m > Decimal::ZERO)
        .unwrap_or_else(|| min.saturating_mul(dec!(2)));

    // Budgets near the Decimal range saturate; the i64 conversion below caps them
    let base = match listing.bid_stats.bid_avg.filter(|avg| *avg > Decimal::ZERO) {
        Some(avg) => avg.saturating_mul(policy.bid_amount_multiplier),
        None => min.saturating_mul(FRESH_LISTING_FACTOR),
    };

    let proposed = base.floor();
    let ceiling = max.saturating_mul(MAX_SHARE).floor();
    let floor = min.saturating_add(MIN_MARKUP).ceil();

    proposed.min(ceiling).max(floor).to_i64().unwrap_or(i64::MAX)
}
