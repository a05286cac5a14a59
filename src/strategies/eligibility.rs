//! Listing eligibility filter
//!
//! Checks run in order and stop at the first failure:
//! age, USD budget, competition, skill overlap. Malformed listing data passes
//! rather than rejects.

use crate::config::Policy;
use crate::currency::CurrencyConverter;
use crate::types::Listing;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use tracing::debug;

/// Why a listing was skipped
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    TooOld { age_minutes: i64, max_minutes: u32 },
    BudgetTooLow { usd: Decimal, min_usd: Decimal },
    TooManyBids { bid_count: u32, max_bids: u32 },
    NoSkillMatch,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::TooOld { age_minutes, max_minutes } => {
                write!(f, "too old ({} min > {} min)", age_minutes, max_minutes)
            }
            Rejection::BudgetTooLow { usd, min_usd } => {
                write!(f, "budget too low (${} < ${})", usd.round_dp(2), min_usd)
            }
            Rejection::TooManyBids { bid_count, max_bids } => {
                write!(f, "too many bids ({} >= {})", bid_count, max_bids)
            }
            Rejection::NoSkillMatch => write!(f, "no matching skills"),
        }
    }
}

/// Outcome of evaluating one listing
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Carries the policy skill that matched
    Eligible { matched_skill: String },
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Verdict::Eligible { .. })
    }
}

/// Eligibility filter for one poll cycle's policy
pub struct EligibilityFilter<'a> {
    policy: &'a Policy,
    skills: Vec<String>,
    converter: &'a dyn CurrencyConverter,
}

impl<'a> EligibilityFilter<'a> {
    pub fn new(policy: &'a Policy, converter: &'a dyn CurrencyConverter) -> Self {
        let (skills, _) = policy.effective_skills();
        Self {
            policy,
            skills,
            converter,
        }
    }

    /// Skills the filter matches against
    pub fn skills(&self) -> &[String] {
        &self.skills
    }

    pub fn is_eligible(&self, listing: &Listing, now: DateTime<Utc>) -> bool {
        self.evaluate(listing, now).is_eligible()
    }

    pub fn evaluate(&self, listing: &Listing, now: DateTime<Utc>) -> Verdict {
        let verdict = self.check(listing, now);
        if let Verdict::Rejected(reason) = &verdict {
            debug!("[Filter] Skipping {} ({}): {}", listing.id, listing.short_title(50), reason);
        }
        verdict
    }

    fn check(&self, listing: &Listing, now: DateTime<Utc>) -> Verdict {
        let max_age = self.policy.max_project_age_minutes;
        if max_age > 0 {
            // Unknown posting time passes
            if let Some(age_minutes) = listing.age_minutes(now) {
                if age_minutes > i64::from(max_age) {
                    return Verdict::Rejected(Rejection::TooOld {
                        age_minutes,
                        max_minutes: max_age,
                    });
                }
            }
        }

        let usd = self
            .converter
            .to_usd(listing.budget.minimum, &listing.currency_code);
        if usd < self.policy.min_budget {
            return Verdict::Rejected(Rejection::BudgetTooLow {
                usd,
                min_usd: self.policy.min_budget,
            });
        }

        if listing.bid_stats.bid_count >= self.policy.max_existing_bids {
            return Verdict::Rejected(Rejection::TooManyBids {
                bid_count: listing.bid_stats.bid_count,
                max_bids: self.policy.max_existing_bids,
            });
        }

        match self.matching_skill(listing) {
            Some(skill) => Verdict::Eligible {
                matched_skill: skill.to_string(),
            },
            None => Verdict::Rejected(Rejection::NoSkillMatch),
        }
    }

    fn matching_skill(&self, listing: &Listing) -> Option<&str> {
        let required = listing.normalized_skills();

        if required.is_empty() {
            let text = format!("{} {}", listing.title, listing.description).to_lowercase();
            return self
                .skills
                .iter()
                .find(|mine| text.contains(mine.as_str()))
                .map(String::as_str);
        }

        self.skills
            .iter()
            .find(|mine| {
                required
                    .iter()
                    .any(|req| skills_match(req, mine, self.policy.substring_skill_match))
            })
            .map(String::as_str)
    }
}

/// Compare one required skill with one of ours, both already lower-cased.
///
/// Exact equality, then containment either way (when `allow_substring`), then
/// equality with `.`, spaces and `-` removed. Containment over-matches on
/// purpose: "java" matches "javascript".
pub fn skills_match(required: &str, mine: &str, allow_substring: bool) -> bool {
    if required.is_empty() || mine.is_empty() {
        return false;
    }
    if required == mine {
        return true;
    }
    if allow_substring && (required.contains(mine) || mine.contains(required)) {
        return true;
    }
    normalize_skill(required) == normalize_skill(mine)
}

fn normalize_skill(skill: &str) -> String {
    skill.chars().filter(|c| !matches!(c, '.' | ' ' | '-')).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::StaticRateTable;
    use crate::types::{BidStats, Budget, RawTimestamp};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn listing(skills: &[&str]) -> Listing {
        Listing {
            id: 1,
            title: "Mobile app build".to_string(),
            description: "Looking for a developer".to_string(),
            skills: skills.iter().map(|s| s.to_string()).collect(),
            budget: Budget {
                minimum: dec!(500),
                maximum: Some(dec!(1000)),
            },
            bid_stats: BidStats {
                bid_count: 3,
                bid_avg: None,
            },
            submitted_at: None,
            currency_code: "USD".to_string(),
        }
    }

    fn policy(skills: &[&str]) -> Policy {
        Policy {
            my_skills: skills.iter().map(|s| s.to_string()).collect(),
            ..Policy::default()
        }
    }

    #[test]
    fn test_skill_match_rules() {
        assert!(skills_match("next.js", "nextjs", true));
        assert!(skills_match("next.js", "nextjs", false));
        assert!(skills_match("react", "react native", true));
        assert!(skills_match("java", "javascript", true));
        assert!(!skills_match("java", "javascript", false));
        assert!(skills_match("react-native", "react native", false));
        assert!(!skills_match("", "react", true));
    }

    #[test]
    fn test_eligible_on_single_overlap() {
        let rates = StaticRateTable::default();
        let policy = policy(&["Flutter", "rust"]);
        let filter = EligibilityFilter::new(&policy, &rates);

        let verdict = filter.evaluate(&listing(&["PHP", "Rust"]), Utc::now());
        assert_eq!(
            verdict,
            Verdict::Eligible {
                matched_skill: "rust".to_string()
            }
        );
    }

    #[test]
    fn test_no_skill_overlap_rejected() {
        let rates = StaticRateTable::default();
        let policy = policy(&["flutter"]);
        let filter = EligibilityFilter::new(&policy, &rates);

        let verdict = filter.evaluate(&listing(&["PHP", "WordPress"]), Utc::now());
        assert_eq!(verdict, Verdict::Rejected(Rejection::NoSkillMatch));
    }

    #[test]
    fn test_no_required_skills_searches_text() {
        let rates = StaticRateTable::default();
        let policy = policy(&["mobile app"]);
        let filter = EligibilityFilter::new(&policy, &rates);
        assert!(filter.is_eligible(&listing(&[]), Utc::now()));

        let policy = policy_with_skill("blockchain");
        let filter = EligibilityFilter::new(&policy, &rates);
        assert!(!filter.is_eligible(&listing(&[]), Utc::now()));
    }

    fn policy_with_skill(skill: &str) -> Policy {
        policy(&[skill])
    }

    #[test]
    fn test_budget_converted_to_usd() {
        let rates = StaticRateTable::default();
        let policy = policy(&["php"]);
        let filter = EligibilityFilter::new(&policy, &rates);

        let mut inr = listing(&["PHP"]);
        inr.budget.minimum = dec!(10000);
        inr.currency_code = "INR".to_string();

        match filter.evaluate(&inr, Utc::now()) {
            Verdict::Rejected(Rejection::BudgetTooLow { usd, .. }) => assert_eq!(usd, dec!(120)),
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[test]
    fn test_out_of_range_budget_fails_open() {
        let rates = StaticRateTable::default();
        let policy = policy(&["react"]);
        let filter = EligibilityFilter::new(&policy, &rates);

        let project = serde_json::json!({
            "id": 77,
            "budget": {"minimum": "70000000000000000000000000000"},
            "currency": {"code": "GBP"},
            "jobs": [{"name": "react"}]
        });
        let huge = Listing::from_value(&project).unwrap();
        assert_eq!(huge.currency_code, "GBP");

        assert!(filter.is_eligible(&huge, Utc::now()));
    }

    #[test]
    fn test_competition_ceiling() {
        let rates = StaticRateTable::default();
        let policy = policy(&["php"]);
        let filter = EligibilityFilter::new(&policy, &rates);

        let mut crowded = listing(&["PHP"]);
        crowded.bid_stats.bid_count = 25;
        assert!(!filter.is_eligible(&crowded, Utc::now()));

        crowded.bid_stats.bid_count = 24;
        assert!(filter.is_eligible(&crowded, Utc::now()));
    }

    #[test]
    fn test_age_check_fails_open() {
        let rates = StaticRateTable::default();
        let mut policy = policy(&["php"]);
        policy.max_project_age_minutes = 10;
        let filter = EligibilityFilter::new(&policy, &rates);
        let now = Utc::now();

        let mut old = listing(&["PHP"]);
        old.submitted_at = Some(RawTimestamp::Epoch((now - Duration::minutes(30)).timestamp() as f64));
        assert!(matches!(
            filter.evaluate(&old, now),
            Verdict::Rejected(Rejection::TooOld { .. })
        ));

        let mut fresh = listing(&["PHP"]);
        fresh.submitted_at = Some(RawTimestamp::Text((now - Duration::minutes(3)).to_rfc3339()));
        assert!(filter.is_eligible(&fresh, now));

        let mut garbled = listing(&["PHP"]);
        garbled.submitted_at = Some(RawTimestamp::Text("not a date".to_string()));
        assert!(filter.is_eligible(&garbled, now));
    }

    #[test]
    fn test_age_zero_disables_check() {
        let rates = StaticRateTable::default();
        let policy = policy(&["php"]);
        let filter = EligibilityFilter::new(&policy, &rates);

        let mut ancient = listing(&["PHP"]);
        ancient.submitted_at = Some(RawTimestamp::Epoch(0.0));
        assert!(filter.is_eligible(&ancient, Utc::now()));
    }

    #[test]
    fn test_evaluation_is_repeatable() {
        let rates = StaticRateTable::default();
        let policy = policy(&["react"]);
        let filter = EligibilityFilter::new(&policy, &rates);
        let now = Utc::now();
        let candidate = listing(&["React Native"]);

        assert_eq!(filter.evaluate(&candidate, now), filter.evaluate(&candidate, now));
    }
}
