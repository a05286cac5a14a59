//! Core types for the auto-bidder

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Fields that may carry a listing's posting time, in lookup order
const SUBMITTED_AT_FIELDS: [&str; 5] = [
    "time_submitted",
    "submitdate",
    "time_created",
    "created_time",
    "submit_date",
];

/// A project listing fetched from the marketplace.
///
/// Built leniently from the raw JSON: missing or malformed fields fall back to
/// permissive defaults instead of dropping the listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub id: i64,
    pub title: String,
    pub description: String,
    /// Required skill names as published, in order
    pub skills: Vec<String>,
    pub budget: Budget,
    pub bid_stats: BidStats,
    pub submitted_at: Option<RawTimestamp>,
    /// Currency of the budget, upper-case ISO code
    pub currency_code: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Budget {
    pub minimum: Decimal,
    pub maximum: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BidStats {
    pub bid_count: u32,
    pub bid_avg: Option<Decimal>,
}

/// Posting time as the API delivered it
#[derive(Debug, Clone, PartialEq)]
pub enum RawTimestamp {
    Epoch(f64),
    Text(String),
}

impl RawTimestamp {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(RawTimestamp::Epoch),
            Value::String(s) if !s.trim().is_empty() => Some(RawTimestamp::Text(s.trim().to_string())),
            _ => None,
        }
    }

    /// Interpret as UTC. ISO-8601 when the text contains a `T`, epoch seconds otherwise.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            RawTimestamp::Epoch(secs) => epoch_to_datetime(*secs),
            RawTimestamp::Text(text) if text.contains('T') => DateTime::parse_from_rfc3339(text)
                .map(|d| d.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                        .ok()
                        .map(|naive| naive.and_utc())
                }),
            RawTimestamp::Text(text) => text.parse::<f64>().ok().and_then(epoch_to_datetime),
        }
    }
}

fn epoch_to_datetime(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.trunc() as i64;
    let nanos = ((secs - secs.trunc()) * 1e9) as u32;
    Utc.timestamp_opt(whole, nanos).single()
}

impl Listing {
    /// Parse one project object. Only a missing or non-integer `id` rejects it.
    pub fn from_value(project: &Value) -> Option<Self> {
        let id = project.get("id").and_then(integer_field)?;

        let title = project
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let description = project
            .get("description")
            .or_else(|| project.get("preview_description"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let skills = project
            .get("jobs")
            .and_then(Value::as_array)
            .map(|jobs| {
                jobs.iter()
                    .filter_map(|job| job.get("name").and_then(Value::as_str))
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let budget_value = project.get("budget");
        let budget = Budget {
            minimum: budget_value
                .and_then(|b| b.get("minimum"))
                .and_then(decimal_field)
                .unwrap_or_default(),
            maximum: budget_value
                .and_then(|b| b.get("maximum"))
                .and_then(decimal_field)
                .filter(|m| !m.is_zero()),
        };

        let stats_value = project.get("bid_stats");
        let bid_stats = BidStats {
            bid_count: stats_value
                .and_then(|s| s.get("bid_count"))
                .and_then(integer_field)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(0),
            bid_avg: stats_value
                .and_then(|s| s.get("bid_avg"))
                .and_then(decimal_field)
                .filter(|avg| !avg.is_zero()),
        };

        let submitted_at = SUBMITTED_AT_FIELDS
            .iter()
            .filter_map(|field| project.get(*field))
            .find_map(RawTimestamp::from_value);

        Some(Self {
            id,
            title,
            description,
            skills,
            budget,
            bid_stats,
            submitted_at,
            currency_code: currency_code_of(project),
        })
    }

    /// Lower-cased required skills used for matching
    pub fn normalized_skills(&self) -> Vec<String> {
        self.skills
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Posting time, if present and parseable
    pub fn submitted_at_utc(&self) -> Option<DateTime<Utc>> {
        self.submitted_at.as_ref().and_then(RawTimestamp::to_datetime)
    }

    /// Age in whole minutes at `now`, if the posting time is known
    pub fn age_minutes(&self, now: DateTime<Utc>) -> Option<i64> {
        self.submitted_at_utc().map(|t| (now - t).num_seconds() / 60)
    }

    /// Title truncated for log and notification lines
    pub fn short_title(&self, max_len: usize) -> String {
        truncate_chars(&self.title, max_len)
    }
}

/// Resolve a currency code from the shapes the API has been seen to use:
/// `budget.currency.code`, `budget.currency` as a string, `budget.currency_code`,
/// then the same at the project level. Defaults to USD.
pub fn currency_code_of(project: &Value) -> String {
    let from_container = |container: &Value| -> Option<String> {
        let nested = match container.get("currency") {
            Some(Value::Object(obj)) => obj.get("code").and_then(Value::as_str).map(str::to_string),
            Some(Value::String(code)) => Some(code.clone()),
            _ => None,
        };
        nested.or_else(|| {
            container
                .get("currency_code")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
    };

    project
        .get("budget")
        .and_then(from_container)
        .or_else(|| from_container(project))
        .map(|code| code.trim().to_uppercase())
        .filter(|code| !code.is_empty())
        .unwrap_or_else(|| "USD".to_string())
}

/// Integer from a JSON number or numeric string
pub fn integer_field(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Decimal from a JSON number or numeric string
pub fn decimal_field(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(Decimal::from)
            .or_else(|| n.as_f64().and_then(Decimal::from_f64)),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Truncate on a character boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Lifecycle of a bid record; only ever advances applied → won
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BidStatus {
    Applied,
    Won,
}

impl BidStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BidStatus::Applied => "applied",
            BidStatus::Won => "won",
        }
    }

    /// Unknown values read back from storage count as applied
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("won") {
            BidStatus::Won
        } else {
            BidStatus::Applied
        }
    }
}

impl fmt::Display for BidStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of the bid history, keyed by project id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidRecord {
    pub project_id: i64,
    pub title: String,
    /// Integer amount in `currency_code`
    pub bid_amount: i64,
    pub currency_code: String,
    pub status: BidStatus,
    pub bid_message: String,
    pub prompt_id: Option<i64>,
    pub prompt_hash: Option<String>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub outsource_cost: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub profit: Option<Decimal>,
    pub reply_count: i64,
    pub applied_at: Option<DateTime<Utc>>,
    /// Name of the template used, filled in by listing queries
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prompt_name: Option<String>,
}

/// A message template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub template: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub stats_bids: i64,
    pub stats_replies: i64,
    pub stats_won: i64,
}

/// Fingerprint of a template body: first 16 hex chars of its SHA-256.
/// Stored on each bid so analytics survive template edits and deletion.
pub fn prompt_hash(template: &str) -> String {
    let digest = Sha256::digest(template.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Usage counter on a template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStat {
    Bids,
    Replies,
    Wins,
}

impl PromptStat {
    pub fn column(&self) -> &'static str {
        match self {
            PromptStat::Bids => "stats_bids",
            PromptStat::Replies => "stats_replies",
            PromptStat::Wins => "stats_won",
        }
    }
}

/// Aggregate bid statistics, amounts converted to USD
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BidSummaryStats {
    pub total_bids: i64,
    pub applied: i64,
    pub won: i64,
    pub replies: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_value: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_profit: Decimal,
}

/// Performance of one template body, grouped by its hash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptAnalytics {
    pub prompt_hash: String,
    pub prompt_name: Option<String>,
    pub total_bids: i64,
    pub total_replies: i64,
    pub total_won: i64,
    /// Percentage of bids with at least one reply
    pub reply_rate: f64,
    pub first_used: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn sample_project() -> Value {
        json!({
            "id": 38001234,
            "title": "Build a Next.js dashboard",
            "description": "Need a dashboard with charts",
            "jobs": [{"id": 3, "name": "Next.js"}, {"id": 9, "name": " TypeScript "}],
            "budget": {"minimum": 250, "maximum": 750.5},
            "bid_stats": {"bid_count": 4, "bid_avg": 410.25},
            "currency": {"id": 1, "code": "usd", "sign": "$"},
            "time_submitted": 1700000000
        })
    }

    #[test]
    fn test_listing_from_value() {
        let listing = Listing::from_value(&sample_project()).unwrap();
        assert_eq!(listing.id, 38001234);
        assert_eq!(listing.skills, vec!["Next.js", "TypeScript"]);
        assert_eq!(listing.normalized_skills(), vec!["next.js", "typescript"]);
        assert_eq!(listing.budget.minimum, dec!(250));
        assert_eq!(listing.budget.maximum, Some(dec!(750.5)));
        assert_eq!(listing.bid_stats.bid_count, 4);
        assert_eq!(listing.bid_stats.bid_avg, Some(dec!(410.25)));
        assert_eq!(listing.currency_code, "USD");
        assert_eq!(listing.submitted_at, Some(RawTimestamp::Epoch(1700000000.0)));
    }

    #[test]
    fn test_listing_tolerates_missing_fields() {
        let listing = Listing::from_value(&json!({"id": 5})).unwrap();
        assert_eq!(listing.title, "");
        assert!(listing.skills.is_empty());
        assert_eq!(listing.budget.minimum, Decimal::ZERO);
        assert_eq!(listing.budget.maximum, None);
        assert_eq!(listing.bid_stats.bid_avg, None);
        assert_eq!(listing.currency_code, "USD");
        assert!(listing.submitted_at.is_none());

        assert!(Listing::from_value(&json!({"title": "no id"})).is_none());
    }

    #[test]
    fn test_zero_maximum_and_average_treated_as_absent() {
        let listing = Listing::from_value(&json!({
            "id": 1,
            "budget": {"minimum": 100, "maximum": 0},
            "bid_stats": {"bid_count": 0, "bid_avg": 0}
        }))
        .unwrap();
        assert_eq!(listing.budget.maximum, None);
        assert_eq!(listing.bid_stats.bid_avg, None);
    }

    #[test]
    fn test_currency_shapes() {
        assert_eq!(currency_code_of(&json!({"budget": {"currency": {"code": "INR"}}})), "INR");
        assert_eq!(currency_code_of(&json!({"budget": {"currency": "eur"}})), "EUR");
        assert_eq!(currency_code_of(&json!({"budget": {"currency_code": "GBP"}})), "GBP");
        assert_eq!(currency_code_of(&json!({"currency": {"code": "AUD"}})), "AUD");
        assert_eq!(currency_code_of(&json!({"currency": "CAD"})), "CAD");
        assert_eq!(currency_code_of(&json!({"currency_code": "JPY"})), "JPY");
        assert_eq!(currency_code_of(&json!({"budget": {}})), "USD");
    }

    #[test]
    fn test_timestamp_encodings() {
        let iso = RawTimestamp::Text("2024-05-01T12:00:00Z".to_string());
        assert_eq!(iso.to_datetime().unwrap().timestamp(), 1714564800);

        let naive = RawTimestamp::Text("2024-05-01T12:00:00".to_string());
        assert_eq!(naive.to_datetime().unwrap().timestamp(), 1714564800);

        let epoch_text = RawTimestamp::Text("1714564800".to_string());
        assert_eq!(epoch_text.to_datetime().unwrap().timestamp(), 1714564800);

        assert!(RawTimestamp::Text("yesterday".to_string()).to_datetime().is_none());
    }

    #[test]
    fn test_submitted_at_field_order() {
        let listing = Listing::from_value(&json!({
            "id": 1,
            "submitdate": "2024-05-01T12:00:00Z",
            "time_created": 1
        }))
        .unwrap();
        assert_eq!(listing.submitted_at_utc().unwrap().timestamp(), 1714564800);
    }

    #[test]
    fn test_prompt_hash_is_stable_prefix() {
        let hash = prompt_hash("hello");
        assert_eq!(hash.len(), 16);
        assert_eq!(hash, "2cf24dba5fb0a30e");
        assert_ne!(prompt_hash("hello "), hash);
    }

    #[test]
    fn test_bid_status_parse() {
        assert_eq!(BidStatus::parse("won"), BidStatus::Won);
        assert_eq!(BidStatus::parse("applied"), BidStatus::Applied);
        assert_eq!(BidStatus::parse("weird"), BidStatus::Applied);
    }
}
