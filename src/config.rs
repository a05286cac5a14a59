//! Configuration management for the auto-bidder
//!
//! Two layers:
//! - [`Config`]: process settings (credentials, endpoints, file paths) read once
//!   from the environment at startup.
//! - [`Policy`]: the bidding policy, persisted in the store's `settings` table and
//!   re-read every poll cycle so edits through the HTTP API apply without restart.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::env;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Skills used when the policy does not list any
pub const FALLBACK_SKILLS: [&str; 16] = [
    "react",
    "next.js",
    "nextjs",
    "react native",
    "mobile app",
    "web app",
    "typescript",
    "three.js",
    "webgl",
    "ar",
    "vr",
    "game development",
    "flutter",
    "pwa",
    "ios development",
    "android",
];

/// Process configuration loaded from environment
#[derive(Debug, Clone)]
pub struct Config {
    /// OAuth token for the marketplace API (required for bidding)
    pub freelancer_oauth_token: Option<String>,

    /// Numeric bidder id of the account placing bids
    pub bidder_id: Option<i64>,

    /// Marketplace API base URL
    pub freelancer_api_url: String,

    /// Generative model credentials
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_api_url: String,

    /// Telegram notifications (both required to enable)
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,

    /// Path to SQLite database
    pub database_path: String,

    /// Log file written by the bidder and tailed by the control service
    pub log_file: String,

    /// Presence of this file asks a running bidder to stop
    pub stop_file: String,

    /// Listings requested per poll
    pub fetch_limit: u32,

    /// Control service port
    pub port: u16,

    /// Bidder executable launched by the control service
    pub autobidder_bin: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            freelancer_oauth_token: None,
            bidder_id: None,
            freelancer_api_url: FreelancerApi::BASE_URL.to_string(),
            gemini_api_key: None,
            gemini_model: "gemini-2.5-pro".to_string(),
            gemini_api_url: GeminiApi::BASE_URL.to_string(),
            telegram_token: None,
            telegram_chat_id: None,
            database_path: "bids.db".to_string(),
            log_file: "autobidder.log".to_string(),
            stop_file: ".autobidder_stop".to_string(),
            fetch_limit: 100,
            port: 8000,
            autobidder_bin: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let bidder_id = match env::var("FREELANCER_BIDDER_ID").ok().filter(|s| !s.is_empty()) {
            Some(raw) => Some(
                raw.trim()
                    .parse::<i64>()
                    .with_context(|| format!("FREELANCER_BIDDER_ID is not a number: {}", raw))?,
            ),
            None => None,
        };

        let fetch_limit = env::var("FETCH_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.fetch_limit);

        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);

        Ok(Self {
            freelancer_oauth_token: non_empty_var("FREELANCER_OAUTH_TOKEN"),
            bidder_id,
            freelancer_api_url: non_empty_var("FREELANCER_API_URL")
                .unwrap_or(defaults.freelancer_api_url),
            gemini_api_key: non_empty_var("GEMINI_API_KEY"),
            gemini_model: non_empty_var("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            gemini_api_url: non_empty_var("GEMINI_API_URL").unwrap_or(defaults.gemini_api_url),
            telegram_token: non_empty_var("TELEGRAM_TOKEN"),
            telegram_chat_id: non_empty_var("TELEGRAM_CHAT_ID"),
            database_path: non_empty_var("DATABASE_PATH").unwrap_or(defaults.database_path),
            log_file: non_empty_var("LOG_FILE").unwrap_or(defaults.log_file),
            stop_file: non_empty_var("STOP_FILE").unwrap_or(defaults.stop_file),
            fetch_limit,
            port,
            autobidder_bin: non_empty_var("AUTOBIDDER_BIN"),
        })
    }

    /// Credentials needed to place bids; the poll loop refuses to start without them
    pub fn require_bidding_credentials(&self) -> Result<(String, i64)> {
        let token = self
            .freelancer_oauth_token
            .clone()
            .context("FREELANCER_OAUTH_TOKEN required for bidding")?;
        let bidder_id = self
            .bidder_id
            .context("FREELANCER_BIDDER_ID required for bidding")?;
        Ok((token, bidder_id))
    }

    /// Whether Telegram notifications are configured
    pub fn telegram_enabled(&self) -> bool {
        self.telegram_token.is_some() && self.telegram_chat_id.is_some()
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

/// How the message drafter picks a template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptSelectionMode {
    /// Always use the active template
    Manual,
    /// Ask the model to rank every template against the listing
    Dynamic,
}

impl fmt::Display for PromptSelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptSelectionMode::Manual => write!(f, "manual"),
            PromptSelectionMode::Dynamic => write!(f, "dynamic"),
        }
    }
}

impl FromStr for PromptSelectionMode {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "manual" => Ok(PromptSelectionMode::Manual),
            "dynamic" => Ok(PromptSelectionMode::Dynamic),
            other => Err(PolicyError(format!(
                "PROMPT_SELECTION_MODE must be manual or dynamic, got {}",
                other
            ))),
        }
    }
}

/// Rejected policy value
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid policy: {0}")]
pub struct PolicyError(pub String);

/// Bidding policy
///
/// Field names serialize as the upper-case setting keys used in the `settings`
/// table and the `/config` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct Policy {
    /// Minimum acceptable budget minimum, in USD
    #[serde(with = "rust_decimal::serde::float")]
    pub min_budget: Decimal,
    /// Reject listings older than this; 0 disables the check
    pub max_project_age_minutes: u32,
    /// Reject listings that already have this many bids
    pub max_existing_bids: u32,
    pub my_skills: Vec<String>,
    /// Applied to the average existing bid
    #[serde(with = "rust_decimal::serde::float")]
    pub bid_amount_multiplier: Decimal,
    pub default_delivery_days: u32,
    pub milestone_percent: u32,
    /// Base sleep between polls, seconds
    pub poll_interval: u64,
    pub prompt_selection_mode: PromptSelectionMode,
    /// Allow substring skill matches ("java" matches "javascript")
    pub substring_skill_match: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            min_budget: dec!(250),
            max_project_age_minutes: 0,
            max_existing_bids: 25,
            my_skills: FALLBACK_SKILLS.iter().map(|s| s.to_string()).collect(),
            bid_amount_multiplier: dec!(1.05),
            default_delivery_days: 7,
            milestone_percent: 50,
            poll_interval: 30,
            prompt_selection_mode: PromptSelectionMode::Dynamic,
            substring_skill_match: true,
        }
    }
}

impl Policy {
    /// Setting keys, in display order
    pub const KEYS: [&'static str; 10] = [
        "MIN_BUDGET",
        "MAX_PROJECT_AGE_MINUTES",
        "MAX_EXISTING_BIDS",
        "MY_SKILLS",
        "BID_AMOUNT_MULTIPLIER",
        "DEFAULT_DELIVERY_DAYS",
        "MILESTONE_PERCENT",
        "POLL_INTERVAL",
        "PROMPT_SELECTION_MODE",
        "SUBSTRING_SKILL_MATCH",
    ];

    /// Built-in defaults overridden by any environment variable named after a key.
    /// Unparseable values are logged and ignored.
    pub fn seeded_from_env() -> Self {
        let mut policy = Self::default();
        for key in Self::KEYS {
            let Some(raw) = non_empty_var(key) else {
                continue;
            };
            let mut overlay = Map::new();
            overlay.insert(key.to_string(), env_value(key, &raw));
            match policy.merged(&overlay) {
                Ok(updated) => policy = updated,
                Err(e) => warn!("Ignoring {} from environment: {}", key, e),
            }
        }
        policy
    }

    /// Apply a partial update given as setting key → JSON value.
    /// Unknown keys, wrong types and out-of-range values are rejected.
    pub fn merged(&self, overrides: &Map<String, Value>) -> Result<Self, PolicyError> {
        let mut current = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => return Err(PolicyError("policy is not an object".to_string())),
        };

        for (key, value) in overrides {
            if !Self::KEYS.contains(&key.as_str()) {
                return Err(PolicyError(format!("unknown setting {}", key)));
            }
            current.insert(key.clone(), value.clone());
        }

        let policy: Policy = serde_json::from_value(Value::Object(current))
            .map_err(|e| PolicyError(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Range checks beyond what the field types enforce
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.min_budget < Decimal::ZERO {
            return Err(PolicyError("MIN_BUDGET must be non-negative".to_string()));
        }
        if self.bid_amount_multiplier <= Decimal::ZERO {
            return Err(PolicyError("BID_AMOUNT_MULTIPLIER must be positive".to_string()));
        }
        if self.milestone_percent > 100 {
            return Err(PolicyError("MILESTONE_PERCENT must be between 0 and 100".to_string()));
        }
        if self.poll_interval == 0 {
            return Err(PolicyError("POLL_INTERVAL must be at least 1 second".to_string()));
        }
        if self.default_delivery_days == 0 {
            return Err(PolicyError("DEFAULT_DELIVERY_DAYS must be at least 1".to_string()));
        }
        Ok(())
    }

    /// The policy as setting key → JSON value pairs
    pub fn to_settings(&self) -> Vec<(String, Value)> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Lower-cased, trimmed skill list; the fallback list when empty.
    /// The flag reports whether the fallback was used.
    pub fn effective_skills(&self) -> (Vec<String>, bool) {
        let skills: Vec<String> = self
            .my_skills
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        if skills.is_empty() {
            (FALLBACK_SKILLS.iter().map(|s| s.to_string()).collect(), true)
        } else {
            (skills, false)
        }
    }
}

/// Interpret an environment string for a setting key
fn env_value(key: &str, raw: &str) -> Value {
    if key == "MY_SKILLS" {
        if let Ok(list @ Value::Array(_)) = serde_json::from_str::<Value>(raw) {
            return list;
        }
        return Value::Array(
            raw.split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_string()))
                .collect(),
        );
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.trim().to_string()))
}

/// Freelancer API configuration
pub struct FreelancerApi;

impl FreelancerApi {
    pub const BASE_URL: &'static str = "https://www.freelancer.com/api";

    pub fn active_projects_url(base: &str) -> String {
        format!("{}/projects/0.1/projects/active/", base.trim_end_matches('/'))
    }

    pub fn projects_url(base: &str) -> String {
        format!("{}/projects/0.1/projects/", base.trim_end_matches('/'))
    }

    pub fn bids_url(base: &str) -> String {
        format!("{}/projects/0.1/bids/", base.trim_end_matches('/'))
    }
}

/// Gemini API configuration
pub struct GeminiApi;

impl GeminiApi {
    pub const BASE_URL: &'static str = "https://generativelanguage.googleapis.com/v1beta";

    pub fn generate_url(base: &str, model: &str) -> String {
        format!("{}/models/{}:generateContent", base.trim_end_matches('/'), model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_policy_is_valid() {
        let policy = Policy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.min_budget, dec!(250));
        assert_eq!(policy.max_existing_bids, 25);
        assert_eq!(policy.prompt_selection_mode, PromptSelectionMode::Dynamic);
    }

    #[test]
    fn test_merge_partial_update() {
        let overrides = json!({"MIN_BUDGET": 400, "PROMPT_SELECTION_MODE": "manual"});
        let updated = Policy::default()
            .merged(overrides.as_object().unwrap())
            .unwrap();

        assert_eq!(updated.min_budget, dec!(400));
        assert_eq!(updated.prompt_selection_mode, PromptSelectionMode::Manual);
        assert_eq!(updated.poll_interval, 30);
    }

    #[test]
    fn test_merge_rejects_unknown_key() {
        let overrides = json!({"OAUTH_TOKEN": "secret"});
        let err = Policy::default().merged(overrides.as_object().unwrap()).unwrap_err();
        assert!(err.0.contains("unknown setting"));
    }

    #[test]
    fn test_merge_rejects_out_of_range() {
        let overrides = json!({"MILESTONE_PERCENT": 150});
        assert!(Policy::default().merged(overrides.as_object().unwrap()).is_err());

        let overrides = json!({"BID_AMOUNT_MULTIPLIER": 0});
        assert!(Policy::default().merged(overrides.as_object().unwrap()).is_err());

        let overrides = json!({"MAX_EXISTING_BIDS": -1});
        assert!(Policy::default().merged(overrides.as_object().unwrap()).is_err());

        let overrides = json!({"PROMPT_SELECTION_MODE": "random"});
        assert!(Policy::default().merged(overrides.as_object().unwrap()).is_err());
    }

    #[test]
    fn test_effective_skills_fallback() {
        let mut policy = Policy::default();
        policy.my_skills = vec!["  Rust ".to_string(), "".to_string()];
        assert_eq!(policy.effective_skills(), (vec!["rust".to_string()], false));

        policy.my_skills.clear();
        let (skills, fallback) = policy.effective_skills();
        assert!(fallback);
        assert_eq!(skills.len(), FALLBACK_SKILLS.len());
    }

    #[test]
    fn test_env_value_parsing() {
        assert_eq!(env_value("MY_SKILLS", "react, rust ,"), json!(["react", "rust"]));
        assert_eq!(env_value("POLL_INTERVAL", "45"), json!(45));
        assert_eq!(env_value("PROMPT_SELECTION_MODE", "manual"), json!("manual"));
        assert_eq!(env_value("SUBSTRING_SKILL_MATCH", "false"), json!(false));
    }

    #[test]
    fn test_settings_round_trip_keys() {
        let settings = Policy::default().to_settings();
        assert_eq!(settings.len(), Policy::KEYS.len());
        for (key, _) in &settings {
            assert!(Policy::KEYS.contains(&key.as_str()));
        }
    }

    #[test]
    fn test_api_urls() {
        assert_eq!(
            FreelancerApi::bids_url("https://www.freelancer.com/api/"),
            "https://www.freelancer.com/api/projects/0.1/bids/"
        );
        assert_eq!(
            GeminiApi::generate_url(GeminiApi::BASE_URL, "gemini-2.5-pro"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:generateContent"
        );
    }
}
