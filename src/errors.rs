//! Remote API error classification
//!
//! Marketplace and model API failures are parsed into [`ApiError`] so the poll
//! loop can tell throttling apart from everything else.

use serde::Deserialize;

/// Structured remote API error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    /// Provider is throttling us
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Token missing, expired or rejected
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    /// Network/connection error (timeout, DNS, etc.)
    #[error("network error: {0}")]
    Network(String),
    /// Response body did not have the expected shape
    #[error("unexpected response: {0}")]
    Decode(String),
    /// Any other non-success status
    #[error("API error {status}: {body}")]
    Unknown { status: u16, body: String },
}

/// Error body shapes returned by the marketplace and Gemini
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    error_code: Option<String>,
}

impl ApiError {
    /// Classify a non-success response
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => {
                let nested = parsed.error.as_ref().and_then(|e| match e {
                    serde_json::Value::String(s) => Some(s.clone()),
                    other => other.get("message").and_then(|m| m.as_str()).map(str::to_string),
                });
                parsed
                    .message
                    .or(nested)
                    .or(parsed.error_code)
                    .unwrap_or_else(|| body.to_string())
            }
            Err(_) => body.to_string(),
        };

        let lower = message.to_lowercase();

        if status == 429 || is_throttle_text(&lower) {
            return ApiError::RateLimited(message);
        }

        if status == 401 || status == 403 || lower.contains("unauthorized") || lower.contains("invalid token") {
            return ApiError::AuthenticationFailed(message);
        }

        ApiError::Unknown { status, body: message }
    }

    /// Classify a transport failure
    pub fn from_network_error(err: &reqwest::Error) -> Self {
        if err.status().map(|s| s.as_u16()) == Some(429) {
            ApiError::RateLimited(err.to_string())
        } else if err.is_timeout() {
            ApiError::Network("Request timed out".to_string())
        } else if err.is_connect() {
            ApiError::Network("Connection failed".to_string())
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }

    /// Whether this error means the provider is throttling us
    pub fn is_rate_limited(&self) -> bool {
        match self {
            ApiError::RateLimited(_) => true,
            ApiError::Network(msg) | ApiError::Decode(msg) => {
                msg.contains("429") || is_throttle_text(&msg.to_lowercase())
            }
            _ => false,
        }
    }
}

fn is_throttle_text(lower: &str) -> bool {
    lower.contains("too many requests") || lower.contains("rate limit")
}
