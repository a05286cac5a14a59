//! Telegram notifications for placed bids and recorded wins
//!
//! Delivery from the bidder is best-effort: messages go through a bounded queue
//! drained by one background task, and a full queue or a failed request only
//! gets logged. One-shot commands send through [`TelegramBot`] directly.

use crate::config::Config;
use crate::types::truncate_chars;
use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Telegram rejects messages over 4096 chars
const MAX_MESSAGE_CHARS: usize = 4000;

/// Pending messages held before new ones are dropped
const QUEUE_CAPACITY: usize = 64;

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Fire-and-forget side channel
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Discards everything; used when Telegram is not configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, message: &str) {
        debug!("[Notify] (disabled) {}", message);
    }
}

/// Direct Telegram Bot API sender
#[derive(Clone)]
pub struct TelegramBot {
    client: Client,
    url: String,
    chat_id: String,
}

impl TelegramBot {
    pub fn new(token: &str, chat_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: format!("{}/bot{}/sendMessage", TELEGRAM_API, token),
            chat_id: chat_id.into(),
        }
    }

    /// A bot when both token and chat id are configured
    pub fn from_config(config: &Config) -> Option<Self> {
        match (&config.telegram_token, &config.telegram_chat_id) {
            (Some(token), Some(chat_id)) => Some(Self::new(token, chat_id.clone())),
            _ => None,
        }
    }

    /// Send one message and wait for the reply
    pub async fn send(&self, message: &str) -> Result<()> {
        let body = json!({
            "chat_id": self.chat_id,
            "text": truncate_chars(message, MAX_MESSAGE_CHARS),
        });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .context("Telegram request failed")?;

        if !response.status().is_success() {
            bail!("Telegram returned {}", response.status());
        }
        Ok(())
    }
}

/// Queued notifier backed by one delivery task
#[derive(Clone)]
pub struct TelegramNotifier {
    tx: mpsc::Sender<String>,
}

impl TelegramNotifier {
    /// Start the delivery task. Must be called inside a tokio runtime.
    pub fn spawn(bot: TelegramBot) -> Self {
        let (tx, mut rx) = mpsc::channel::<String>(QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                match bot.send(&text).await {
                    Ok(()) => debug!("[Notify] Delivered"),
                    Err(e) => warn!("[Notify] Telegram delivery failed: {:#}", e),
                }
            }
        });

        Self { tx }
    }

    pub fn from_config(config: &Config) -> Option<Self> {
        TelegramBot::from_config(config).map(Self::spawn)
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, message: &str) {
        let text = truncate_chars(message, MAX_MESSAGE_CHARS);
        if let Err(e) = self.tx.try_send(text) {
            debug!("[Notify] Dropped notification: {}", e);
        }
    }
}

/// Telegram when configured, otherwise a no-op
pub fn notifier_from_config(config: &Config) -> Arc<dyn Notifier> {
    match TelegramNotifier::from_config(config) {
        Some(telegram) => Arc::new(telegram),
        None => Arc::new(NoopNotifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notify_truncates_and_queues() {
        let (tx, mut rx) = mpsc::channel(1);
        let notifier = TelegramNotifier { tx };

        notifier.notify(&"x".repeat(5000));
        let queued = rx.recv().await.unwrap();
        assert_eq!(queued.chars().count(), MAX_MESSAGE_CHARS);
    }

    #[tokio::test]
    async fn test_full_or_closed_queue_is_swallowed() {
        let (tx, rx) = mpsc::channel(1);
        let notifier = TelegramNotifier { tx };

        notifier.notify("first");
        notifier.notify("dropped, queue full");
        drop(rx);
        notifier.notify("dropped, queue closed");
    }

    #[test]
    fn test_disabled_without_chat_id() {
        let config = Config {
            telegram_token: Some("token".to_string()),
            ..Config::default()
        };
        assert!(TelegramBot::from_config(&config).is_none());
        assert!(TelegramNotifier::from_config(&config).is_none());
        NoopNotifier.notify("ignored");
    }

    #[test]
    fn test_bot_url_embeds_token() {
        let bot = TelegramBot::new("123:abc", "42");
        assert_eq!(bot.url, "https://api.telegram.org/bot123:abc/sendMessage");
        assert_eq!(bot.chat_id, "42");
    }
}
