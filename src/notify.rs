//! Completion notices back to the requester's channel. Best-effort: the
//! worker logs delivery failures and moves on.

use async_trait::async_trait;
use log::info;
use serde_json::json;

use crate::errors::NotificationError;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: &str, text: &str) -> Result<(), NotificationError>;
}

/// One-line completion notice for a finished scan.
pub fn completion_message(title: &str, findings_count: i64) -> String {
    if findings_count > 0 {
        format!("Found {} vulnerabilities in {}!", findings_count, title)
    } else {
        format!("Scan of {} completed. No vulnerabilities found.", title)
    }
}

/// One-line notice for a job that exhausted its attempts. Only sent when
/// failure notification is enabled.
pub fn failure_message(title: &str, attempts: u32) -> String {
    format!("Scan of {} failed after {} attempts.", title, attempts)
}

/// Delivers messages through the Telegram Bot API; the channel is a chat id.
pub struct TelegramNotifier {
    http: reqwest::Client,
    token: String,
    api_base: String,
}

impl TelegramNotifier {
    pub fn new(token: &str) -> Self {
        TelegramNotifier {
            http: reqwest::Client::new(),
            token: token.to_string(),
            api_base: "https://api.telegram.org".to_string(),
        }
    }

    #[cfg(test)]
    fn with_api_base(token: &str, api_base: &str) -> Self {
        TelegramNotifier {
            http: reqwest::Client::new(),
            token: token.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, channel: &str, text: &str) -> Result<(), NotificationError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let resp = self
            .http
            .post(url)
            .json(&json!({ "chat_id": channel, "text": text }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(NotificationError::Rejected(resp.status().as_u16()));
        }
        Ok(())
    }
}

/// Fallback delivery when no token is configured: the notice lands in the
/// log instead of a chat.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, channel: &str, text: &str) -> Result<(), NotificationError> {
        info!("[notify {}] {}", channel, text);
        Ok(())
    }
}
