//! Chat transports: the Telegram Bot API `sendMessage` call, and a dry-run
//! stand-in that only logs.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const SEND_TIMEOUT_SECS: u64 = 35;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Worth retrying: network failure, timeout, 429 or 5xx.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    #[error("delivery rejected: {0}")]
    Permanent(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

/// `sendMessage(chat_id, text, parse_mode)` against some chat backend.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Deliver one HTML message; returns the platform message id.
    async fn send_message(&self, text: &str) -> Result<i64, TransportError>;
    fn name(&self) -> &'static str;
}

#[derive(Clone)]
pub struct TelegramTransport {
    client: Client,
    api_base: String,
    token: String,
    chat_id: String,
    timeout: Duration,
}

impl TelegramTransport {
    pub fn new(token: String, chat_id: String) -> Self {
        Self {
            client: Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            token,
            chat_id,
            timeout: Duration::from_secs(SEND_TIMEOUT_SECS),
        }
    }

    /// Point at another Bot API server, e.g. a self-hosted one.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<SentMessage>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct SentMessage {
    message_id: i64,
}

/// 429 and 5xx are retryable; other non-2xx statuses are not.
pub fn classify_status(status: StatusCode, description: &str) -> TransportError {
    let msg = format!("HTTP {}: {}", status.as_u16(), description);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        TransportError::Transient(msg)
    } else {
        TransportError::Permanent(msg)
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_message(&self, text: &str) -> Result<i64, TransportError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let rsp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            // network errors and timeouts; the token is in the URL so keep it out of the message
            .map_err(|e| TransportError::Transient(e.without_url().to_string()))?;

        let status = rsp.status();
        let parsed: Option<ApiResponse> = rsp.json().await.ok();
        let description = parsed
            .as_ref()
            .and_then(|p| p.description.clone())
            .unwrap_or_default();

        if !status.is_success() {
            return Err(classify_status(status, &description));
        }
        match parsed {
            Some(ApiResponse {
                ok: true,
                result: Some(m),
                ..
            }) => Ok(m.message_id),
            _ => Err(TransportError::Permanent(format!(
                "unexpected sendMessage response: {description}"
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

/// Logs messages instead of sending them; used when chat credentials are absent.
#[derive(Debug, Default)]
pub struct DryRunTransport {
    next_id: AtomicI64,
}

impl DryRunTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatTransport for DryRunTransport {
    async fn send_message(&self, text: &str) -> Result<i64, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(target: "push", message_id = id, chars = text.chars().count(), "dry-run message:\n{text}");
        Ok(id)
    }

    fn name(&self) -> &'static str {
        "dry-run"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!classify_status(StatusCode::BAD_REQUEST, "can't parse entities").is_transient());
        assert!(!classify_status(StatusCode::FORBIDDEN, "bot was blocked").is_transient());
    }

    #[tokio::test]
    async fn dry_run_hands_out_increasing_ids() {
        let t = DryRunTransport::new();
        assert_eq!(t.send_message("a").await, Ok(1));
        assert_eq!(t.send_message("b").await, Ok(2));
    }
}
