//! Delivery of routed items to the chat channel.
//!
//! Every attempt is written to the push audit log. A failed push never touches
//! scoring or routing state.

pub mod format;
pub mod telegram;

use chrono::Utc;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::classify::Classifier;
use crate::model::{Channel, PushItem, PushOutcome, PushRecord};
use crate::store::NewsStore;

pub use format::{format_message, hashtags, MAX_MESSAGE_LEN};
pub use telegram::{ChatTransport, DryRunTransport, TelegramTransport, TransportError};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_SEND_DELAY_MS: u64 = 1100;

#[derive(Debug, Clone, PartialEq)]
pub struct PushReport {
    pub article_id: i64,
    pub message_id: Option<i64>,
    pub attempts: u32,
    pub error: Option<String>,
}

impl PushReport {
    pub fn delivered(&self) -> bool {
        self.message_id.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub sent: usize,
    pub failed: usize,
    pub reports: Vec<PushReport>,
}

pub struct PushService {
    transport: Arc<dyn ChatTransport>,
    store: Arc<dyn NewsStore>,
    classifier: Arc<dyn Classifier>,
    max_retries: u32,
    base_delay: Duration,
    send_delay: Duration,
}

impl PushService {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        store: Arc<dyn NewsStore>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            transport,
            store,
            classifier,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            send_delay: Duration::from_millis(DEFAULT_SEND_DELAY_MS),
        }
    }

    /// Retry backoff base and the pause between digest messages.
    pub fn with_delays(mut self, base_delay: Duration, send_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.send_delay = send_delay;
        self
    }

    /// Render the message for an item exactly as it would be sent.
    pub fn render(&self, item: &PushItem) -> String {
        let tags = hashtags(item, self.classifier.as_ref());
        format_message(item, &tags)
    }

    /// Urgent delivery. A successful push marks the routing state `sent`.
    pub async fn push_single(&self, item: &PushItem) -> PushReport {
        let report = self.deliver(item, item.channel).await;
        if report.delivered() {
            if let Err(e) = self.store.mark_sent(item.article_id).await {
                warn!(target: "push", error = %e, article_id = item.article_id, "could not mark item sent");
            }
        }
        report
    }

    /// Digest delivery: one message per item, highest composite first, spaced
    /// by the send delay. Items stay unsent so they may resurface in later digests.
    pub async fn push_batch(&self, mut items: Vec<PushItem>, channel: Channel) -> BatchReport {
        items.sort_by(|a, b| {
            b.composite
                .total_cmp(&a.composite)
                .then(b.published_at.cmp(&a.published_at))
        });

        let mut out = BatchReport::default();
        for (i, item) in items.iter().enumerate() {
            if i > 0 && !self.send_delay.is_zero() {
                tokio::time::sleep(self.send_delay).await;
            }
            let report = self.deliver(item, channel).await;
            if report.delivered() {
                out.sent += 1;
            } else {
                out.failed += 1;
            }
            out.reports.push(report);
        }
        info!(
            target: "push",
            channel = %channel,
            transport = self.transport.name(),
            sent = out.sent,
            failed = out.failed,
            "batch delivered"
        );
        out
    }

    async fn deliver(&self, item: &PushItem, channel: Channel) -> PushReport {
        let text = self.render(item);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = self.transport.send_message(&text).await;
            self.audit(item, channel, &result).await;

            match result {
                Ok(message_id) => {
                    counter!("push_attempts_total", "outcome" => "success").increment(1);
                    return PushReport {
                        article_id: item.article_id,
                        message_id: Some(message_id),
                        attempts: attempt,
                        error: None,
                    };
                }
                Err(e) => {
                    counter!("push_attempts_total", "outcome" => "failed").increment(1);
                    let retry = e.is_transient() && attempt <= self.max_retries;
                    warn!(
                        target: "push",
                        error = %e,
                        transport = self.transport.name(),
                        article_id = item.article_id,
                        attempt,
                        retry,
                        "push attempt failed"
                    );
                    if retry {
                        tokio::time::sleep(self.base_delay * (1u32 << (attempt - 1))).await;
                        continue;
                    }
                    return PushReport {
                        article_id: item.article_id,
                        message_id: None,
                        attempts: attempt,
                        error: Some(e.to_string()),
                    };
                }
            }
        }
    }

    async fn audit(&self, item: &PushItem, channel: Channel, result: &Result<i64, TransportError>) {
        let record = PushRecord {
            article_id: item.article_id,
            channel,
            message_id: result.as_ref().ok().copied(),
            outcome: if result.is_ok() {
                PushOutcome::Success
            } else {
                PushOutcome::Failed
            },
            error: result.as_ref().err().map(|e| e.to_string()),
            sent_at: Utc::now(),
        };
        if let Err(e) = self.store.record_push(&record).await {
            warn!(target: "push", error = %e, article_id = item.article_id, "could not write push audit row");
        }
    }
}
