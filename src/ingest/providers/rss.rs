use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::classify::Classifier;
use crate::error::FeedFetchError;
use crate::ingest::config::AdapterConfig;
use crate::ingest::feed::parse_feed;
use crate::ingest::normalize_record;
use crate::ingest::types::{FeedSpec, FetchBatch, SourceAdapter};
use crate::model::Source;

/// RSS/Atom adapter over a fixed list of feeds. Feeds are fetched one after
/// another, spaced by their rate limit; adapters run concurrently with each other.
pub struct RssAdapter {
    name: String,
    feeds: Vec<FeedSpec>,
    mode: Mode,
    classifier: Arc<dyn Classifier>,
    last_fetch: Mutex<HashMap<String, Instant>>,
}

enum Mode {
    /// Canned documents keyed by feed URL.
    Fixture(HashMap<String, String>),
    Http(reqwest::Client),
}

impl RssAdapter {
    pub fn from_config(cfg: &AdapterConfig, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            name: cfg.name.clone(),
            feeds: cfg.feeds.clone(),
            mode: Mode::Http(reqwest::Client::new()),
            classifier,
            last_fetch: Mutex::new(HashMap::new()),
        }
    }

    /// Serve feeds from in-memory documents instead of the network.
    pub fn from_fixtures(
        name: &str,
        feeds: Vec<FeedSpec>,
        documents: HashMap<String, String>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            name: name.to_string(),
            feeds,
            mode: Mode::Fixture(documents),
            classifier,
            last_fetch: Mutex::new(HashMap::new()),
        }
    }

    fn is_due(&self, feed: &FeedSpec, now: Instant) -> bool {
        let Ok(guard) = self.last_fetch.lock() else {
            return true;
        };
        guard
            .get(&feed.url)
            .map_or(true, |last| now.duration_since(*last).as_secs() >= feed.fetch_interval_secs)
    }

    fn mark_fetched(&self, feed: &FeedSpec, at: Instant) {
        if let Ok(mut guard) = self.last_fetch.lock() {
            guard.insert(feed.url.clone(), at);
        }
    }

    async fn fetch_document(&self, feed: &FeedSpec) -> Result<String, FeedFetchError> {
        match &self.mode {
            Mode::Fixture(docs) => docs.get(&feed.url).cloned().ok_or_else(|| FeedFetchError::Http {
                feed: feed.source.clone(),
                message: format!("no fixture for {}", feed.url),
            }),
            Mode::Http(client) => {
                let rsp = client
                    .get(&feed.url)
                    .timeout(feed.timeout())
                    .send()
                    .await
                    .map_err(|e| request_error(feed, e))?;
                let status = rsp.status();
                if !status.is_success() {
                    return Err(FeedFetchError::Status {
                        feed: feed.source.clone(),
                        status: status.as_u16(),
                    });
                }
                rsp.text().await.map_err(|e| request_error(feed, e))
            }
        }
    }
}

fn request_error(feed: &FeedSpec, e: reqwest::Error) -> FeedFetchError {
    if e.is_timeout() {
        FeedFetchError::Timeout {
            feed: feed.source.clone(),
            secs: feed.timeout().as_secs(),
        }
    } else {
        FeedFetchError::Http {
            feed: feed.source.clone(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl SourceAdapter for RssAdapter {
    async fn fetch_batch(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> FetchBatch {
        let mut batch = FetchBatch::default();
        let mut requested_any = false;

        for feed in &self.feeds {
            if !self.is_due(feed, Instant::now()) {
                tracing::debug!(target: "ingest", feed = %feed.source, "feed not due yet");
                continue;
            }
            if requested_any && matches!(self.mode, Mode::Http(_)) {
                tokio::time::sleep(feed.spacing()).await;
            }
            requested_any = true;

            let records = match self
                .fetch_document(feed)
                .await
                .and_then(|body| parse_feed(&body, feed))
            {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(target: "ingest", error = %e, adapter = %self.name, feed = %feed.source, "feed error");
                    counter!("ingest_provider_errors_total").increment(1);
                    batch.errors.push(e);
                    continue;
                }
            };
            self.mark_fetched(feed, Instant::now());

            for rec in records {
                match normalize_record(rec, self.classifier.as_ref()) {
                    Ok(article) if article.published_at >= since && article.published_at <= until => {
                        batch.accepted.push(article)
                    }
                    Ok(_) => {}
                    Err(rejection) => batch.rejected.push(rejection),
                }
            }
        }

        // newest first when the limit bites
        batch
            .accepted
            .sort_by(|a, b| b.published_at.cmp(&a.published_at));
        batch.accepted.truncate(limit);

        counter!("ingest_kept_total").increment(batch.accepted.len() as u64);
        counter!("ingest_filtered_total").increment(batch.rejected.len() as u64);
        batch
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn sources(&self) -> Vec<Source> {
        let mut out: Vec<Source> = Vec::new();
        for f in &self.feeds {
            if !out.iter().any(|s| s.name == f.source) {
                out.push(f.as_source());
            }
        }
        out
    }
}
