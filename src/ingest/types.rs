// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FeedFetchError;
use crate::model::{NormalizedArticle, Source, SourceTier};

/// Adapter-native record before normalization. Every field is optional; the
/// normalizer decides what is usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub source: String,
    pub tier: Option<u8>,
    pub guid: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub pub_date: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub region: Option<String>,
    pub lang: Option<String>,
}

/// Why a record never reached the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub source: String,
    pub reason: String,
}

/// One feed of an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSpec {
    pub source: String,
    pub url: String,
    #[serde(default)]
    pub tier: SourceTier,
    #[serde(default = "default_reliability")]
    pub reliability: f32,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_min: u32,
    #[serde(default = "default_fetch_interval")]
    pub fetch_interval_secs: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
}

pub const MIN_FEED_TIMEOUT_SECS: u64 = 8;
pub const MAX_FEED_TIMEOUT_SECS: u64 = 15;

fn default_reliability() -> f32 {
    0.7
}
fn default_rate_limit() -> u32 {
    30
}
fn default_fetch_interval() -> u64 {
    900
}
fn default_timeout() -> u64 {
    10
}

impl FeedSpec {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(
            self.timeout_secs
                .clamp(MIN_FEED_TIMEOUT_SECS, MAX_FEED_TIMEOUT_SECS),
        )
    }

    /// Spacing between requests that honours `rate_limit_per_min`.
    pub fn spacing(&self) -> std::time::Duration {
        std::time::Duration::from_millis(60_000 / u64::from(self.rate_limit_per_min.max(1)))
    }

    pub fn as_source(&self) -> Source {
        Source {
            name: self.source.clone(),
            tier: self.tier,
            reliability: self.reliability,
            rate_limit_per_min: self.rate_limit_per_min,
            enabled: true,
        }
    }
}

/// Result of one `fetch_batch`: normalized articles plus per-feed failures.
#[derive(Debug, Default)]
pub struct FetchBatch {
    pub accepted: Vec<NormalizedArticle>,
    pub errors: Vec<FeedFetchError>,
    pub rejected: Vec<Rejection>,
}

#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetch items published in `[since, until]`, at most `limit`. Feed-level
    /// failures land in `errors`; this never fails as a whole.
    async fn fetch_batch(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> FetchBatch;

    fn name(&self) -> &str;

    /// Sources this adapter publishes under, for idempotent registration.
    fn sources(&self) -> Vec<Source>;
}
