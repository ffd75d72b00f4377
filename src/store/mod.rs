//! Relational store seam.
//!
//! The pipeline talks to storage only through [`NewsStore`]. `PgStore` is the
//! production implementation; `MemoryStore` mirrors its semantics for tests and
//! local runs without a database.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{
    ArticleId, Channel, NormalizedArticle, PushItem, PushRecord, RoutingState, Source,
};
use crate::scoring::ScoreResult;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Tables the pipeline requires at start-up.
pub const REQUIRED_TABLES: [&str; 6] = [
    "sources",
    "news_items",
    "news_scores",
    "news_routing_state",
    "news_push_history",
    "news_dedupe_cache",
];

/// One distinct story as remembered by the deduplicator.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupeCacheEntry {
    pub id: i64,
    pub external_id: String,
    pub url_hash: String,
    pub topic_hash: Option<String>,
    pub authority_level: u8,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub seen_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCacheEntry {
    pub external_id: String,
    pub url_hash: String,
    pub topic_hash: Option<String>,
    pub authority_level: u8,
    pub seen_at: DateTime<Utc>,
}

#[async_trait]
pub trait NewsStore: Send + Sync {
    /// Fails with `StoreError::MissingTables` if any of [`REQUIRED_TABLES`] is absent.
    async fn verify_schema(&self) -> Result<(), StoreError>;

    /// Insert or refresh a source keyed by its unique name.
    async fn upsert_source(&self, source: &Source) -> Result<(), StoreError>;

    // --- dedupe cache ---

    async fn find_cache_by_url(
        &self,
        url_hash: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DedupeCacheEntry>, StoreError>;

    async fn find_cache_by_topic(
        &self,
        topic_hash: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DedupeCacheEntry>, StoreError>;

    /// Record a re-sighting; returns the new `seen_count`.
    async fn bump_seen(&self, entry_id: i64, now: DateTime<Utc>) -> Result<u32, StoreError>;

    /// Raise `authority_level` (never lowers it) and record the sighting.
    /// Returns the new `seen_count`.
    async fn raise_authority(
        &self,
        entry_id: i64,
        tier: u8,
        now: DateTime<Utc>,
    ) -> Result<u32, StoreError>;

    /// Atomic insert-or-update keyed by `url_hash`. A row whose `first_seen_at`
    /// is older than `stale_before` is restarted as a fresh story. Returns the
    /// resulting `seen_count`; anything above 1 means a concurrent ingestion
    /// recorded the same URL first.
    async fn upsert_cache_entry(
        &self,
        entry: &NewCacheEntry,
        stale_before: DateTime<Utc>,
    ) -> Result<u32, StoreError>;

    /// Delete cache entries first seen before `cutoff`; returns rows removed.
    async fn prune_cache(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Forget a story recorded at `first_seen_at` so a retry is judged fresh.
    async fn delete_cache_entry(
        &self,
        url_hash: &str,
        first_seen_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Undo one `raise_authority`: put `authority_level` back and drop the sighting.
    async fn revert_authority(&self, entry_id: i64, authority_level: u8)
        -> Result<(), StoreError>;

    // --- articles ---

    /// Insert a new article. `None` when the URL or (source, external_id) already exists.
    async fn insert_article(
        &self,
        article: &NormalizedArticle,
        topic_hash: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<Option<ArticleId>, StoreError>;

    /// Remove an article together with its score and routing rows.
    async fn delete_article(&self, article_id: ArticleId) -> Result<(), StoreError>;

    /// Articles other than `exclude` created since `since` that share any of `symbols`.
    async fn count_recent_with_symbols(
        &self,
        symbols: &[String],
        since: DateTime<Utc>,
        exclude: ArticleId,
    ) -> Result<u32, StoreError>;

    // --- scores ---

    async fn latest_composite(&self, article_id: ArticleId) -> Result<Option<f64>, StoreError>;

    /// Most recent composite of another article in the same topic lineage.
    async fn lineage_composite(
        &self,
        topic_hash: &str,
        since: DateTime<Utc>,
        exclude: ArticleId,
    ) -> Result<Option<f64>, StoreError>;

    async fn upsert_score(
        &self,
        article_id: ArticleId,
        score: &ScoreResult,
        scored_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // --- routing ---

    /// Highest fade level among other articles of the same topic routed since `since`.
    async fn max_fade_for_topic(
        &self,
        topic_hash: &str,
        since: DateTime<Utc>,
        exclude: ArticleId,
    ) -> Result<Option<u8>, StoreError>;

    async fn upsert_routing(&self, state: &RoutingState) -> Result<(), StoreError>;

    async fn mark_sent(&self, article_id: ArticleId) -> Result<(), StoreError>;

    /// Top `limit` articles by composite published since `since` and routed to one of `channels`.
    async fn top_for_digest(
        &self,
        since: DateTime<Utc>,
        channels: &[Channel],
        limit: u32,
    ) -> Result<Vec<PushItem>, StoreError>;

    // --- audit ---

    async fn record_push(&self, record: &PushRecord) -> Result<(), StoreError>;
}
