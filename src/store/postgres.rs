// src/store/postgres.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::info;

use super::{DedupeCacheEntry, NewCacheEntry, NewsStore, REQUIRED_TABLES};
use crate::error::StoreError;
use crate::model::{
    ArticleId, Channel, NormalizedArticle, PushItem, PushRecord, RoutingState, Source,
};
use crate::scoring::ScoreResult;

/// Postgres-backed store. Uniqueness races are closed by `ON CONFLICT` upserts.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a connection pool for `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        info!("Connecting to PostgreSQL...");

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect(database_url)
            .await?;

        info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }
}

#[derive(sqlx::FromRow)]
struct CacheRow {
    id: i64,
    external_id: String,
    url_hash: String,
    topic_hash: Option<String>,
    authority_level: i16,
    first_seen_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
    seen_count: i32,
}

impl From<CacheRow> for DedupeCacheEntry {
    fn from(r: CacheRow) -> Self {
        Self {
            id: r.id,
            external_id: r.external_id,
            url_hash: r.url_hash,
            topic_hash: r.topic_hash,
            authority_level: r.authority_level.clamp(0, 5) as u8,
            first_seen_at: r.first_seen_at,
            last_seen_at: r.last_seen_at,
            seen_count: r.seen_count.max(0) as u32,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DigestRow {
    id: i64,
    source: String,
    title: String,
    title_translated: Option<String>,
    summary: String,
    url: String,
    published_at: DateTime<Utc>,
    composite: f64,
    commentary: Option<String>,
    channel: String,
}

impl TryFrom<DigestRow> for PushItem {
    type Error = StoreError;

    fn try_from(r: DigestRow) -> Result<Self, Self::Error> {
        let channel = r.channel.parse::<Channel>().map_err(|message| StoreError::Corrupt {
            table: "news_routing_state",
            message,
        })?;
        Ok(PushItem {
            article_id: r.id,
            source: r.source,
            title: r.title,
            title_translated: r.title_translated,
            summary: r.summary,
            url: r.url,
            published_at: r.published_at,
            composite: r.composite,
            commentary: r.commentary,
            channel,
        })
    }
}

const CACHE_COLUMNS: &str = "id, external_id, url_hash, topic_hash, authority_level, \
                             first_seen_at, last_seen_at, seen_count";

#[async_trait]
impl NewsStore for PgStore {
    async fn verify_schema(&self) -> Result<(), StoreError> {
        let wanted: Vec<String> = REQUIRED_TABLES.iter().map(|t| t.to_string()).collect();
        let present: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT table_name::TEXT FROM information_schema.tables
            WHERE table_schema = current_schema() AND table_name = ANY($1)
            "#,
        )
        .bind(&wanted)
        .fetch_all(&self.pool)
        .await?;

        let missing: Vec<String> = wanted
            .into_iter()
            .filter(|t| !present.contains(t))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(StoreError::MissingTables(missing))
        }
    }

    async fn upsert_source(&self, source: &Source) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sources (name, tier, reliability, rate_limit_per_min, enabled)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name)
            DO UPDATE SET tier = EXCLUDED.tier,
                          reliability = EXCLUDED.reliability,
                          rate_limit_per_min = EXCLUDED.rate_limit_per_min,
                          enabled = EXCLUDED.enabled,
                          updated_at = NOW()
            "#,
        )
        .bind(&source.name)
        .bind(source.tier.get() as i16)
        .bind(source.reliability)
        .bind(source.rate_limit_per_min as i32)
        .bind(source.enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_cache_by_url(
        &self,
        url_hash: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DedupeCacheEntry>, StoreError> {
        let row = sqlx::query_as::<_, CacheRow>(&format!(
            "SELECT {CACHE_COLUMNS} FROM news_dedupe_cache \
             WHERE url_hash = $1 AND first_seen_at >= $2"
        ))
        .bind(url_hash)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn find_cache_by_topic(
        &self,
        topic_hash: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DedupeCacheEntry>, StoreError> {
        let row = sqlx::query_as::<_, CacheRow>(&format!(
            "SELECT {CACHE_COLUMNS} FROM news_dedupe_cache \
             WHERE topic_hash = $1 AND first_seen_at >= $2 \
             ORDER BY authority_level DESC, first_seen_at ASC LIMIT 1"
        ))
        .bind(topic_hash)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn bump_seen(&self, entry_id: i64, now: DateTime<Utc>) -> Result<u32, StoreError> {
        let count: i32 = sqlx::query_scalar(
            r#"
            UPDATE news_dedupe_cache
            SET seen_count = seen_count + 1, last_seen_at = $2
            WHERE id = $1
            RETURNING seen_count
            "#,
        )
        .bind(entry_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u32)
    }

    async fn raise_authority(
        &self,
        entry_id: i64,
        tier: u8,
        now: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        let count: i32 = sqlx::query_scalar(
            r#"
            UPDATE news_dedupe_cache
            SET authority_level = GREATEST(authority_level, $2),
                seen_count = seen_count + 1,
                last_seen_at = $3
            WHERE id = $1
            RETURNING seen_count
            "#,
        )
        .bind(entry_id)
        .bind(tier as i16)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u32)
    }

    async fn upsert_cache_entry(
        &self,
        entry: &NewCacheEntry,
        stale_before: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        // Right-hand sides see the pre-update row, so every CASE tests the old first_seen_at.
        let count: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO news_dedupe_cache
                (external_id, url_hash, topic_hash, authority_level,
                 first_seen_at, last_seen_at, seen_count)
            VALUES ($1, $2, $3, $4, $5, $5, 1)
            ON CONFLICT (url_hash) DO UPDATE SET
                seen_count = CASE WHEN news_dedupe_cache.first_seen_at < $6
                                  THEN 1 ELSE news_dedupe_cache.seen_count + 1 END,
                external_id = CASE WHEN news_dedupe_cache.first_seen_at < $6
                                   THEN EXCLUDED.external_id ELSE news_dedupe_cache.external_id END,
                topic_hash = CASE WHEN news_dedupe_cache.first_seen_at < $6
                                  THEN EXCLUDED.topic_hash ELSE news_dedupe_cache.topic_hash END,
                authority_level = CASE WHEN news_dedupe_cache.first_seen_at < $6
                                       THEN EXCLUDED.authority_level
                                       ELSE GREATEST(news_dedupe_cache.authority_level,
                                                     EXCLUDED.authority_level) END,
                first_seen_at = CASE WHEN news_dedupe_cache.first_seen_at < $6
                                     THEN EXCLUDED.first_seen_at ELSE news_dedupe_cache.first_seen_at END,
                last_seen_at = EXCLUDED.last_seen_at
            RETURNING seen_count
            "#,
        )
        .bind(&entry.external_id)
        .bind(&entry.url_hash)
        .bind(entry.topic_hash.as_deref())
        .bind(entry.authority_level as i16)
        .bind(entry.seen_at)
        .bind(stale_before)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u32)
    }

    async fn prune_cache(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let res = sqlx::query("DELETE FROM news_dedupe_cache WHERE first_seen_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn delete_cache_entry(
        &self,
        url_hash: &str,
        first_seen_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM news_dedupe_cache WHERE url_hash = $1 AND first_seen_at = $2")
            .bind(url_hash)
            .bind(first_seen_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn revert_authority(
        &self,
        entry_id: i64,
        authority_level: u8,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE news_dedupe_cache
            SET authority_level = $2, seen_count = GREATEST(seen_count - 1, 1)
            WHERE id = $1
            "#,
        )
        .bind(entry_id)
        .bind(authority_level as i16)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_article(
        &self,
        article: &NormalizedArticle,
        topic_hash: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<Option<ArticleId>, StoreError> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO news_items
                (source, external_id, tier, title, title_translated, summary, body, url,
                 published_at, symbols, entities, region, lang, tags, topic_hash, commentary,
                 created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&article.source)
        .bind(&article.external_id)
        .bind(article.tier.get() as i16)
        .bind(&article.title)
        .bind(article.title_translated.as_deref())
        .bind(&article.summary)
        .bind(article.body.as_deref())
        .bind(&article.url)
        .bind(article.published_at)
        .bind(&article.symbols)
        .bind(Json(&article.entities))
        .bind(article.region.as_deref())
        .bind(&article.lang)
        .bind(&article.tags)
        .bind(topic_hash)
        .bind(article.commentary.as_deref())
        .bind(created_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn delete_article(&self, article_id: ArticleId) -> Result<(), StoreError> {
        // scores, routing and push history cascade
        sqlx::query("DELETE FROM news_items WHERE id = $1")
            .bind(article_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_recent_with_symbols(
        &self,
        symbols: &[String],
        since: DateTime<Utc>,
        exclude: ArticleId,
    ) -> Result<u32, StoreError> {
        if symbols.is_empty() {
            return Ok(0);
        }
        let n: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM news_items
            WHERE symbols && $1 AND created_at >= $2 AND id <> $3
            "#,
        )
        .bind(symbols)
        .bind(since)
        .bind(exclude)
        .fetch_one(&self.pool)
        .await?;
        Ok(n.clamp(0, u32::MAX as i64) as u32)
    }

    async fn latest_composite(&self, article_id: ArticleId) -> Result<Option<f64>, StoreError> {
        let v = sqlx::query_scalar("SELECT composite FROM news_scores WHERE news_id = $1")
            .bind(article_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(v)
    }

    async fn lineage_composite(
        &self,
        topic_hash: &str,
        since: DateTime<Utc>,
        exclude: ArticleId,
    ) -> Result<Option<f64>, StoreError> {
        let v = sqlx::query_scalar(
            r#"
            SELECT s.composite FROM news_scores s
            JOIN news_items n ON n.id = s.news_id
            WHERE n.topic_hash = $1 AND s.scored_at >= $2 AND s.news_id <> $3
            ORDER BY s.scored_at DESC
            LIMIT 1
            "#,
        )
        .bind(topic_hash)
        .bind(since)
        .bind(exclude)
        .fetch_optional(&self.pool)
        .await?;
        Ok(v)
    }

    async fn upsert_score(
        &self,
        article_id: ArticleId,
        score: &ScoreResult,
        scored_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let f = &score.factors;
        sqlx::query(
            r#"
            INSERT INTO news_scores
                (news_id, freshness, source_quality, relevance, impact, novelty,
                 corroboration, attention, composite, weights_used, scored_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (news_id) DO UPDATE SET
                freshness = EXCLUDED.freshness,
                source_quality = EXCLUDED.source_quality,
                relevance = EXCLUDED.relevance,
                impact = EXCLUDED.impact,
                novelty = EXCLUDED.novelty,
                corroboration = EXCLUDED.corroboration,
                attention = EXCLUDED.attention,
                composite = EXCLUDED.composite,
                weights_used = EXCLUDED.weights_used,
                scored_at = EXCLUDED.scored_at
            "#,
        )
        .bind(article_id)
        .bind(f.freshness)
        .bind(f.source_quality)
        .bind(f.relevance)
        .bind(f.impact)
        .bind(f.novelty)
        .bind(f.corroboration)
        .bind(f.attention)
        .bind(score.composite)
        .bind(Json(&score.weights_used))
        .bind(scored_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn max_fade_for_topic(
        &self,
        topic_hash: &str,
        since: DateTime<Utc>,
        exclude: ArticleId,
    ) -> Result<Option<u8>, StoreError> {
        let v: Option<i16> = sqlx::query_scalar(
            r#"
            SELECT MAX(r.fade_level) FROM news_routing_state r
            JOIN news_items n ON n.id = r.news_id
            WHERE n.topic_hash = $1 AND r.routed_at >= $2 AND r.news_id <> $3
            "#,
        )
        .bind(topic_hash)
        .bind(since)
        .bind(exclude)
        .fetch_one(&self.pool)
        .await?;
        Ok(v.map(|f| f.clamp(0, 5) as u8))
    }

    async fn upsert_routing(&self, state: &RoutingState) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO news_routing_state
                (news_id, channel, status, fade_level, upgrade_flag, routed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (news_id) DO UPDATE SET
                channel = EXCLUDED.channel,
                status = EXCLUDED.status,
                fade_level = EXCLUDED.fade_level,
                upgrade_flag = EXCLUDED.upgrade_flag,
                routed_at = EXCLUDED.routed_at
            "#,
        )
        .bind(state.article_id)
        .bind(state.channel.as_str())
        .bind(state.status.as_str())
        .bind(state.fade_level as i16)
        .bind(state.upgrade_flag)
        .bind(state.routed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_sent(&self, article_id: ArticleId) -> Result<(), StoreError> {
        sqlx::query("UPDATE news_routing_state SET status = 'sent' WHERE news_id = $1")
            .bind(article_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn top_for_digest(
        &self,
        since: DateTime<Utc>,
        channels: &[Channel],
        limit: u32,
    ) -> Result<Vec<PushItem>, StoreError> {
        let channels: Vec<String> = channels.iter().map(|c| c.as_str().to_string()).collect();
        let rows = sqlx::query_as::<_, DigestRow>(
            r#"
            SELECT n.id, n.source, n.title, n.title_translated, n.summary, n.url,
                   n.published_at, s.composite, n.commentary, r.channel
            FROM news_items n
            JOIN news_scores s ON s.news_id = n.id
            JOIN news_routing_state r ON r.news_id = n.id
            WHERE n.published_at >= $1 AND r.channel = ANY($2)
            ORDER BY s.composite DESC, n.published_at DESC
            LIMIT $3
            "#,
        )
        .bind(since)
        .bind(&channels)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PushItem::try_from).collect()
    }

    async fn record_push(&self, record: &PushRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO news_push_history (news_id, channel, message_id, outcome, error, sent_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.article_id)
        .bind(record.channel.as_str())
        .bind(record.message_id)
        .bind(record.outcome.as_str())
        .bind(record.error.as_deref())
        .bind(record.sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
