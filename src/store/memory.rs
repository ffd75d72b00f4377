// src/store/memory.rs
//! In-process [`NewsStore`] with the same uniqueness and window semantics as the
//! Postgres store. Used by tests and by local runs without `DATABASE_URL`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{DedupeCacheEntry, NewCacheEntry, NewsStore};
use crate::error::StoreError;
use crate::model::{
    ArticleId, Channel, NormalizedArticle, PushItem, PushRecord, RoutingState, RoutingStatus,
    Source,
};
use crate::scoring::ScoreResult;

#[derive(Debug, Clone)]
pub struct StoredArticle {
    pub id: ArticleId,
    pub article: NormalizedArticle,
    pub topic_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredScore {
    pub score: ScoreResult,
    pub scored_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    sources: HashMap<String, Source>,
    articles: Vec<StoredArticle>,
    scores: HashMap<ArticleId, StoredScore>,
    routing: HashMap<ArticleId, RoutingState>,
    pushes: Vec<PushRecord>,
    cache: Vec<DedupeCacheEntry>,
    next_article_id: i64,
    next_cache_id: i64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    offline: AtomicBool,
    missing_tables: Mutex<Vec<String>>,
    faults: Mutex<HashMap<&'static str, u32>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `StoreError::Unavailable` while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make `verify_schema` report the given tables as missing.
    pub fn set_missing_tables(&self, tables: &[&str]) {
        let mut g = self.missing_tables.lock().expect("memory store mutex poisoned");
        *g = tables.iter().map(|t| t.to_string()).collect();
    }

    /// Make the next `times` calls of the named store method fail with
    /// `StoreError::Unavailable`, e.g. `fail_next("insert_article", 1)`.
    pub fn fail_next(&self, method: &'static str, times: u32) {
        let mut g = self.faults.lock().expect("memory store mutex poisoned");
        g.insert(method, times);
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store mutex poisoned".into()))
    }

    /// `guard`, but honouring a pending `fail_next` for `method` first.
    fn guard_for(
        &self,
        method: &'static str,
    ) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        {
            let mut faults = self
                .faults
                .lock()
                .map_err(|_| StoreError::Unavailable("memory store mutex poisoned".into()))?;
            if let Some(left) = faults.get_mut(method).filter(|n| **n > 0) {
                *left -= 1;
                return Err(StoreError::Unavailable(format!("{method}: injected failure")));
            }
        }
        self.guard()
    }

    // --- inspection helpers ---

    pub fn sources(&self) -> Vec<Source> {
        let g = self.inner.lock().expect("memory store mutex poisoned");
        let mut v: Vec<Source> = g.sources.values().cloned().collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        v
    }

    pub fn articles(&self) -> Vec<StoredArticle> {
        self.inner.lock().expect("memory store mutex poisoned").articles.clone()
    }

    pub fn cache_entries(&self) -> Vec<DedupeCacheEntry> {
        self.inner.lock().expect("memory store mutex poisoned").cache.clone()
    }

    pub fn score_of(&self, id: ArticleId) -> Option<ScoreResult> {
        let g = self.inner.lock().expect("memory store mutex poisoned");
        g.scores.get(&id).map(|s| s.score.clone())
    }

    pub fn routing_of(&self, id: ArticleId) -> Option<RoutingState> {
        let g = self.inner.lock().expect("memory store mutex poisoned");
        g.routing.get(&id).cloned()
    }

    pub fn push_history(&self) -> Vec<PushRecord> {
        self.inner.lock().expect("memory store mutex poisoned").pushes.clone()
    }

    /// Seed a cache entry directly (tests use this to place stories in the past).
    pub fn insert_cache_entry_at(&self, entry: NewCacheEntry, seen_count: u32) -> i64 {
        let mut g = self.inner.lock().expect("memory store mutex poisoned");
        g.next_cache_id += 1;
        let id = g.next_cache_id;
        g.cache.push(DedupeCacheEntry {
            id,
            external_id: entry.external_id,
            url_hash: entry.url_hash,
            topic_hash: entry.topic_hash,
            authority_level: entry.authority_level,
            first_seen_at: entry.seen_at,
            last_seen_at: entry.seen_at,
            seen_count,
        });
        id
    }
}

impl Inner {
    fn cache_mut(&mut self, id: i64) -> Result<&mut DedupeCacheEntry, StoreError> {
        self.cache
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::Unavailable(format!("cache entry {id} vanished")))
    }

    fn topic_of(&self, id: ArticleId) -> Option<&str> {
        self.articles
            .iter()
            .find(|a| a.id == id)
            .and_then(|a| a.topic_hash.as_deref())
    }
}

#[async_trait]
impl NewsStore for MemoryStore {
    async fn verify_schema(&self) -> Result<(), StoreError> {
        let _g = self.guard()?;
        let missing = self
            .missing_tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store mutex poisoned".into()))?
            .clone();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(StoreError::MissingTables(missing))
        }
    }

    async fn upsert_source(&self, source: &Source) -> Result<(), StoreError> {
        let mut g = self.guard()?;
        g.sources.insert(source.name.clone(), source.clone());
        Ok(())
    }

    async fn find_cache_by_url(
        &self,
        url_hash: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DedupeCacheEntry>, StoreError> {
        let g = self.guard()?;
        Ok(g.cache
            .iter()
            .find(|e| e.url_hash == url_hash && e.first_seen_at >= since)
            .cloned())
    }

    async fn find_cache_by_topic(
        &self,
        topic_hash: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DedupeCacheEntry>, StoreError> {
        let g = self.guard()?;
        Ok(g.cache
            .iter()
            .filter(|e| e.topic_hash.as_deref() == Some(topic_hash) && e.first_seen_at >= since)
            .max_by(|a, b| {
                a.authority_level
                    .cmp(&b.authority_level)
                    .then(b.first_seen_at.cmp(&a.first_seen_at))
            })
            .cloned())
    }

    async fn bump_seen(&self, entry_id: i64, now: DateTime<Utc>) -> Result<u32, StoreError> {
        let mut g = self.guard()?;
        let e = g.cache_mut(entry_id)?;
        e.seen_count += 1;
        e.last_seen_at = now;
        Ok(e.seen_count)
    }

    async fn raise_authority(
        &self,
        entry_id: i64,
        tier: u8,
        now: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        let mut g = self.guard()?;
        let e = g.cache_mut(entry_id)?;
        e.authority_level = e.authority_level.max(tier);
        e.seen_count += 1;
        e.last_seen_at = now;
        Ok(e.seen_count)
    }

    async fn upsert_cache_entry(
        &self,
        entry: &NewCacheEntry,
        stale_before: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        let mut g = self.guard()?;
        if let Some(e) = g.cache.iter_mut().find(|e| e.url_hash == entry.url_hash) {
            if e.first_seen_at < stale_before {
                e.external_id = entry.external_id.clone();
                e.topic_hash = entry.topic_hash.clone();
                e.authority_level = entry.authority_level;
                e.first_seen_at = entry.seen_at;
                e.seen_count = 1;
            } else {
                e.authority_level = e.authority_level.max(entry.authority_level);
                e.seen_count += 1;
            }
            e.last_seen_at = entry.seen_at;
            return Ok(e.seen_count);
        }

        g.next_cache_id += 1;
        let id = g.next_cache_id;
        g.cache.push(DedupeCacheEntry {
            id,
            external_id: entry.external_id.clone(),
            url_hash: entry.url_hash.clone(),
            topic_hash: entry.topic_hash.clone(),
            authority_level: entry.authority_level,
            first_seen_at: entry.seen_at,
            last_seen_at: entry.seen_at,
            seen_count: 1,
        });
        Ok(1)
    }

    async fn prune_cache(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut g = self.guard()?;
        let before = g.cache.len();
        g.cache.retain(|e| e.first_seen_at >= cutoff);
        Ok((before - g.cache.len()) as u64)
    }

    async fn delete_cache_entry(
        &self,
        url_hash: &str,
        first_seen_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut g = self.guard_for("delete_cache_entry")?;
        g.cache
            .retain(|e| !(e.url_hash == url_hash && e.first_seen_at == first_seen_at));
        Ok(())
    }

    async fn revert_authority(
        &self,
        entry_id: i64,
        authority_level: u8,
    ) -> Result<(), StoreError> {
        let mut g = self.guard_for("revert_authority")?;
        let e = g.cache_mut(entry_id)?;
        e.authority_level = authority_level;
        e.seen_count = e.seen_count.saturating_sub(1).max(1);
        Ok(())
    }

    async fn insert_article(
        &self,
        article: &NormalizedArticle,
        topic_hash: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<Option<ArticleId>, StoreError> {
        let mut g = self.guard_for("insert_article")?;
        let clash = g.articles.iter().any(|a| {
            a.article.url == article.url
                || (a.article.source == article.source
                    && a.article.external_id == article.external_id)
        });
        if clash {
            return Ok(None);
        }
        g.next_article_id += 1;
        let id = g.next_article_id;
        g.articles.push(StoredArticle {
            id,
            article: article.clone(),
            topic_hash: topic_hash.map(str::to_string),
            created_at,
        });
        Ok(Some(id))
    }

    async fn delete_article(&self, article_id: ArticleId) -> Result<(), StoreError> {
        let mut g = self.guard_for("delete_article")?;
        g.articles.retain(|a| a.id != article_id);
        g.scores.remove(&article_id);
        g.routing.remove(&article_id);
        g.pushes.retain(|p| p.article_id != article_id);
        Ok(())
    }

    async fn count_recent_with_symbols(
        &self,
        symbols: &[String],
        since: DateTime<Utc>,
        exclude: ArticleId,
    ) -> Result<u32, StoreError> {
        let g = self.guard_for("count_recent_with_symbols")?;
        let n = g
            .articles
            .iter()
            .filter(|a| a.id != exclude && a.created_at >= since)
            .filter(|a| a.article.symbols.iter().any(|s| symbols.contains(s)))
            .count();
        Ok(n as u32)
    }

    async fn latest_composite(&self, article_id: ArticleId) -> Result<Option<f64>, StoreError> {
        let g = self.guard()?;
        Ok(g.scores.get(&article_id).map(|s| s.score.composite))
    }

    async fn lineage_composite(
        &self,
        topic_hash: &str,
        since: DateTime<Utc>,
        exclude: ArticleId,
    ) -> Result<Option<f64>, StoreError> {
        let g = self.guard()?;
        Ok(g.scores
            .iter()
            .filter(|(id, s)| {
                **id != exclude && s.scored_at >= since && g.topic_of(**id) == Some(topic_hash)
            })
            .max_by_key(|(_, s)| s.scored_at)
            .map(|(_, s)| s.score.composite))
    }

    async fn upsert_score(
        &self,
        article_id: ArticleId,
        score: &ScoreResult,
        scored_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut g = self.guard_for("upsert_score")?;
        g.scores.insert(
            article_id,
            StoredScore {
                score: score.clone(),
                scored_at,
            },
        );
        Ok(())
    }

    async fn max_fade_for_topic(
        &self,
        topic_hash: &str,
        since: DateTime<Utc>,
        exclude: ArticleId,
    ) -> Result<Option<u8>, StoreError> {
        let g = self.guard_for("max_fade_for_topic")?;
        Ok(g.routing
            .values()
            .filter(|r| {
                r.article_id != exclude
                    && r.routed_at >= since
                    && g.topic_of(r.article_id) == Some(topic_hash)
            })
            .map(|r| r.fade_level)
            .max())
    }

    async fn upsert_routing(&self, state: &RoutingState) -> Result<(), StoreError> {
        let mut g = self.guard_for("upsert_routing")?;
        g.routing.insert(state.article_id, state.clone());
        Ok(())
    }

    async fn mark_sent(&self, article_id: ArticleId) -> Result<(), StoreError> {
        let mut g = self.guard()?;
        if let Some(r) = g.routing.get_mut(&article_id) {
            r.status = RoutingStatus::Sent;
        }
        Ok(())
    }

    async fn top_for_digest(
        &self,
        since: DateTime<Utc>,
        channels: &[Channel],
        limit: u32,
    ) -> Result<Vec<PushItem>, StoreError> {
        let g = self.guard()?;
        let mut items: Vec<PushItem> = g
            .articles
            .iter()
            .filter(|a| a.article.published_at >= since)
            .filter_map(|a| {
                let route = g.routing.get(&a.id)?;
                let score = g.scores.get(&a.id)?;
                channels.contains(&route.channel).then(|| {
                    PushItem::from_article(a.id, &a.article, score.score.composite, route.channel)
                })
            })
            .collect();
        items.sort_by(|a, b| {
            b.composite
                .total_cmp(&a.composite)
                .then(b.published_at.cmp(&a.published_at))
        });
        items.truncate(limit as usize);
        Ok(items)
    }

    async fn record_push(&self, record: &PushRecord) -> Result<(), StoreError> {
        let mut g = self.guard()?;
        g.pushes.push(record.clone());
        Ok(())
    }
}
