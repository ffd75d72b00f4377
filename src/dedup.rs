//! Story-level deduplication with authority escalation.
//!
//! Two fingerprints per article:
//! - `url_hash`   : URL without query/fragment/trailing slash, lower-cased, SHA-256
//! - `topic_hash` : sorted top-10 keywords of title + summary head, SHA-256;
//!   `None` when fewer than 3 keywords survive
//!
//! URL matches are looked up over 24h, topic matches over 6h. A topic match
//! from a strictly higher tier is let through and raises the cached authority.
//! Storage failures fail open.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::model::{NormalizedArticle, SourceTier};
use crate::store::{DedupeCacheEntry, NewCacheEntry, NewsStore};

pub const URL_WINDOW_HOURS: i64 = 24;
pub const TOPIC_WINDOW_HOURS: i64 = 6;
pub const CACHE_TTL_HOURS: i64 = 24;

const TOPIC_SUMMARY_CHARS: usize = 100;
const TOPIC_MIN_WORD_CHARS: usize = 4;
const TOPIC_MAX_KEYWORDS: usize = 10;
const TOPIC_MIN_KEYWORDS: usize = 3;

const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "also", "amid", "among", "an", "and",
    "any", "are", "as", "at", "be", "because", "been", "before", "being", "below", "between",
    "both", "but", "by", "could", "did", "does", "doing", "down", "during", "each", "from",
    "further", "had", "has", "have", "having", "here", "into", "its", "itself", "just", "more",
    "most", "much", "news", "only", "other", "over", "report", "reports", "said", "says", "same",
    "should", "since", "some", "such", "than", "that", "their", "them", "then", "there", "these",
    "they", "this", "those", "through", "under", "until", "upon", "very", "were", "what", "when",
    "where", "which", "while", "will", "with", "would", "your",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupReason {
    UrlMatch,
    TopicMatch,
    AuthorityUpgrade,
    NewArticle,
    DedupeError,
}

impl DedupReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DedupReason::UrlMatch => "url_match",
            DedupReason::TopicMatch => "topic_match",
            DedupReason::AuthorityUpgrade => "authority_upgrade",
            DedupReason::NewArticle => "new_article",
            DedupReason::DedupeError => "dedupe_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DedupDecision {
    pub is_duplicate: bool,
    pub reason: DedupReason,
    pub existing: Option<DedupeCacheEntry>,
    /// Sightings of this story including the current one, when known.
    pub corroboration: Option<u32>,
    pub url_hash: String,
    pub topic_hash: Option<String>,
}

/// Hash of the URL with query string, fragment and trailing slashes removed, lower-cased.
pub fn url_hash(url: &str) -> String {
    let trimmed = url.trim();
    let end = trimmed
        .find(|c| c == '?' || c == '#')
        .unwrap_or(trimmed.len());
    let base = trimmed[..end].trim_end_matches('/').to_lowercase();
    sha256_hex(&base)
}

/// Canonical keyword set of the title and the first 100 chars of the summary.
pub fn topic_keywords(title: &str, summary: &str) -> Vec<String> {
    let head: String = summary.chars().take(TOPIC_SUMMARY_CHARS).collect();
    let text = format!("{title} {head}").to_lowercase();
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();

    // frequency, then first appearance
    let mut seen: HashMap<&str, (usize, usize)> = HashMap::new();
    for (pos, w) in cleaned.split_whitespace().enumerate() {
        if w.chars().count() < TOPIC_MIN_WORD_CHARS || STOP_WORDS.contains(&w) {
            continue;
        }
        seen.entry(w).or_insert((0, pos)).0 += 1;
    }
    let mut ranked: Vec<(&str, (usize, usize))> = seen.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));

    let mut top: Vec<String> = ranked
        .into_iter()
        .take(TOPIC_MAX_KEYWORDS)
        .map(|(w, _)| w.to_string())
        .collect();
    top.sort();
    top
}

/// `None` when the keyword set is too weak to deduplicate on.
pub fn topic_hash(title: &str, summary: &str) -> Option<String> {
    let keywords = topic_keywords(title, summary);
    if keywords.len() < TOPIC_MIN_KEYWORDS {
        return None;
    }
    Some(sha256_hex(&keywords.join(" ")))
}

fn sha256_hex(s: &str) -> String {
    let digest = Sha256::digest(s.as_bytes());
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

pub struct Deduplicator {
    store: Arc<dyn NewsStore>,
    url_window: Duration,
    topic_window: Duration,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn NewsStore>) -> Self {
        Self {
            store,
            url_window: Duration::hours(URL_WINDOW_HOURS),
            topic_window: Duration::hours(TOPIC_WINDOW_HOURS),
        }
    }

    pub async fn check_duplicate(
        &self,
        article: &NormalizedArticle,
        tier: SourceTier,
    ) -> DedupDecision {
        self.check_duplicate_at(article, tier, Utc::now()).await
    }

    pub async fn check_duplicate_at(
        &self,
        article: &NormalizedArticle,
        tier: SourceTier,
        now: DateTime<Utc>,
    ) -> DedupDecision {
        let url_hash = url_hash(&article.url);
        let topic_hash = topic_hash(&article.title, &article.summary);

        let decision = match self.check(article, tier, now, &url_hash, topic_hash.as_deref()).await {
            Ok(d) => d,
            Err(e) => {
                warn!(
                    target: "dedup",
                    error = %e,
                    source = %article.source,
                    url = %article.url,
                    "dedupe check failed, letting article through"
                );
                DedupDecision {
                    is_duplicate: false,
                    reason: DedupReason::DedupeError,
                    existing: None,
                    corroboration: None,
                    url_hash,
                    topic_hash,
                }
            }
        };

        counter!("dedup_decisions_total", "reason" => decision.reason.as_str()).increment(1);
        debug!(
            target: "dedup",
            reason = decision.reason.as_str(),
            duplicate = decision.is_duplicate,
            source = %article.source,
            "dedupe decision"
        );
        decision
    }

    async fn check(
        &self,
        article: &NormalizedArticle,
        tier: SourceTier,
        now: DateTime<Utc>,
        url_hash: &str,
        topic_hash: Option<&str>,
    ) -> Result<DedupDecision, StoreError> {
        let decision = |is_duplicate, reason, existing, corroboration| DedupDecision {
            is_duplicate,
            reason,
            existing,
            corroboration,
            url_hash: url_hash.to_string(),
            topic_hash: topic_hash.map(str::to_string),
        };

        // 1) same URL within 24h
        if let Some(hit) = self.store.find_cache_by_url(url_hash, now - self.url_window).await? {
            let seen = self.store.bump_seen(hit.id, now).await?;
            return Ok(decision(true, DedupReason::UrlMatch, Some(hit), Some(seen)));
        }

        // 2) same topic within 6h, unless a more authoritative source retells it
        if let Some(topic) = topic_hash {
            if let Some(hit) = self
                .store
                .find_cache_by_topic(topic, now - self.topic_window)
                .await?
            {
                if tier.get() > hit.authority_level {
                    let seen = self.store.raise_authority(hit.id, tier.get(), now).await?;
                    return Ok(decision(
                        false,
                        DedupReason::AuthorityUpgrade,
                        Some(hit),
                        Some(seen),
                    ));
                }
                let seen = self.store.bump_seen(hit.id, now).await?;
                return Ok(decision(true, DedupReason::TopicMatch, Some(hit), Some(seen)));
            }
        }

        // 3) new story; the upsert settles races with a concurrent ingestion of the same URL
        let seen = self
            .store
            .upsert_cache_entry(
                &NewCacheEntry {
                    external_id: article.external_id.clone(),
                    url_hash: url_hash.to_string(),
                    topic_hash: topic_hash.map(str::to_string),
                    authority_level: tier.get(),
                    seen_at: now,
                },
                now - Duration::hours(CACHE_TTL_HOURS),
            )
            .await?;
        if seen > 1 {
            return Ok(decision(true, DedupReason::UrlMatch, None, Some(seen)));
        }
        Ok(decision(false, DedupReason::NewArticle, None, Some(1)))
    }

    /// Undo the cache write behind a non-duplicate decision made at `now`, so
    /// that a retry of an article that failed further down is not mistaken for
    /// its own duplicate.
    pub async fn release(
        &self,
        decision: &DedupDecision,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match (decision.reason, &decision.existing) {
            (DedupReason::NewArticle, _) => {
                self.store.delete_cache_entry(&decision.url_hash, now).await
            }
            (DedupReason::AuthorityUpgrade, Some(hit)) => {
                self.store.revert_authority(hit.id, hit.authority_level).await
            }
            _ => Ok(()),
        }
    }

    /// Remove cache entries first seen more than 24h before `now`.
    pub async fn prune(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.store
            .prune_cache(now - Duration::hours(CACHE_TTL_HOURS))
            .await
    }
}
