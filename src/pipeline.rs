//! Orchestrator: Dedup → Persist → Score → Route → (maybe) Push, plus the
//! batch ingestion cycle, digest delivery and cache cleanup that the
//! scheduler drives.

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::dedup::{DedupDecision, DedupReason, Deduplicator};
use crate::error::{FeedFetchError, PipelineError, ScoringError, StoreError};
use crate::ingest::types::{FetchBatch, SourceAdapter};
use crate::model::{ArticleId, Channel, NormalizedArticle, PushItem};
use crate::push::{BatchReport, PushService};
use crate::routing::{NewsRouter, RouteContext, FADE_WINDOW_HOURS};
use crate::scoring::{
    corroboration_factor, is_us_market_hours, ImpactScorer, ScoreResult, ScoringContext,
};
use crate::store::NewsStore;

const NOVELTY_WINDOW_HOURS: i64 = 6;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub tracked_symbols: HashSet<String>,
    pub has_holdings: bool,
    pub market_hours_weighting: bool,
    pub digest_lookback: Duration,
    pub digest_top_n: u32,
    pub ingest_lookback: Duration,
    pub adapter_batch_limit: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            tracked_symbols: HashSet::new(),
            has_holdings: false,
            market_hours_weighting: true,
            digest_lookback: Duration::hours(12),
            digest_top_n: 10,
            ingest_lookback: Duration::hours(24),
            adapter_batch_limit: 200,
        }
    }
}

impl From<&AppConfig> for PipelineSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            tracked_symbols: cfg.relevance_symbols(),
            has_holdings: !cfg.holdings.is_empty(),
            market_hours_weighting: cfg.market_hours_weighting,
            digest_lookback: Duration::hours(cfg.digest_lookback_hours),
            digest_top_n: cfg.digest_top_n,
            ingest_lookback: Duration::hours(cfg.ingest_lookback_hours),
            adapter_batch_limit: cfg.adapter_batch_limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestAction {
    Skipped,
    Suppressed,
    Pushed,
    Routed,
}

impl IngestAction {
    pub fn as_str(self) -> &'static str {
        match self {
            IngestAction::Skipped => "skipped",
            IngestAction::Suppressed => "suppressed",
            IngestAction::Pushed => "pushed",
            IngestAction::Routed => "routed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub action: IngestAction,
    pub article_id: Option<ArticleId>,
    pub dedup: DedupDecision,
    pub channel: Option<Channel>,
    pub score: Option<f64>,
    pub fade_level: Option<u8>,
    pub upgrade_flag: bool,
    pub message_id: Option<i64>,
}

impl IngestOutcome {
    fn skipped(dedup: DedupDecision) -> Self {
        Self {
            action: IngestAction::Skipped,
            article_id: None,
            dedup,
            channel: None,
            score: None,
            fade_level: None,
            upgrade_flag: false,
            message_id: None,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub adapters: usize,
    pub fetched: usize,
    pub feed_errors: usize,
    pub rejected: usize,
    pub skipped: usize,
    pub suppressed: usize,
    pub routed: usize,
    pub pushed: usize,
    pub failed: usize,
}

pub struct Pipeline {
    store: Arc<dyn NewsStore>,
    dedup: Deduplicator,
    scorer: ImpactScorer,
    router: NewsRouter,
    push: PushService,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(store: Arc<dyn NewsStore>, push: PushService, settings: PipelineSettings) -> Self {
        Self {
            dedup: Deduplicator::new(store.clone()),
            router: NewsRouter::new(store.clone()),
            scorer: ImpactScorer::default(),
            store,
            push,
            adapters: Vec::new(),
            settings,
        }
    }

    pub fn with_adapters(mut self, adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn store(&self) -> &Arc<dyn NewsStore> {
        &self.store
    }

    /// Fail fast when the store lacks a required table.
    pub async fn verify_schema(&self) -> Result<(), StoreError> {
        self.store.verify_schema().await
    }

    /// Upsert every source the adapters publish under. Safe to repeat.
    pub async fn register_sources(&self) -> Result<usize, StoreError> {
        let mut n = 0;
        for adapter in &self.adapters {
            for source in adapter.sources() {
                self.store.upsert_source(&source).await?;
                n += 1;
            }
        }
        info!(target: "ingest", sources = n, "sources registered");
        Ok(n)
    }

    pub async fn ingest_article(
        &self,
        article: NormalizedArticle,
    ) -> Result<IngestOutcome, PipelineError> {
        self.ingest_article_at(article, Utc::now()).await
    }

    /// Run one article through the whole sequence as of `now`.
    pub async fn ingest_article_at(
        &self,
        article: NormalizedArticle,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, PipelineError> {
        let outcome = self.process(&article, now).await;
        match &outcome {
            Ok(o) => {
                counter!("ingest_actions_total", "action" => o.action.as_str()).increment(1);
                info!(
                    target: "ingest",
                    source = %article.source,
                    action = o.action.as_str(),
                    reason = o.dedup.reason.as_str(),
                    article_id = ?o.article_id,
                    channel = ?o.channel.map(Channel::as_str),
                    score = ?o.score,
                    "article processed"
                );
            }
            Err(e) => {
                counter!("ingest_actions_total", "action" => "failed").increment(1);
                warn!(target: "ingest", error = %e, source = %article.source, url = %article.url, "article failed");
            }
        }
        outcome
    }

    async fn process(
        &self,
        article: &NormalizedArticle,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, PipelineError> {
        let dedup = self.dedup.check_duplicate_at(article, article.tier, now).await;
        if dedup.is_duplicate {
            return Ok(IngestOutcome::skipped(dedup));
        }

        let topic_hash = dedup.topic_hash.clone();
        let article_id = match self
            .store
            .insert_article(article, topic_hash.as_deref(), now)
            .await
        {
            Ok(Some(id)) => id,
            // already stored under this URL or (source, external_id)
            Ok(None) => return Ok(IngestOutcome::skipped(dedup)),
            Err(e) => {
                self.release(&dedup, None, now).await;
                return Err(e.into());
            }
        };

        let previous_composite = self
            .previous_composite(article_id, topic_hash.as_deref(), now)
            .await;
        let score = match self.score_and_persist(article, article_id, &dedup, now).await {
            Ok(score) => score,
            Err(e) => {
                self.release(&dedup, Some(article_id), now).await;
                return Err(e);
            }
        };

        let route = self
            .router
            .route_news_item(
                article_id,
                score.composite,
                &RouteContext {
                    topic_hash,
                    previous_composite,
                    now: Some(now),
                },
            )
            .await;

        let mut outcome = IngestOutcome {
            action: match route.channel {
                Channel::Suppressed => IngestAction::Suppressed,
                _ => IngestAction::Routed,
            },
            article_id: Some(article_id),
            dedup,
            // an unpersisted route never reaches a digest
            channel: route.persisted.then_some(route.channel),
            score: Some(score.composite),
            fade_level: Some(route.fade_level),
            upgrade_flag: route.upgrade_flag,
            message_id: None,
        };

        if route.should_push {
            let item = PushItem::from_article(article_id, article, score.composite, route.channel);
            let report = self.push.push_single(&item).await;
            if let Some(id) = report.message_id {
                outcome.action = IngestAction::Pushed;
                outcome.message_id = Some(id);
            }
        }
        Ok(outcome)
    }

    async fn score_and_persist(
        &self,
        article: &NormalizedArticle,
        article_id: ArticleId,
        dedup: &DedupDecision,
        now: DateTime<Utc>,
    ) -> Result<ScoreResult, PipelineError> {
        let recent_symbol_mentions = if article.symbols.is_empty() {
            0
        } else {
            self.store
                .count_recent_with_symbols(
                    &article.symbols,
                    now - Duration::hours(NOVELTY_WINDOW_HOURS),
                    article_id,
                )
                .await
                .map_err(ScoringError::Lookup)?
        };

        let ctx = ScoringContext {
            now: Some(now),
            tracked_symbols: self.settings.tracked_symbols.clone(),
            market_hours: self.settings.market_hours_weighting && is_us_market_hours(now),
            has_holdings: self.settings.has_holdings,
            recent_symbol_mentions,
            corroboration: corroboration_factor(dedup.corroboration.unwrap_or(1)),
        };
        let score = self.scorer.score_article(article, article.tier, &ctx)?;
        self.store.upsert_score(article_id, &score, now).await?;
        Ok(score)
    }

    /// Roll back what this attempt wrote before it failed, so a retry of the
    /// same article is processed afresh instead of skipped as `url_match`.
    async fn release(
        &self,
        dedup: &DedupDecision,
        article_id: Option<ArticleId>,
        now: DateTime<Utc>,
    ) {
        if let Some(id) = article_id {
            if let Err(e) = self.store.delete_article(id).await {
                warn!(
                    target: "ingest",
                    error = %e,
                    article_id = id,
                    "could not remove partially ingested article"
                );
            }
        }
        if let Err(e) = self.dedup.release(dedup, now).await {
            warn!(
                target: "ingest",
                error = %e,
                reason = dedup.reason.as_str(),
                "could not release dedupe entry, a retry may be skipped"
            );
        }
    }

    /// The article's own stored composite, else the latest composite of its
    /// topic lineage within the fade window.
    async fn previous_composite(
        &self,
        article_id: ArticleId,
        topic_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<f64> {
        let own = match self.store.latest_composite(article_id).await {
            Ok(v) => v,
            Err(e) => {
                warn!(target: "ingest", error = %e, article_id, "previous score lookup failed");
                None
            }
        };
        if own.is_some() {
            return own;
        }
        let topic = topic_hash?;
        self.store
            .lineage_composite(topic, now - Duration::hours(FADE_WINDOW_HOURS), article_id)
            .await
            .unwrap_or_else(|e| {
                warn!(target: "ingest", error = %e, article_id, "lineage score lookup failed");
                None
            })
    }

    /// Fan out to every adapter on its own task, then feed what came back
    /// through the pipeline. A failing or panicking adapter never stops its
    /// siblings; it is reported as a `FeedFetchError::Adapter`.
    pub async fn run_ingest_cycle(&self) -> CycleReport {
        let now = Utc::now();
        let since = now - self.settings.ingest_lookback;
        let limit = self.settings.adapter_batch_limit;

        let tasks: Vec<_> = self
            .adapters
            .iter()
            .map(|adapter| {
                let adapter = Arc::clone(adapter);
                let name = adapter.name().to_string();
                let handle =
                    tokio::spawn(async move { adapter.fetch_batch(since, now, limit).await });
                (name, handle)
            })
            .collect();

        let mut batches = Vec::with_capacity(tasks.len());
        for (name, handle) in tasks {
            let batch = match handle.await {
                Ok(batch) => batch,
                Err(e) => {
                    counter!("ingest_provider_errors_total").increment(1);
                    FetchBatch {
                        errors: vec![FeedFetchError::Adapter {
                            adapter: name.clone(),
                            message: if e.is_panic() {
                                "task panicked".to_string()
                            } else {
                                e.to_string()
                            },
                        }],
                        ..FetchBatch::default()
                    }
                }
            };
            batches.push((name, batch));
        }

        let mut report = CycleReport {
            adapters: batches.len(),
            ..CycleReport::default()
        };
        for (name, batch) in batches {
            report.fetched += batch.accepted.len();
            report.feed_errors += batch.errors.len();
            report.rejected += batch.rejected.len();
            for e in &batch.errors {
                warn!(target: "ingest", adapter = %name, feed = e.feed(), error = %e, "feed failed this cycle");
            }

            for article in batch.accepted {
                match self.ingest_article(article).await {
                    Ok(o) => match o.action {
                        IngestAction::Skipped => report.skipped += 1,
                        IngestAction::Suppressed => report.suppressed += 1,
                        IngestAction::Routed => report.routed += 1,
                        IngestAction::Pushed => report.pushed += 1,
                    },
                    Err(_) => report.failed += 1,
                }
            }
        }

        gauge!("ingest_pipeline_last_run_ts").set(now.timestamp() as f64);
        info!(
            target: "ingest",
            adapters = report.adapters,
            fetched = report.fetched,
            feed_errors = report.feed_errors,
            rejected = report.rejected,
            skipped = report.skipped,
            routed = report.routed,
            pushed = report.pushed,
            failed = report.failed,
            "ingest cycle finished"
        );
        report
    }

    pub async fn run_digest(&self) -> Result<BatchReport, StoreError> {
        self.run_digest_at(Utc::now()).await
    }

    /// Push the top-N items of the lookback window. Nothing is marked sent, so
    /// a story that keeps ranking resurfaces in the next digest.
    pub async fn run_digest_at(&self, now: DateTime<Utc>) -> Result<BatchReport, StoreError> {
        let items = self
            .store
            .top_for_digest(
                now - self.settings.digest_lookback,
                &Channel::deliverable(),
                self.settings.digest_top_n,
            )
            .await?;
        gauge!("digest_last_run_ts").set(now.timestamp() as f64);
        if items.is_empty() {
            info!(target: "scheduler", "digest: nothing to send");
            return Ok(BatchReport::default());
        }
        Ok(self.push.push_batch(items, Channel::Digest).await)
    }

    pub async fn run_cleanup(&self) -> Result<u64, StoreError> {
        self.run_cleanup_at(Utc::now()).await
    }

    pub async fn run_cleanup_at(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let removed = self.dedup.prune(now).await?;
        gauge!("cleanup_last_run_ts").set(now.timestamp() as f64);
        info!(target: "scheduler", removed, "dedupe cache pruned");
        Ok(removed)
    }
}

/// True when the dedupe check hit a store error and let the article through.
pub fn dedup_failed_open(outcome: &IngestOutcome) -> bool {
    outcome.dedup.reason == DedupReason::DedupeError
}
