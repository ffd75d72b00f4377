// tests/pipeline_e2e.rs
//
// Whole pipeline over the in-memory store and a scripted transport:
// Dedup → Persist → Score → Route → Push, the digest pass and cleanup,
// plus one ingest cycle fed by a fixture adapter.

mod common;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use impactrank_pipeline::classify::KeywordClassifier;
use impactrank_pipeline::dedup::DedupReason;
use impactrank_pipeline::error::{FeedFetchError, PipelineError};
use impactrank_pipeline::ingest::types::{FeedSpec, FetchBatch, SourceAdapter};
use impactrank_pipeline::ingest::providers::RssAdapter;
use impactrank_pipeline::model::{Channel, PushOutcome, RoutingStatus, Source, SourceTier};
use impactrank_pipeline::pipeline::{dedup_failed_open, IngestAction};
use impactrank_pipeline::store::MemoryStore;

use common::{article, fixture, pipeline, weekend_noon, ScriptedTransport};

const TITLE: &str = "Acme Corp agrees merger with Widget Industries";
const SUMMARY: &str = "Acme Corp and Widget Industries announced a merger valued at four billion dollars";

#[tokio::test]
async fn repeat_url_is_skipped_and_digest_delivers_the_original() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(ScriptedTransport::new());
    let p = pipeline(store.clone(), transport.clone());
    let now = weekend_noon();

    let a = article("https://media.example.com/acme-widget", TITLE, SUMMARY, 4);
    let first = p.ingest_article_at(a.clone(), now).await.expect("ingest A");
    assert_eq!(first.action, IngestAction::Routed);
    assert_eq!(first.channel, Some(Channel::Digest));
    assert_eq!(first.dedup.reason, DedupReason::NewArticle);
    assert!(!dedup_failed_open(&first));
    let id = first.article_id.expect("stored");
    let routing = store.routing_of(id).expect("routing row");
    assert_eq!(routing.status, RoutingStatus::Pending);
    assert_eq!(routing.fade_level, 0);
    assert_eq!(store.score_of(id).unwrap().composite, first.score.unwrap());

    let mut b = a.clone();
    b.external_id = "other-id".into();
    b.title = "Widget and Acme confirm tie-up".into();
    let second = p
        .ingest_article_at(b, now + Duration::minutes(40))
        .await
        .expect("ingest B");
    assert_eq!(second.action, IngestAction::Skipped);
    assert!(second.dedup.is_duplicate);
    assert_eq!(second.dedup.reason, DedupReason::UrlMatch);
    assert_eq!(second.dedup.corroboration, Some(2));
    assert_eq!(store.articles().len(), 1);

    let batch = p
        .run_digest_at(now + Duration::hours(1))
        .await
        .expect("digest");
    assert_eq!(batch.sent, 1);
    assert_eq!(batch.reports[0].article_id, id);

    let history = store.push_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, PushOutcome::Success);
    assert_eq!(history[0].channel, Channel::Digest);
    assert!(transport.sent()[0].contains(TITLE));
    // digest items stay pending and may resurface
    assert_eq!(store.routing_of(id).unwrap().status, RoutingStatus::Pending);
    let again = p.run_digest_at(now + Duration::hours(3)).await.unwrap();
    assert_eq!(again.sent, 1);
}

#[tokio::test]
async fn official_retelling_passes_as_authority_upgrade() {
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(store.clone(), Arc::new(ScriptedTransport::new()));
    let now = weekend_noon();

    let wire = article("https://wire.example.com/acme", TITLE, SUMMARY, 3);
    let first = p.ingest_article_at(wire, now).await.unwrap();
    assert_eq!(first.dedup.reason, DedupReason::NewArticle);
    assert_eq!(store.cache_entries()[0].authority_level, 3);

    let mut official = article("https://regulator.example.gov/acme", TITLE, SUMMARY, 5);
    official.source = "SEC".into();
    official.published_at = now + Duration::hours(2);
    let second = p
        .ingest_article_at(official, now + Duration::hours(2))
        .await
        .unwrap();
    assert!(!second.dedup.is_duplicate);
    assert_eq!(second.dedup.reason, DedupReason::AuthorityUpgrade);
    assert_eq!(store.cache_entries()[0].authority_level, 5);
    assert_eq!(store.articles().len(), 2);

    // same lineage: fades one step, and scores higher than the wire copy
    assert_eq!(second.fade_level, Some(1));
    assert!(second.score.unwrap() > first.score.unwrap());
}

#[tokio::test]
async fn lower_tier_retelling_is_skipped() {
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(store.clone(), Arc::new(ScriptedTransport::new()));
    let now = weekend_noon();

    p.ingest_article_at(article("https://a.example.com/1", TITLE, SUMMARY, 4), now)
        .await
        .unwrap();
    let o = p
        .ingest_article_at(
            article("https://b.example.com/2", TITLE, SUMMARY, 2),
            now + Duration::minutes(5),
        )
        .await
        .unwrap();
    assert_eq!(o.action, IngestAction::Skipped);
    assert_eq!(o.dedup.reason, DedupReason::TopicMatch);
    assert_eq!(store.articles().len(), 1);
}

#[tokio::test]
async fn store_outage_fails_the_insert() {
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(store.clone(), Arc::new(ScriptedTransport::new()));
    store.set_offline(true);

    let err = p
        .ingest_article_at(article("https://a.example.com/1", TITLE, SUMMARY, 4), weekend_noon())
        .await
        .expect_err("insert must fail");
    assert!(matches!(err, PipelineError::Store(_)));
}

#[tokio::test]
async fn failed_insert_leaves_no_trace_and_retry_is_ingested() {
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(store.clone(), Arc::new(ScriptedTransport::new()));
    let now = weekend_noon();
    let a = article("https://a.example.com/1", TITLE, SUMMARY, 4);

    store.fail_next("insert_article", 1);
    let err = p.ingest_article_at(a.clone(), now).await.expect_err("first attempt");
    assert!(matches!(err, PipelineError::Store(_)));
    assert!(store.cache_entries().is_empty(), "dedupe entry released");

    let retry = p
        .ingest_article_at(a, now + Duration::seconds(30))
        .await
        .expect("retry");
    assert_eq!(retry.dedup.reason, DedupReason::NewArticle);
    assert_eq!(retry.action, IngestAction::Routed);
    let id = retry.article_id.expect("stored on retry");
    assert_eq!(store.articles().len(), 1);
    assert!(store.score_of(id).is_some());
    assert!(store.routing_of(id).is_some());
}

#[tokio::test]
async fn failed_score_write_removes_the_article_so_retry_scores_it() {
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(store.clone(), Arc::new(ScriptedTransport::new()));
    let now = weekend_noon();
    let a = article("https://a.example.com/1", TITLE, SUMMARY, 4);

    store.fail_next("upsert_score", 1);
    assert!(p.ingest_article_at(a.clone(), now).await.is_err());
    assert!(store.articles().is_empty());
    assert!(store.cache_entries().is_empty());

    let retry = p.ingest_article_at(a, now + Duration::minutes(1)).await.unwrap();
    let id = retry.article_id.expect("stored on retry");
    assert_eq!(store.score_of(id).unwrap().composite, retry.score.unwrap());
}

#[tokio::test]
async fn failed_authority_upgrade_is_reverted_for_the_retry() {
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(store.clone(), Arc::new(ScriptedTransport::new()));
    let now = weekend_noon();

    p.ingest_article_at(article("https://wire.example.com/acme", TITLE, SUMMARY, 3), now)
        .await
        .unwrap();

    let mut official = article("https://regulator.example.gov/acme", TITLE, SUMMARY, 5);
    official.source = "SEC".into();
    store.fail_next("insert_article", 1);
    assert!(p
        .ingest_article_at(official.clone(), now + Duration::minutes(10))
        .await
        .is_err());
    let entry = &store.cache_entries()[0];
    assert_eq!(entry.authority_level, 3);
    assert_eq!(entry.seen_count, 1);

    let retry = p
        .ingest_article_at(official, now + Duration::minutes(11))
        .await
        .unwrap();
    assert_eq!(retry.dedup.reason, DedupReason::AuthorityUpgrade);
    assert_eq!(store.articles().len(), 2);
}

#[tokio::test]
async fn articles_are_stamped_with_the_ingest_time() {
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(store.clone(), Arc::new(ScriptedTransport::new()));
    let now = weekend_noon();
    p.ingest_article_at(article("https://a.example.com/1", TITLE, SUMMARY, 4), now)
        .await
        .unwrap();
    assert_eq!(store.articles()[0].created_at, now);
}

#[tokio::test]
async fn cleanup_prunes_the_dedupe_cache() {
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(store.clone(), Arc::new(ScriptedTransport::new()));
    let now = weekend_noon();
    p.ingest_article_at(article("https://a.example.com/1", TITLE, SUMMARY, 4), now)
        .await
        .unwrap();

    assert_eq!(p.run_cleanup_at(now + Duration::hours(6)).await.unwrap(), 0);
    assert_eq!(p.run_cleanup_at(now + Duration::hours(25)).await.unwrap(), 1);
    assert!(store.cache_entries().is_empty());
}

fn feed_spec() -> FeedSpec {
    FeedSpec {
        source: "Acme Wire".into(),
        url: "https://wire.example.com/rss".into(),
        tier: SourceTier::new(3).unwrap(),
        reliability: 0.75,
        rate_limit_per_min: 30,
        fetch_interval_secs: 600,
        timeout_secs: 10,
        region: Some("US".into()),
        lang: None,
    }
}

#[tokio::test]
async fn ingest_cycle_runs_fixture_feed_through_the_pipeline() {
    let store = Arc::new(MemoryStore::new());
    let docs = HashMap::from([(
        "https://wire.example.com/rss".to_string(),
        fixture("wire_rss.xml", Utc::now()),
    )]);
    let adapter: Arc<dyn SourceAdapter> = Arc::new(RssAdapter::from_fixtures(
        "wires",
        vec![feed_spec()],
        docs,
        Arc::new(KeywordClassifier),
    ));
    let p = pipeline(store.clone(), Arc::new(ScriptedTransport::new())).with_adapters(vec![adapter]);

    assert_eq!(p.register_sources().await.unwrap(), 1);
    assert_eq!(store.sources()[0].name, "Acme Wire");
    assert_eq!(store.sources()[0].tier.get(), 3);

    let report = p.run_ingest_cycle().await;
    assert_eq!(report.adapters, 1);
    assert_eq!(report.fetched, 2);
    assert_eq!(report.rejected, 2);
    assert_eq!(report.feed_errors, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(report.routed + report.suppressed + report.pushed, 2);
    assert_eq!(store.articles().len(), 2);

    let acme = store
        .articles()
        .into_iter()
        .find(|a| a.article.external_id == "acme-wire-1001")
        .expect("acme story stored");
    assert_eq!(acme.article.symbols, vec!["ACME".to_string()]);
    assert_eq!(acme.article.region.as_deref(), Some("US"));

    // feed is not due again inside its interval
    let again = p.run_ingest_cycle().await;
    assert_eq!(again.fetched, 0);
}

struct Exploding;

#[async_trait]
impl SourceAdapter for Exploding {
    async fn fetch_batch(
        &self,
        _since: DateTime<Utc>,
        _until: DateTime<Utc>,
        _limit: usize,
    ) -> FetchBatch {
        panic!("malformed upstream payload");
    }

    fn name(&self) -> &str {
        "exploding"
    }

    fn sources(&self) -> Vec<Source> {
        Vec::new()
    }
}

#[tokio::test]
async fn panicking_adapter_does_not_take_down_its_siblings() {
    let store = Arc::new(MemoryStore::new());
    let docs = HashMap::from([(
        "https://wire.example.com/rss".to_string(),
        fixture("wire_rss.xml", Utc::now()),
    )]);
    let healthy: Arc<dyn SourceAdapter> = Arc::new(RssAdapter::from_fixtures(
        "wires",
        vec![feed_spec()],
        docs,
        Arc::new(KeywordClassifier),
    ));
    let p = pipeline(store.clone(), Arc::new(ScriptedTransport::new()))
        .with_adapters(vec![Arc::new(Exploding), healthy]);

    let report = p.run_ingest_cycle().await;
    assert_eq!(report.adapters, 2);
    assert_eq!(report.feed_errors, 1);
    assert_eq!(report.fetched, 2);
    assert_eq!(store.articles().len(), 2);

    // the loop survives to run again
    let again = p.run_ingest_cycle().await;
    assert_eq!(again.feed_errors, 1);
}

#[test]
fn adapter_failures_name_the_adapter() {
    let e = FeedFetchError::Adapter {
        adapter: "exploding".into(),
        message: "task panicked".into(),
    };
    assert_eq!(e.feed(), "exploding");
    assert_eq!(e.to_string(), "adapter `exploding` failed: task panicked");
}
