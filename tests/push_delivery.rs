// tests/push_delivery.rs
//
// PushService over a scripted transport:
// - transient failures retried with exponential backoff, permanent ones not
// - every attempt lands in the audit log
// - digest batches go out highest score first, each under the length cap

mod common;

use std::sync::Arc;
use std::time::Duration;

use impactrank_pipeline::classify::KeywordClassifier;
use impactrank_pipeline::model::{
    Channel, PushItem, PushOutcome, RoutingState, RoutingStatus,
};
use impactrank_pipeline::push::format::len16;
use impactrank_pipeline::push::{PushService, TransportError, MAX_MESSAGE_LEN};
use impactrank_pipeline::store::{MemoryStore, NewsStore};

use common::{push_service, weekend_noon, ScriptedTransport};

fn item(id: i64, title: &str, composite: f64, channel: Channel) -> PushItem {
    PushItem {
        article_id: id,
        source: "Acme Wire".into(),
        title: title.into(),
        title_translated: None,
        summary: "Acme Corp reported record quarterly profit.".into(),
        url: format!("https://wire.example.com/{id}"),
        published_at: weekend_noon(),
        composite,
        commentary: None,
        channel,
    }
}

fn transient() -> Result<i64, TransportError> {
    Err(TransportError::Transient("HTTP 502".into()))
}

async fn pending_route(store: &MemoryStore, id: i64) {
    store
        .upsert_routing(&RoutingState {
            article_id: id,
            channel: Channel::Urgent,
            status: RoutingStatus::Pending,
            fade_level: 0,
            upgrade_flag: false,
            routed_at: weekend_noon(),
        })
        .await
        .expect("routing row");
}

#[tokio::test]
async fn transient_failures_are_retried_three_times_then_given_up() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(ScriptedTransport::with_script(vec![
        transient(),
        transient(),
        transient(),
        transient(),
    ]));
    let push = push_service(store.clone(), transport.clone());

    let report = push.push_single(&item(1, "Acme beats", 10.0, Channel::Urgent)).await;
    assert!(!report.delivered());
    assert_eq!(report.attempts, 4);
    assert!(report.error.as_deref().unwrap_or_default().contains("502"));
    assert_eq!(transport.calls(), 4);

    let history = store.push_history();
    assert_eq!(history.len(), 4);
    assert!(history.iter().all(|r| r.outcome == PushOutcome::Failed && r.message_id.is_none()));
}

#[tokio::test]
async fn recovery_after_transient_failures_marks_item_sent() {
    let store = Arc::new(MemoryStore::new());
    pending_route(&store, 7).await;
    let transport = Arc::new(ScriptedTransport::with_script(vec![transient(), transient()]));
    let push = push_service(store.clone(), transport.clone());

    let report = push.push_single(&item(7, "Acme beats", 10.0, Channel::Urgent)).await;
    assert!(report.delivered());
    assert_eq!(report.attempts, 3);

    let outcomes: Vec<PushOutcome> = store.push_history().iter().map(|r| r.outcome).collect();
    assert_eq!(
        outcomes,
        vec![PushOutcome::Failed, PushOutcome::Failed, PushOutcome::Success]
    );
    assert_eq!(store.push_history()[2].message_id, report.message_id);
    assert_eq!(store.routing_of(7).unwrap().status, RoutingStatus::Sent);
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let store = Arc::new(MemoryStore::new());
    pending_route(&store, 3).await;
    let transport = Arc::new(ScriptedTransport::with_script(vec![Err(
        TransportError::Permanent("HTTP 400: chat not found".into()),
    )]));
    let push = push_service(store.clone(), transport.clone());

    let report = push.push_single(&item(3, "Acme beats", 10.0, Channel::Urgent)).await;
    assert_eq!(report.attempts, 1);
    assert_eq!(transport.calls(), 1);
    assert_eq!(store.push_history().len(), 1);
    assert_eq!(store.routing_of(3).unwrap().status, RoutingStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_between_attempts() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(ScriptedTransport::with_script(vec![
        transient(),
        transient(),
        transient(),
    ]));
    let push = PushService::new(transport, store, Arc::new(KeywordClassifier))
        .with_delays(Duration::from_secs(1), Duration::ZERO);

    let t0 = tokio::time::Instant::now();
    let report = push.push_single(&item(1, "Acme beats", 10.0, Channel::Urgent)).await;
    assert!(report.delivered());
    // 1s + 2s + 4s
    assert!(t0.elapsed() >= Duration::from_secs(7));
    assert!(t0.elapsed() < Duration::from_secs(8));
}

#[tokio::test]
async fn batch_goes_out_highest_score_first() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(ScriptedTransport::new());
    let push = push_service(store.clone(), transport.clone());

    let items = vec![
        item(1, "Low story", 5.0, Channel::Digest),
        item(2, "Top story", 9.1, Channel::Digest),
        item(3, "Middle story", 7.2, Channel::Urgent),
    ];
    let batch = push.push_batch(items, Channel::Digest).await;
    assert_eq!(batch.sent, 3);
    assert_eq!(batch.failed, 0);

    let order: Vec<i64> = batch.reports.iter().map(|r| r.article_id).collect();
    assert_eq!(order, vec![2, 3, 1]);
    let sent = transport.sent();
    assert!(sent[0].starts_with("<b>Top story</b>"));
    assert!(sent[2].contains("· digest ·"));

    // digest delivery audits but leaves routing alone
    assert!(store.push_history().iter().all(|r| r.channel == Channel::Digest));
}

#[tokio::test]
async fn oversized_items_are_sent_within_the_cap() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(ScriptedTransport::new());
    let push = push_service(store, transport.clone());

    let mut big = item(9, &"Acme merger talks ".repeat(400), 8.4, Channel::Digest);
    big.summary = "Профит & <выручка> 📈 ".repeat(1000);
    big.commentary = Some("Analyst view ".repeat(500));
    push.push_single(&big).await;

    let text = &transport.sent()[0];
    assert!(len16(text) <= MAX_MESSAGE_LEN, "len16 = {}", len16(text));
    assert!(text.contains("<a href=\"https://wire.example.com/9\">"));
    assert!(text.contains("#HighImpact"));
    assert!(text.contains('…'));
}
