// tests/scheduler.rs
//
// Timer loops under paused tokio time: each job fires immediately and then
// once per interval.

mod common;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use impactrank_pipeline::model::PushOutcome;
use impactrank_pipeline::scheduler::{spawn_scheduler, SchedulerCfg};
use impactrank_pipeline::store::MemoryStore;

use common::{article, pipeline, ScriptedTransport};

#[tokio::test(start_paused = true)]
async fn digest_fires_on_start_and_every_interval() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(ScriptedTransport::new());
    let p = Arc::new(pipeline(store.clone(), transport.clone()));

    let mut a = article(
        "https://wire.example.com/acme",
        "Acme Corp agrees merger with Widget Industries",
        "Acme Corp and Widget Industries announced a merger",
        4,
    );
    a.published_at = Utc::now();
    p.ingest_article(a).await.expect("ingest");

    let handles = spawn_scheduler(
        p,
        SchedulerCfg {
            ingest_interval: Duration::from_secs(900),
            digest_interval: Duration::from_secs(2 * 3600),
            cleanup_interval: Duration::from_secs(6 * 3600),
        },
    );

    tokio::time::sleep(Duration::from_secs(2 * 3600 + 60)).await;
    handles.abort();

    // t=0 and t=2h; repeats are allowed across digests
    let history = store.push_history();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.outcome == PushOutcome::Success));
    assert_eq!(transport.calls(), 2);
}
