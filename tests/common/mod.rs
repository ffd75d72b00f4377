// tests/common/mod.rs
//
// Shared builders for the integration tests: articles, a scripted chat
// transport and a pipeline wired to the in-memory store.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use impactrank_pipeline::classify::KeywordClassifier;
use impactrank_pipeline::model::{NormalizedArticle, SourceTier};
use impactrank_pipeline::pipeline::{Pipeline, PipelineSettings};
use impactrank_pipeline::push::{ChatTransport, PushService, TransportError};
use impactrank_pipeline::store::MemoryStore;

/// Saturday, outside US market hours, so weights stay at their base values.
pub fn weekend_noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 8, 12, 0, 0).unwrap()
}

pub fn article(url: &str, title: &str, summary: &str, tier: u8) -> NormalizedArticle {
    NormalizedArticle {
        external_id: format!("ext:{url}"),
        source: "Acme Wire".into(),
        tier: SourceTier::new(tier).expect("tier 1..=5"),
        title: title.into(),
        title_translated: None,
        summary: summary.into(),
        body: None,
        url: url.into(),
        published_at: weekend_noon(),
        symbols: Vec::new(),
        entities: BTreeMap::new(),
        region: None,
        lang: "en".into(),
        tags: Vec::new(),
        commentary: None,
    }
}

/// Replays queued results, then succeeds with increasing ids.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<i64, TransportError>>>,
    sent: Mutex<Vec<String>>,
    next_id: Mutex<i64>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(results: Vec<Result<i64, TransportError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn send_message(&self, text: &str) -> Result<i64, TransportError> {
        self.sent.lock().unwrap().push(text.to_string());
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        Ok(1000 + *id)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub fn push_service(store: Arc<MemoryStore>, transport: Arc<ScriptedTransport>) -> PushService {
    PushService::new(transport, store, Arc::new(KeywordClassifier))
        .with_delays(Duration::ZERO, Duration::ZERO)
}

pub fn pipeline(store: Arc<MemoryStore>, transport: Arc<ScriptedTransport>) -> Pipeline {
    let push = push_service(store.clone(), transport);
    Pipeline::new(store, push, PipelineSettings::default())
}

/// Fill the fixture placeholders with dates a few minutes before `now`.
pub fn fixture(name: &str, now: DateTime<Utc>) -> String {
    let path = format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"));
    let raw = std::fs::read_to_string(&path).expect("read fixture");
    let at = now - chrono::Duration::minutes(10);
    raw.replace("PUBDATE_RECENT", &at.to_rfc2822())
        .replace("PUBDATE_RFC3339", &at.to_rfc3339())
}
