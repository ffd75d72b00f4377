// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod classify;
pub mod config;
pub mod dedup;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod push;
pub mod routing;
pub mod scheduler;
pub mod scoring;
pub mod store;

use std::sync::Arc;

use crate::classify::{Classifier, KeywordClassifier};
use crate::config::AppConfig;
use crate::ingest::config::FeedCatalog;
use crate::ingest::providers::RssAdapter;
use crate::ingest::types::SourceAdapter;
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::push::{ChatTransport, DryRunTransport, PushService, TelegramTransport};
use crate::store::NewsStore;

pub use crate::api::{router, AppState};
pub use crate::model::{Channel, NormalizedArticle, SourceTier};

/// Chat transport from config: Telegram when credentials are present, dry-run otherwise.
pub fn build_transport(cfg: &AppConfig) -> Arc<dyn ChatTransport> {
    match &cfg.telegram {
        Some(tg) => Arc::new(TelegramTransport::new(tg.bot_token.clone(), tg.chat_id.clone())),
        None => {
            tracing::warn!(target: "push", "TELEGRAM_BOT_TOKEN/TELEGRAM_CHAT_ID not set, using dry-run transport");
            Arc::new(DryRunTransport::new())
        }
    }
}

/// Wire the pipeline with one RSS adapter per enabled catalog entry.
pub fn build_pipeline(
    cfg: &AppConfig,
    store: Arc<dyn NewsStore>,
    catalog: &FeedCatalog,
    transport: Arc<dyn ChatTransport>,
    classifier: Arc<dyn Classifier>,
) -> Pipeline {
    let push = PushService::new(transport, store.clone(), classifier.clone())
        .with_delays(cfg.push_base_delay, cfg.push_send_delay);
    let adapters: Vec<Arc<dyn SourceAdapter>> = catalog
        .enabled_adapters()
        .map(|a| Arc::new(RssAdapter::from_config(a, classifier.clone())) as Arc<dyn SourceAdapter>)
        .collect();
    Pipeline::new(store, push, PipelineSettings::from(cfg)).with_adapters(adapters)
}

/// Default classifier used across the binary.
pub fn default_classifier() -> Arc<dyn Classifier> {
    Arc::new(KeywordClassifier)
}
