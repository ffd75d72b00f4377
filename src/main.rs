//! News pipeline service: binary entrypoint.
//! Verifies the schema, starts the ingest/digest/cleanup timers and serves the
//! HTTP ingestion endpoint.

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use impactrank_pipeline::{
    api::{self, AppState},
    build_pipeline, build_transport,
    config::AppConfig,
    default_classifier,
    ingest::config::load_catalog_default,
    metrics::Metrics,
    scheduler::{spawn_scheduler, SchedulerCfg},
    store::{NewsStore, PgStore},
};

/// Compact logs by default, JSON when LOG_FORMAT=json.
/// The runtime may already have installed a subscriber; that one wins.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("impactrank_pipeline=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let result = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::from_env()?;
    let catalog = load_catalog_default().context("loading feed catalog")?;

    let store = Arc::new(
        PgStore::connect(&cfg.database_url)
            .await
            .context("connecting to Postgres")?,
    );
    store
        .verify_schema()
        .await
        .context("schema check failed; apply sql/schema.sql")?;
    let store: Arc<dyn NewsStore> = store;

    let classifier = default_classifier();
    let transport = build_transport(&cfg);
    let pipeline = Arc::new(build_pipeline(
        &cfg,
        store,
        &catalog,
        transport,
        classifier.clone(),
    ));
    pipeline
        .register_sources()
        .await
        .context("registering sources")?;

    let timers = SchedulerCfg::from(&cfg);
    let metrics = Metrics::init(&timers)?;
    let _handles = spawn_scheduler(pipeline.clone(), timers);

    let router = api::router(AppState {
        pipeline,
        classifier,
        ingest_secret: cfg.ingest_secret.clone(),
    })
    .merge(metrics.router());

    Ok(router.into())
}
