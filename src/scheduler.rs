// src/scheduler.rs
use metrics::counter;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::AppConfig;
use crate::pipeline::Pipeline;

#[derive(Clone, Copy, Debug)]
pub struct SchedulerCfg {
    pub ingest_interval: Duration,
    pub digest_interval: Duration,
    pub cleanup_interval: Duration,
}

impl From<&AppConfig> for SchedulerCfg {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            ingest_interval: cfg.ingest_interval,
            digest_interval: cfg.digest_interval,
            cleanup_interval: cfg.cleanup_interval,
        }
    }
}

/// The three independent timer loops. Dropping this does not stop them; call `abort`.
pub struct SchedulerHandles {
    pub ingest: JoinHandle<()>,
    pub digest: JoinHandle<()>,
    pub cleanup: JoinHandle<()>,
}

impl SchedulerHandles {
    pub fn abort(&self) {
        self.ingest.abort();
        self.digest.abort();
        self.cleanup.abort();
    }
}

/// Spawn ingestion, digest and cleanup loops. Each fires once immediately and
/// then on its own interval; overlapping runs are safe because every write is
/// an idempotent upsert and cleanup only removes expired rows.
pub fn spawn_scheduler(pipeline: Arc<Pipeline>, cfg: SchedulerCfg) -> SchedulerHandles {
    let ingest = {
        let p = pipeline.clone();
        spawn_loop("ingest", cfg.ingest_interval, move || {
            let p = p.clone();
            async move {
                p.run_ingest_cycle().await;
            }
        })
    };

    let digest = {
        let p = pipeline.clone();
        spawn_loop("digest", cfg.digest_interval, move || {
            let p = p.clone();
            async move {
                match p.run_digest().await {
                    Ok(r) => tracing::info!(target: "scheduler", sent = r.sent, failed = r.failed, "digest tick"),
                    Err(e) => tracing::warn!(target: "scheduler", error = %e, "digest query failed"),
                }
            }
        })
    };

    let cleanup = {
        let p = pipeline;
        spawn_loop("cleanup", cfg.cleanup_interval, move || {
            let p = p.clone();
            async move {
                if let Err(e) = p.run_cleanup().await {
                    tracing::warn!(target: "scheduler", error = %e, "cache cleanup failed");
                }
            }
        })
    };

    SchedulerHandles {
        ingest,
        digest,
        cleanup,
    }
}

fn spawn_loop<F, Fut>(job: &'static str, period: Duration, mut run: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            counter!("scheduler_runs_total", "job" => job).increment(1);
            tracing::debug!(target: "scheduler", job, "tick");
            run().await;
        }
    })
}
