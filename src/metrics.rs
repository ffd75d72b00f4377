use anyhow::{Context, Result};
use axum::{http::header, response::IntoResponse, routing::get, Router};
use metrics::{describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::ingest::ensure_metrics_described;
use crate::scheduler::SchedulerCfg;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and publish the timer cadences as static gauges.
    /// Fails if another recorder is already installed.
    pub fn init(timers: &SchedulerCfg) -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();

        describe_gauge!("scheduler_interval_secs", "Configured timer period, by job.");
        for (job, period) in [
            ("ingest", timers.ingest_interval),
            ("digest", timers.digest_interval),
            ("cleanup", timers.cleanup_interval),
        ] {
            gauge!("scheduler_interval_secs", "job" => job).set(period.as_secs_f64());
        }

        Ok(Self { handle })
    }

    /// `/metrics` in the Prometheus text exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move {
                    (
                        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                        h.render(),
                    )
                        .into_response()
                }
            }),
        )
    }
}
