use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("alarm_cycles_started_total", "Fetch cycles started.");
        describe_counter!(
            "alarm_fetch_results_total",
            "Fetch results matched to the outstanding request, by code."
        );
        describe_counter!(
            "alarm_stale_results_total",
            "Fetch results dropped because their request id was not awaited."
        );
        describe_counter!("alarm_cycles_done_total", "Cycles that reached Done.");
        describe_counter!("alarm_cycles_failed_total", "Cycles that reached Failed.");
        describe_counter!(
            "alarm_match_batches_total",
            "Known-location match batches emitted, by kind."
        );
        describe_gauge!("alarm_last_done_ts", "Unix ts of the last completed cycle.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Recorder that is not installed globally; renders an empty exposition.
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: recorder.handle(),
        }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
