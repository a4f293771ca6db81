use axum::{routing::get, Router};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static DESCRIBED: OnceCell<()> = OnceCell::new();

/// Register metric descriptions once per process. Safe to call from hot paths.
pub(crate) fn describe_metrics() {
    DESCRIBED.get_or_init(|| {
        describe_counter!(
            "analytics_cycles_total",
            "Analysis cycles finished, labelled by outcome"
        );
        describe_counter!(
            "analytics_initial_runs_total",
            "Initial insight generations finished, labelled by outcome"
        );
        describe_counter!(
            "analytics_llm_attempts_total",
            "Model calls, labelled by result"
        );
        describe_counter!(
            "analytics_profile_writes_total",
            "Customer insight profiles written together with their history"
        );
        describe_histogram!(
            "analytics_cycle_ms",
            Unit::Milliseconds,
            "Wall time of one analysis cycle or initial generation"
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder. Fails if another recorder is already installed.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
        describe_metrics();
        Ok(Self { handle })
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
