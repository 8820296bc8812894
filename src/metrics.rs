// src/metrics.rs
//! Prometheus exporter wiring: recorder install, static configuration gauges,
//! and the `/metrics` route.

use axum::{routing::get, Router};
use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::Settings;
use crate::pipeline::ensure_metrics_described;

pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder, register all metric descriptions, and
    /// publish the configuration gauges dashboards annotate rates with.
    pub fn init(settings: &Settings) -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("prometheus: install recorder");

        ensure_metrics_described();
        publish_config_gauges(settings);

        Self { handle }
    }

    /// Current exposition snapshot; what `/metrics` serves.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Router exposing `/metrics` in the Prometheus exposition format.
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

/// Static gauges for the knobs that shape the duplicate rate and cache hit
/// rates, so a config change shows up next to the rates it moves.
fn publish_config_gauges(settings: &Settings) {
    gauge!("dedup_similarity_threshold").set(settings.dedup_threshold as f64);
    gauge!("embed_cache_capacity").set(settings.embed_cache_capacity as f64);
    gauge!("query_cache_capacity").set(settings.query_cache_capacity as f64);
}
