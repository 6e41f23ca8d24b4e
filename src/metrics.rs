//! Prometheus exposition for the aggregator.
//!
//! Series are emitted where the work happens (`pipeline`, `cache`, fixture
//! sources); this module only owns the recorder and the scrape route.

use anyhow::Context;
use axum::{routing::get, Router};
use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the process-wide recorder. Fails if one is already installed.
    ///
    /// `result_cache_ttl_ms` is published once here since the TTL is fixed per process.
    pub fn init(cache_ttl_ms: u64) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;

        gauge!("result_cache_ttl_ms").set(cache_ttl_ms as f64);

        Ok(Self { handle })
    }

    /// `GET /metrics`, merged into the API router by the binary.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        )
    }
}
