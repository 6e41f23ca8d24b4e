//! Property Aggregator — Binary Entrypoint
//! Loads config, builds fixture-backed sources and serves the search/export API.
//!
//! See `README.md` for quickstart.

use property_aggregator::{api, config::AggregatorConfig, metrics::Metrics};
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEV_LOG_ENV: &str = "AGGREGATOR_DEV_LOG";
const DEFAULT_LOG_FILTER: &str = "pipeline=info,cache=debug,warn";

/// Local runs: debug builds, or a Shuttle env named local/development/dev.
fn running_locally() -> bool {
    if cfg!(debug_assertions) {
        return true;
    }
    let env = std::env::var("SHUTTLE_ENV").unwrap_or_default();
    matches!(
        env.to_ascii_lowercase().as_str(),
        "local" | "development" | "dev"
    )
}

/// Compact pipeline/cache logs, only when running locally with `AGGREGATOR_DEV_LOG=1`.
/// `RUST_LOG` overrides the default filter.
fn enable_dev_tracing() {
    let requested = std::env::var(DEV_LOG_ENV).is_ok_and(|v| v == "1");
    if !requested || !running_locally() {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Optional local overrides (AGGREGATOR_* variables).
    let _ = dotenvy::dotenv();

    enable_dev_tracing();

    let cfg = AggregatorConfig::load_default()?;
    tracing::info!(
        sources = cfg.sources.len(),
        timeout_ms = cfg.pipeline.adapter_timeout_ms,
        cache_ttl_secs = cfg.cache.ttl_secs,
        "aggregator config loaded"
    );

    let metrics = Metrics::init(cfg.cache.ttl_secs.saturating_mul(1_000))?;
    let state = api::AppState::new(cfg.build_pipeline());
    let router = api::create_router(state).merge(metrics.router());

    Ok(router.into())
}
