// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod export;
pub mod ingest;
pub mod listing;
pub mod metrics;
pub mod pipeline;
pub mod query;
pub mod scoring;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::cache::{CacheEntry, CacheKey, ResultCache};
pub use crate::config::AggregatorConfig;
pub use crate::error::{MalformedListing, PipelineError, SourceError};
pub use crate::ingest::{FetchContext, RawListing, RawPayload, SourceAdapter};
pub use crate::listing::{Listing, MergedListing, PropertyType, TimeOnMarket};
pub use crate::pipeline::{AggregationPipeline, PipelineResult, PipelineSettings, RunOptions};
pub use crate::query::{Query, TransactionType};

/// Router over a ready pipeline, without the `/metrics` endpoint.
pub fn app_with(pipeline: AggregationPipeline) -> axum::Router {
    create_router(AppState::new(pipeline))
}

/// Router built from `AggregatorConfig::load_default()`.
pub fn app() -> anyhow::Result<axum::Router> {
    let cfg = AggregatorConfig::load_default()?;
    Ok(app_with(cfg.build_pipeline()))
}
