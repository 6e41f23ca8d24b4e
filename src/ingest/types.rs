// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;
use crate::query::Query;

/// Raw record as handed over by a source adapter. Opaque to everything but the normalizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawListing {
    pub source_id: String,
    pub source_listing_id: String,
    /// When the adapter saw this record; defaults to "now" if a fixture omits it.
    #[serde(default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
    pub payload: RawPayload,
}

/// Source vocabularies. One variant per payload shape the normalizer knows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum RawPayload {
    Rightmove(RightmovePayload),
    Zoopla(ZooplaPayload),
    Generic(GenericPayload),
}

/// e.g. `{"display_address": "6 Conisborough Crescent, SE6", "price": "£390,000",
/// "bedrooms": 3, "property_sub_type": "Terraced", "added_or_reduced": "Added on 03/10/2026"}`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RightmovePayload {
    pub display_address: Option<String>,
    pub price: Option<String>,
    pub bedrooms: Option<u32>,
    pub property_sub_type: Option<String>,
    pub added_or_reduced: Option<String>,
}

/// e.g. `{"address": "24 Conisborough Cres", "price": "508000", "num_bedrooms": "3",
/// "property_type": "semi_detached_house", "first_published": "Listed 1 month ago"}`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ZooplaPayload {
    pub address: Option<String>,
    pub price: Option<String>,
    pub num_bedrooms: Option<String>,
    pub property_type: Option<String>,
    pub first_published: Option<String>,
}

/// Free-form shape for smaller portals and agent feeds.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GenericPayload {
    pub address: Option<String>,
    pub price: Option<String>,
    pub bedrooms: Option<String>,
    pub property_type: Option<String>,
    pub time_on_market: Option<String>,
}

/// Deadline and cancellation handed to every adapter call.
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub deadline: Instant,
    pub cancel: CancellationToken,
}

impl FetchContext {
    pub fn remaining(&self) -> std::time::Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Contract for external listing sources. Implementations live outside the core
/// (HTTP/HTML fetchers); the pipeline only relies on this trait.
///
/// Adapters should stop work once `ctx.cancel` fires or `ctx.deadline` passes.
/// The pipeline enforces both regardless.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch(&self, query: &Query, ctx: FetchContext)
        -> Result<Vec<RawListing>, SourceError>;

    /// Stable source id, e.g. "rightmove".
    fn name(&self) -> &str;
}
