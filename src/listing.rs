// src/listing.rs
//! Canonical listing shape shared by every stage after normalization.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Shared property-type vocabulary. Source terms that do not map pass through as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub enum PropertyType {
    Detached,
    SemiDetached,
    Terraced,
    Flat,
    Bungalow,
    Maisonette,
    Other(String),
}

impl PropertyType {
    pub fn label(&self) -> &str {
        match self {
            Self::Detached => "Detached",
            Self::SemiDetached => "Semi-detached",
            Self::Terraced => "Terraced",
            Self::Flat => "Flat",
            Self::Bungalow => "Bungalow",
            Self::Maisonette => "Maisonette",
            Self::Other(s) => s.as_str(),
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<PropertyType> for String {
    fn from(p: PropertyType) -> Self {
        p.label().to_string()
    }
}

/// How long a property has been advertised, at day granularity.
/// `display` keeps the phrase the source used ("2 weeks", "Added yesterday").
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeOnMarket {
    pub days: u32,
    pub display: String,
}

impl TimeOnMarket {
    pub fn new(days: u32, display: impl Into<String>) -> Self {
        Self {
            days,
            display: display.into(),
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.days))
    }
}

/// One property advertisement after normalization.
///
/// Freshly normalized listings have exactly one source. After deduplication a
/// listing may carry several; see [`MergedListing`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listing {
    /// Stable hash of `source_id:source_listing_id` (smallest member id once merged).
    pub id: String,
    /// Display form of the address.
    pub address: String,
    /// Comparison key: uppercase, punctuation stripped, whitespace collapsed.
    #[serde(skip)]
    pub address_key: String,
    /// Whole pounds (sale price, or rent per calendar month).
    pub price: u64,
    pub bedrooms: Option<u32>,
    pub property_type: Option<PropertyType>,
    pub time_on_market: Option<TimeOnMarket>,
    pub sources: BTreeSet<String>,
    /// Investment attractiveness in [0, 10]; zero until scored.
    pub ai_score: f64,
    /// When the (most recent) source observation was taken.
    pub observed_at: DateTime<Utc>,
    /// Source listing id of the observation this listing was built from.
    /// Used as the last deterministic tie-break when merging.
    #[serde(skip)]
    pub source_listing_id: String,
}

/// A listing consolidated from one or more source listings believed to be the same property.
pub type MergedListing = Listing;

impl Listing {
    /// Price per bedroom; studios and unknown counts are treated as one room.
    pub fn price_per_bedroom(&self) -> f64 {
        let rooms = self.bedrooms.unwrap_or(1).max(1);
        self.price as f64 / f64::from(rooms)
    }

    /// Lexicographically smallest source id.
    pub fn primary_source(&self) -> &str {
        self.sources.iter().next().map(String::as_str).unwrap_or("")
    }
}
