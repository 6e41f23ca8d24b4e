//! Investment attractiveness scoring.
//!
//! Four normalized components in [0,1]:
//! - `value`          : local baseline price-per-bedroom vs. this listing's
//! - `freshness`      : decays with time on market (never increases)
//! - `type`           : property-type desirability
//! - `corroboration`  : how many sources advertise the same property
//!
//! Score = 10 × weighted mean of the components, clamped to [0,10] and rounded to
//! one decimal. Pure function of the listing fields and the configured policy.

use serde::{Deserialize, Serialize};

use crate::listing::{Listing, MergedListing, PropertyType};
use crate::query::TransactionType;

/// Freshness used when a listing does not say how long it has been advertised.
const UNKNOWN_FRESHNESS: f64 = 0.5;

/// Scoring policy. Deserialized from the `[scoring]` config section.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub w_value: f64,
    pub w_freshness: f64,
    pub w_type: f64,
    pub w_corroboration: f64,
    /// Typical asking price per bedroom for sales (pounds).
    pub sale_baseline_per_bedroom: f64,
    /// Typical monthly rent per bedroom (pounds).
    pub rent_baseline_per_bedroom: f64,
    /// Days on market at which freshness halves.
    pub freshness_half_life_days: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            w_value: 0.5,
            w_freshness: 0.25,
            w_type: 0.15,
            w_corroboration: 0.10,
            sale_baseline_per_bedroom: 150_000.0,
            rent_baseline_per_bedroom: 650.0,
            freshness_half_life_days: 30.0,
        }
    }
}

impl ScoringWeights {
    /// Replace negative or non-finite values with defaults.
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        fn pick(v: f64, fallback: f64) -> f64 {
            if v.is_finite() && v >= 0.0 {
                v
            } else {
                fallback
            }
        }
        fn pick_positive(v: f64, fallback: f64) -> f64 {
            if v.is_finite() && v > 0.0 {
                v
            } else {
                fallback
            }
        }
        Self {
            w_value: pick(self.w_value, d.w_value),
            w_freshness: pick(self.w_freshness, d.w_freshness),
            w_type: pick(self.w_type, d.w_type),
            w_corroboration: pick(self.w_corroboration, d.w_corroboration),
            sale_baseline_per_bedroom: pick_positive(
                self.sale_baseline_per_bedroom,
                d.sale_baseline_per_bedroom,
            ),
            rent_baseline_per_bedroom: pick_positive(
                self.rent_baseline_per_bedroom,
                d.rent_baseline_per_bedroom,
            ),
            freshness_half_life_days: pick_positive(
                self.freshness_half_life_days,
                d.freshness_half_life_days,
            ),
        }
    }
}

/// Scorer bound to one transaction type (the baseline differs for sales and rents).
#[derive(Clone, Copy, Debug)]
pub struct Scorer {
    weights: ScoringWeights,
    baseline: f64,
}

impl Scorer {
    pub fn new(weights: ScoringWeights, transaction_type: TransactionType) -> Self {
        let weights = weights.sanitized();
        let baseline = match transaction_type {
            TransactionType::Sale => weights.sale_baseline_per_bedroom,
            TransactionType::Rent => weights.rent_baseline_per_bedroom,
        };
        Self { weights, baseline }
    }

    pub fn score(&self, listing: &MergedListing) -> f64 {
        let w = &self.weights;
        let raw = value_component(listing, self.baseline) * w.w_value
            + freshness_component(listing, w.freshness_half_life_days) * w.w_freshness
            + type_component(listing.property_type.as_ref()) * w.w_type
            + corroboration_component(listing) * w.w_corroboration;

        let denom = (w.w_value + w.w_freshness + w.w_type + w.w_corroboration).max(1e-6);
        let score = (10.0 * raw / denom).clamp(0.0, 10.0);
        (score * 10.0).round() / 10.0
    }

    /// Set `ai_score` on every listing.
    pub fn annotate(&self, listings: Vec<MergedListing>) -> Vec<MergedListing> {
        listings
            .into_iter()
            .map(|mut l| {
                l.ai_score = self.score(&l);
                l
            })
            .collect()
    }
}

/// 1.0 at half the baseline price per bedroom or cheaper, 0.5 at the baseline.
fn value_component(listing: &Listing, baseline: f64) -> f64 {
    let ppb = listing.price_per_bedroom();
    if ppb <= 0.0 {
        return 0.0;
    }
    (baseline / ppb / 2.0).clamp(0.0, 1.0)
}

fn freshness_component(listing: &Listing, half_life_days: f64) -> f64 {
    match &listing.time_on_market {
        Some(t) => 1.0 / (1.0 + f64::from(t.days) / half_life_days),
        None => UNKNOWN_FRESHNESS,
    }
}

fn type_component(property_type: Option<&PropertyType>) -> f64 {
    match property_type {
        Some(PropertyType::Detached) => 1.0,
        Some(PropertyType::SemiDetached) => 0.85,
        Some(PropertyType::Bungalow) => 0.8,
        Some(PropertyType::Terraced) => 0.75,
        Some(PropertyType::Maisonette) => 0.6,
        Some(PropertyType::Flat) => 0.6,
        Some(PropertyType::Other(_)) | None => 0.5,
    }
}

fn corroboration_component(listing: &Listing) -> f64 {
    (listing.sources.len().min(3) as f64) / 3.0
}
