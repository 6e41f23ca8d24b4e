// src/ingest/dedup.rs
//! Cross-source deduplication.
//!
//! Two listings are merge candidates when
//! - they share an id (same source record seen twice), or
//! - their address keys are identical, or
//! - (fallback) their address keys are within `max_edit_distance` (exclusive),
//!   bedrooms are known and equal, prices are within `price_tolerance`, and the
//!   numeric tokens of the address (house/flat numbers) agree.
//!
//! Clusters are the connected components of the candidate graph, so the outcome
//! does not depend on the order adapters delivered their listings in.
//!
//! Merge policy inside a cluster ("first seen" = earliest `observed_at`, then
//! smallest source id, then smallest source listing id):
//! - price: most recently observed member, ties → smallest source id
//! - bedrooms / property type: first seen non-empty value
//! - time on market: the longest
//! - sources: union; id: smallest member id; address: first seen

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use strsim::levenshtein;

use crate::listing::{Listing, MergedListing, TimeOnMarket};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupParams {
    /// Address keys must be strictly closer than this edit distance.
    pub max_edit_distance: usize,
    /// Maximum relative price difference, e.g. 0.02 for 2%.
    pub price_tolerance: f64,
}

impl Default for DedupParams {
    fn default() -> Self {
        Self {
            max_edit_distance: 3,
            price_tolerance: 0.02,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    params: DedupParams,
}

impl Deduplicator {
    pub fn new(params: DedupParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DedupParams {
        &self.params
    }

    /// Whether `a` and `b` likely describe the same property.
    pub fn is_candidate(&self, a: &Listing, b: &Listing) -> bool {
        if a.id == b.id || a.address_key == b.address_key {
            return true;
        }
        match (a.bedrooms, b.bedrooms) {
            (Some(x), Some(y)) if x == y => {}
            _ => return false,
        }
        if !within_tolerance(a.price, b.price, self.params.price_tolerance) {
            return false;
        }
        if !numeric_tokens(&a.address_key).eq(numeric_tokens(&b.address_key)) {
            return false;
        }
        levenshtein(&a.address_key, &b.address_key) < self.params.max_edit_distance
    }

    /// Merge listings that describe the same property. Output is ordered by id.
    pub fn merge(&self, mut listings: Vec<Listing>) -> Vec<MergedListing> {
        let total = listings.len();
        listings.sort_by(first_seen_order);

        let mut sets = DisjointSet::new(listings.len());
        for i in 0..listings.len() {
            for j in (i + 1)..listings.len() {
                if self.is_candidate(&listings[i], &listings[j]) {
                    sets.union(i, j);
                }
            }
        }

        // Members stay in first-seen order because indices are visited ascending.
        let mut clusters: BTreeMap<usize, Vec<Listing>> = BTreeMap::new();
        for (idx, listing) in listings.into_iter().enumerate() {
            clusters.entry(sets.find(idx)).or_default().push(listing);
        }

        let mut out: Vec<MergedListing> =
            clusters.into_values().filter_map(merge_cluster).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));

        tracing::debug!(
            target: "dedup",
            input = total,
            output = out.len(),
            merged = total - out.len(),
            "deduplicated listings"
        );
        out
    }
}

/// Earliest observation first; every field that can differ takes part so the
/// order is total.
fn first_seen_order(a: &Listing, b: &Listing) -> Ordering {
    a.observed_at
        .cmp(&b.observed_at)
        .then_with(|| a.primary_source().cmp(b.primary_source()))
        .then_with(|| a.source_listing_id.cmp(&b.source_listing_id))
        .then_with(|| a.id.cmp(&b.id))
        .then_with(|| a.price.cmp(&b.price))
        .then_with(|| a.address_key.cmp(&b.address_key))
        .then_with(|| a.address.cmp(&b.address))
        .then_with(|| a.bedrooms.cmp(&b.bedrooms))
        .then_with(|| a.property_type.cmp(&b.property_type))
}

/// `members` must be in first-seen order. Returns `None` only for an empty cluster.
fn merge_cluster(members: Vec<Listing>) -> Option<MergedListing> {
    let price = members
        .iter()
        .max_by(|a, b| {
            a.observed_at
                .cmp(&b.observed_at)
                .then_with(|| b.primary_source().cmp(a.primary_source()))
                .then_with(|| b.source_listing_id.cmp(&a.source_listing_id))
        })
        .map(|l| l.price);
    let bedrooms = members.iter().find_map(|l| l.bedrooms);
    let property_type = members.iter().find_map(|l| l.property_type.clone());
    let time_on_market = members
        .iter()
        .filter_map(|l| l.time_on_market.as_ref())
        .fold(None, |best: Option<&TimeOnMarket>, t| match best {
            Some(b) if b.days >= t.days => Some(b),
            _ => Some(t),
        })
        .cloned();
    let observed_at = members.iter().map(|l| l.observed_at).max();
    let id = members.iter().map(|l| l.id.clone()).min();

    let mut iter = members.into_iter();
    let mut merged = iter.next()?;
    for other in iter {
        merged.sources.extend(other.sources);
    }

    merged.price = price.unwrap_or(merged.price);
    merged.bedrooms = bedrooms;
    merged.property_type = property_type;
    merged.time_on_market = time_on_market;
    merged.observed_at = observed_at.unwrap_or(merged.observed_at);
    if let Some(id) = id {
        merged.id = id;
    }
    merged.ai_score = 0.0;
    Some(merged)
}

fn within_tolerance(a: u64, b: u64, tolerance: f64) -> bool {
    let hi = a.max(b);
    if hi == 0 {
        return true;
    }
    (a.abs_diff(b) as f64) / (hi as f64) <= tolerance
}

fn numeric_tokens(key: &str) -> impl Iterator<Item = &str> + '_ {
    key.split(' ')
        .filter(|t| t.chars().any(|c| c.is_ascii_digit()))
}

/// Union-find over listing indices.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Smaller index as root keeps cluster keys stable.
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}
