// tests/dedup_order.rs
//
// Merge output must not depend on the order listings arrive in.
// Inputs are shuffled with a seeded RNG so failures are reproducible.

use chrono::{Duration, TimeZone, Utc};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::collections::BTreeSet;

use property_aggregator::ingest::types::GenericPayload;
use property_aggregator::ingest::{DedupParams, Deduplicator, Normalizer};
use property_aggregator::{Listing, RawListing, RawPayload};

fn raw(source: &str, lid: &str, addr: &str, price: &str, beds: &str, hour: i64) -> RawListing {
    RawListing {
        source_id: source.into(),
        source_listing_id: lid.into(),
        observed_at: Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap() + Duration::hours(hour),
        payload: RawPayload::Generic(GenericPayload {
            address: Some(addr.into()),
            price: Some(price.into()),
            bedrooms: Some(beds.into()),
            property_type: Some("Flat".into()),
            time_on_market: Some(format!("{} days", hour + 1)),
        }),
    }
}

fn corpus() -> Vec<Listing> {
    let raws = vec![
        raw("rightmove", "r1", "6 Conisborough Crescent", "£390,000", "3", 1),
        raw("zoopla", "z1", "6 Conisborough Cres.", "392000", "3", 2),
        raw("onthemarket", "o1", "6 Conisborough Crescent, ", "£389,500", "3", 3),
        raw("rightmove", "r2", "24 Conisborough Crescent", "£508,000", "3", 1),
        raw("zoopla", "z2", "24 Conisbrough Crescent", "505000", "3", 5),
        // same street, different house number: must stay apart
        raw("zoopla", "z3", "26 Conisborough Crescent", "508000", "3", 4),
        raw("rightmove", "r3", "15 Oak Tree Lane", "£675,000", "4", 2),
        raw("onthemarket", "o2", "42 Garden View Road", "£425,000", "2", 6),
        raw("zoopla", "z4", "42 Garden View Rd", "425000", "2", 7),
        // chain: 10 Elm Grove ~ (same key) ~ 10 Elms Grove, though the ends differ in price
        raw("rightmove", "r4", "10 Elm Grove", "£100,000", "1", 1),
        raw("zoopla", "z5", "10 Elm Grove", "150000", "1", 2),
        raw("onthemarket", "o3", "10 Elms Grove", "£150,500", "1", 3),
    ];
    let (listings, dropped) = Normalizer::new().normalize_all(raws);
    assert_eq!(dropped, 0);
    listings
}

fn addresses(out: &[Listing]) -> Vec<(String, BTreeSet<String>)> {
    out.iter()
        .map(|l| (l.address_key.clone(), l.sources.clone()))
        .collect()
}

#[test]
fn merge_is_independent_of_input_order() {
    let dedup = Deduplicator::new(DedupParams::default());
    let baseline = dedup.merge(corpus());

    let mut rng = StdRng::seed_from_u64(0x5E6_2500);
    for round in 0..50 {
        let mut shuffled = corpus();
        shuffled.shuffle(&mut rng);
        let merged = dedup.merge(shuffled);
        assert_eq!(merged, baseline, "round {round} differs");
    }
}

#[test]
fn clusters_match_expected_properties() {
    let dedup = Deduplicator::new(DedupParams::default());
    let out = dedup.merge(corpus());
    assert_eq!(out.len(), 6, "{:#?}", addresses(&out));

    let by_sources: Vec<usize> = {
        let mut v: Vec<usize> = out.iter().map(|l| l.sources.len()).collect();
        v.sort_unstable();
        v
    };
    // 6 Conisborough (3), 24 Conisborough (2), 42 Garden View (2), Elm Grove chain (3),
    // 26 Conisborough (1), Oak Tree Lane (1)
    assert_eq!(by_sources, vec![1, 1, 2, 2, 3, 3]);

    let no26 = out
        .iter()
        .find(|l| l.address.starts_with("26 "))
        .expect("26 kept separately");
    assert_eq!(no26.sources.len(), 1);
}

#[test]
fn merged_fields_follow_the_merge_policy() {
    let dedup = Deduplicator::new(DedupParams::default());
    let out = dedup.merge(corpus());
    let six = out
        .iter()
        .find(|l| l.address_key.starts_with("6 CONISBOROUGH"))
        .expect("6 Conisborough present");

    // most recent observation (onthemarket, hour 3) sets the price
    assert_eq!(six.price, 389_500);
    // longest advertised span wins
    assert_eq!(six.time_on_market.as_ref().map(|t| t.days), Some(4));
    assert_eq!(six.ai_score, 0.0);
}

#[test]
fn merging_twice_changes_nothing() {
    let dedup = Deduplicator::new(DedupParams::default());
    let once = dedup.merge(corpus());
    let twice = dedup.merge(once.clone());
    assert_eq!(once, twice);
}
