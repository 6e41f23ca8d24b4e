// tests/fixture_e2e.rs
//
// Full run over the bundled config + fixture files (three portals, SE6).

use std::path::Path;

use property_aggregator::{AggregatorConfig, Query, RunOptions, TransactionType};

fn bundled() -> AggregatorConfig {
    AggregatorConfig::load_from(Path::new("config/aggregator.toml")).expect("bundled config")
}

#[test]
fn bundled_config_lists_three_sources() {
    let cfg = bundled();
    let ids: Vec<&str> = cfg.sources.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["rightmove", "zoopla", "onthemarket"]);
}

#[tokio::test]
async fn se6_sale_merges_portals_and_drops_unpriced() {
    let pipeline = bundled().build_pipeline();
    let q = Query::new("SE6 2SP", TransactionType::Sale).unwrap();
    let res = pipeline.run(&q, RunOptions::default()).await.unwrap();

    assert!(!res.partial, "{:?}", res.source_errors);
    // "POA" on zoopla has no price
    assert_eq!(res.dropped_malformed, 1);
    assert_eq!(res.listings.len(), 7);

    let six = res
        .listings
        .iter()
        .find(|l| l.address == "6 Conisborough Crescent")
        .expect("6 Conisborough Crescent");
    assert_eq!(six.sources.len(), 2);
    assert_eq!(six.price, 390_000);

    let twenty_four = res
        .listings
        .iter()
        .find(|l| l.address_key.starts_with("24 "))
        .expect("24 Conisborough Crescent");
    assert_eq!(twenty_four.sources.len(), 2);
    // zoopla observed later in the day
    assert_eq!(twenty_four.price, 505_000);

    for w in res.listings.windows(2) {
        assert!(w[0].ai_score >= w[1].ai_score);
    }
}

#[tokio::test]
async fn se6_rent_converts_weekly_price() {
    let pipeline = bundled().build_pipeline();
    let res = pipeline
        .run_query("se6", "For Rent", RunOptions::default())
        .await
        .unwrap();
    assert_eq!(res.listings.len(), 1);
    assert_eq!(res.listings[0].price, 1_842);
}

#[tokio::test]
async fn unknown_area_is_empty_but_complete() {
    let pipeline = bundled().build_pipeline();
    let res = pipeline
        .run_query("N1 9GU", "Sale", RunOptions::default())
        .await
        .unwrap();
    assert!(res.listings.is_empty());
    assert!(!res.partial);
}
