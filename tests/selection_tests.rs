//! Pair-selection scenarios across mixed venue sets

use mintpulse::core::{NATIVE_MINT, STABLE_MINT};
use mintpulse::quotes::aggregator::{passes_filters, score_pair, select_best_pair, PairInfo};

fn pair(venue: &str, quote: &str) -> PairInfo {
    PairInfo {
        pair_id: format!("{}:{}", venue, quote),
        venue: venue.to_string(),
        quote_mint: quote.to_string(),
        price_usd: 0.001,
        price_native: Some(0.000005),
        liquidity_usd: 20_000.0,
        volume_24h: 10_000.0,
        txn_count_24h: 100,
        market_cap: 1_000_000.0,
        launch_label: false,
    }
}

#[test]
fn typical_mixed_set_picks_native_established_pair() {
    let pairs = vec![
        pair("orca", STABLE_MINT),
        pair("raydium", NATIVE_MINT),
        pair("somedex", NATIVE_MINT),
        pair("pumpswap", NATIVE_MINT),
    ];

    let best = select_best_pair(&pairs).unwrap();
    assert_eq!(best.venue, "raydium");
    assert_eq!(best.quote_mint, NATIVE_MINT);
}

#[test]
fn starved_launch_pairs_are_dropped_entirely() {
    let mut thin = pair("pumpswap", NATIVE_MINT);
    thin.liquidity_usd = 3_000.0;
    thin.volume_24h = 500.0;

    assert!(!passes_filters(&thin));
    assert!(select_best_pair(&[thin]).is_none());
}

#[test]
fn surviving_launch_pair_beats_nothing() {
    let mut active = pair("pumpswap", NATIVE_MINT);
    active.liquidity_usd = 8_000.0;
    active.volume_24h = 5_000.0;

    let best = select_best_pair(std::slice::from_ref(&active)).unwrap();
    assert_eq!(best.venue, "pumpswap");
}

#[test]
fn deep_unknown_venue_beats_shallow_launch_pair() {
    let mut launch = pair("moonshot", NATIVE_MINT);
    launch.liquidity_usd = 8_000.0;
    launch.volume_24h = 5_000.0;

    let mut unknown = pair("somedex", NATIVE_MINT);
    unknown.liquidity_usd = 8_000.0;
    unknown.volume_24h = 5_000.0;

    assert!(score_pair(&unknown) > score_pair(&launch));
    let pairs = vec![launch, unknown];
    assert_eq!(select_best_pair(&pairs).unwrap().venue, "somedex");
}

#[test]
fn stable_fallback_applies_before_exotic_quotes() {
    let exotic = pair("raydium", "ExoticQuoteMint111111111111111111111111111");
    let stable = pair("somedex", STABLE_MINT);

    let pairs = vec![exotic, stable];
    assert_eq!(select_best_pair(&pairs).unwrap().quote_mint, STABLE_MINT);
}

#[test]
fn exotic_quote_wins_only_when_alone() {
    let exotic = pair("raydium", "ExoticQuoteMint111111111111111111111111111");
    let best = select_best_pair(std::slice::from_ref(&exotic)).unwrap();
    assert_eq!(best.quote_mint, exotic.quote_mint);
}

#[test]
fn scoring_orders_by_depth_within_a_tier() {
    let mut shallow = pair("raydium", NATIVE_MINT);
    shallow.liquidity_usd = 1_000.0;
    shallow.volume_24h = 100.0;
    shallow.txn_count_24h = 1;

    let mut deep = pair("orca", NATIVE_MINT);
    deep.liquidity_usd = 500_000.0;
    deep.volume_24h = 250_000.0;
    deep.txn_count_24h = 900;

    let pairs = vec![shallow, deep];
    assert_eq!(select_best_pair(&pairs).unwrap().venue, "orca");
}

#[test]
fn zero_priced_pairs_never_pass() {
    let mut broken = pair("raydium", NATIVE_MINT);
    broken.price_usd = 0.0;
    assert!(!passes_filters(&broken));
}
