//! Basic functionality tests: key conventions, identifiers, wire formats

use anyhow::Result;
use chrono::Utc;
use mintpulse::cache::keys;
use mintpulse::core::{PriceSnapshot, Window, NATIVE_MINT};
use mintpulse::hub::frame;
use mintpulse::scheduler::{job_id_for, mint_of};
use serde_json::json;

#[test]
fn cache_keys_follow_conventions() {
    assert_eq!(keys::validation("M"), "validation:M");
    assert_eq!(keys::invalid_token("M"), "invalid_token:M");
    assert_eq!(keys::token_info("M"), "token_info:M");
    assert_eq!(keys::token_supply("M"), "token_supply:M");
    assert_eq!(keys::token_decimals("M"), "token_decimals:M");
    assert_eq!(keys::token_price_native("M"), "token_price_native:M");
    assert_eq!(keys::quote("aggregator", "M"), "quote:aggregator:M");
    assert_eq!(keys::NATIVE_USD_PRICE, "native_usd_price");
    assert_eq!(keys::pool("A", "B"), "pool:A:B");
    assert_eq!(keys::rugcheck("M"), "rugcheck:M");
    assert_eq!(keys::top_holders("M", 25), "top_holders:M:25");
}

#[test]
fn job_ids_are_prefixed_by_mint() -> Result<()> {
    let id = job_id_for(NATIVE_MINT);
    assert_eq!(id, format!("price-{}", NATIVE_MINT));
    assert_eq!(mint_of(&id), Some(NATIVE_MINT));
    assert_eq!(mint_of("validation:x"), None);
    Ok(())
}

#[test]
fn windows_parse_and_render() {
    for (raw, secs) in [("1m", 60), ("5m", 300), ("1h", 3600)] {
        let window: Window = raw.parse().unwrap();
        assert_eq!(window.as_secs(), secs);
        assert_eq!(window.to_string(), raw);
    }
    assert!("24h".parse::<Window>().is_err());
}

#[test]
fn snapshots_round_trip_in_camel_case() -> Result<()> {
    let snapshot = PriceSnapshot {
        mint: NATIVE_MINT.to_string(),
        price_usd: 151.25,
        price_native: 1.0,
        market_cap: 1_000_000.0,
        total_supply: 574_207_458.0,
        as_of: Utc::now(),
    };

    let wire = serde_json::to_string(&snapshot)?;
    assert!(wire.contains("\"priceUsd\""));
    assert!(wire.contains("\"priceNative\""));
    assert!(wire.contains("\"marketCap\""));
    assert!(wire.contains("\"totalSupply\""));
    assert!(wire.contains("\"asOf\""));

    let back: PriceSnapshot = serde_json::from_str(&wire)?;
    assert_eq!(back, snapshot);
    Ok(())
}

#[test]
fn event_frames_use_the_envelope() -> Result<()> {
    let message = frame(
        "subscription_error",
        json!({ "mint": "BAD", "message": "not base58", "code": "INVALID_TOKEN_MINT" }),
    );
    let parsed: serde_json::Value = serde_json::from_str(&message)?;
    assert_eq!(parsed["event"], "subscription_error");
    assert_eq!(parsed["data"]["code"], "INVALID_TOKEN_MINT");
    Ok(())
}
