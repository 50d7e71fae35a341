//! Risk taxonomy derivation tests

use mintpulse::risk::{derive_overall, summarise, RiskItem, RiskLevel, RiskSeverity};

fn item(name: &str, level: RiskSeverity) -> RiskItem {
    RiskItem {
        name: name.to_string(),
        description: String::new(),
        score: 10.0,
        level,
    }
}

#[test]
fn overall_boundaries() {
    assert_eq!(derive_overall(false, 0), RiskLevel::High);
    assert_eq!(derive_overall(false, 20), RiskLevel::High);
    assert_eq!(derive_overall(false, 21), RiskLevel::Medium);
    assert_eq!(derive_overall(false, 50), RiskLevel::Medium);
    assert_eq!(derive_overall(false, 51), RiskLevel::Low);
    assert_eq!(derive_overall(false, 100), RiskLevel::Low);
}

#[test]
fn rugged_always_critical() {
    for score in [0, 20, 50, 100] {
        assert_eq!(derive_overall(true, score), RiskLevel::Critical);
    }
}

#[test]
fn summary_counts_by_level() {
    let risks = vec![
        item("mutable metadata", RiskSeverity::Info),
        item("low liquidity", RiskSeverity::Warn),
        item("top holder concentration", RiskSeverity::Warn),
        item("freeze authority", RiskSeverity::Danger),
    ];

    let summary = summarise(&risks);
    assert_eq!(summary.total, 4);
    assert_eq!(summary.high, 1);
    assert_eq!(summary.medium, 2);
    assert_eq!(summary.low, 1);
}

#[test]
fn empty_report_summarises_to_zero() {
    let summary = summarise(&[]);
    assert_eq!(summary.total, 0);
    assert_eq!(summary.high + summary.medium + summary.low, 0);
}

#[test]
fn levels_serialize_lowercase() {
    assert_eq!(
        serde_json::to_string(&RiskLevel::Critical).unwrap(),
        "\"critical\""
    );
    assert_eq!(
        serde_json::to_string(&RiskSeverity::Danger).unwrap(),
        "\"danger\""
    );
}
