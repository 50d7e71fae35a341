//! Domain types: snapshots, quotes, token metadata, holders

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The wrapped native coin, preferred quote asset for every pair.
pub const NATIVE_MINT: &str = "So11111111111111111111111111111111111111112";

/// Canonical stable coin, second-choice quote asset.
pub const STABLE_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

/// The native mint always carries 9 decimals.
pub const NATIVE_DECIMALS: u8 = 9;

/// Circulating-supply constant used for the native mint, which has no
/// ordinary mint account to read a supply from.
pub const NATIVE_TOTAL_SUPPLY: f64 = 574_207_458.0;

/// Classic token program.
pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

/// Token-2022 program; mints owned by it share the classic base layout.
pub const TOKEN_2022_PROGRAM_ID: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";

/// Pub/sub channel every committed snapshot is announced on.
pub const PRICE_UPDATE_CHANNEL: &str = "price_update";

/// The unit of broadcast and history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriceSnapshot {
    pub mint: String,
    pub price_usd: f64,
    pub price_native: f64,
    pub market_cap: f64,
    pub total_supply: f64,
    pub as_of: DateTime<Utc>,
}

/// A priced market candidate produced by a quote source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub mint: String,
    pub price_usd: f64,
    pub price_native: f64,
    pub market_cap: f64,
    pub liquidity_usd: f64,
    pub volume_24h: f64,
    pub venue_id: String,
    pub pair_id: String,
    pub as_of: DateTime<Utc>,
}

/// Token metadata; name/symbol may be unavailable for young mints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub mint: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: u8,
    pub total_supply: f64,
}

/// Holder stake computed on demand from the chain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderBalance {
    pub owner: String,
    pub balance: f64,
    pub share_pct: f64,
}

/// Raw token supply read
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TokenSupply {
    pub raw: u64,
    pub decimals: u8,
}

impl TokenSupply {
    /// Supply in UI units.
    pub fn ui_amount(&self) -> f64 {
        self.raw as f64 / 10f64.powi(self.decimals as i32)
    }
}

/// History query window; controls the range start, not bucketisation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    OneMinute,
    FiveMinutes,
    OneHour,
}

impl Window {
    pub fn as_secs(&self) -> i64 {
        match self {
            Window::OneMinute => 60,
            Window::FiveMinutes => 300,
            Window::OneHour => 3600,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Window::OneMinute => "1m",
            Window::FiveMinutes => "5m",
            Window::OneHour => "1h",
        }
    }
}

impl Default for Window {
    fn default() -> Self {
        Window::OneHour
    }
}

impl FromStr for Window {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Window::OneMinute),
            "5m" => Ok(Window::FiveMinutes),
            "1h" => Ok(Window::OneHour),
            other => Err(format!("unsupported window '{}', expected 1m|5m|1h", other)),
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_parsing() {
        assert_eq!("1m".parse::<Window>().unwrap(), Window::OneMinute);
        assert_eq!("5m".parse::<Window>().unwrap(), Window::FiveMinutes);
        assert_eq!("1h".parse::<Window>().unwrap(), Window::OneHour);
        assert!("2h".parse::<Window>().is_err());
        assert!("".parse::<Window>().is_err());
    }

    #[test]
    fn window_range_secs() {
        assert_eq!(Window::OneMinute.as_secs(), 60);
        assert_eq!(Window::FiveMinutes.as_secs(), 300);
        assert_eq!(Window::OneHour.as_secs(), 3600);
    }

    #[test]
    fn supply_ui_amount() {
        let supply = TokenSupply {
            raw: 1_500_000_000,
            decimals: 6,
        };
        assert!((supply.ui_amount() - 1500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn snapshot_wire_format_is_camel_case() {
        let snap = PriceSnapshot {
            mint: NATIVE_MINT.to_string(),
            price_usd: 150.0,
            price_native: 1.0,
            market_cap: 0.0,
            total_supply: 0.0,
            as_of: Utc::now(),
        };
        let json = serde_json::to_value(&snap).unwrap();
        assert!(json.get("priceUsd").is_some());
        assert!(json.get("priceNative").is_some());
        assert!(json.get("marketCap").is_some());
    }
}
