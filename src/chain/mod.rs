//! Chain adapter: mint validation, supply reads, AMM pool discovery, holders

pub mod rpc;

use crate::cache::{keys, RedisCache};
use crate::core::{
    HolderBalance, PulseError, PulseResult, TokenSupply, NATIVE_DECIMALS, NATIVE_MINT,
    NATIVE_TOTAL_SUPPLY, TOKEN_2022_PROGRAM_ID, TOKEN_PROGRAM_ID,
};
use rpc::LightRpcClient;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use spl_token::solana_program::program_pack::Pack;
use spl_token::state::Mint;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// AMM v4 liquidity-state program
pub const AMM_PROGRAM_ID: &str = "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8";

/// v4 liquidity state layout
pub const AMM_STATE_SIZE: usize = 752;
const BASE_DECIMAL_OFFSET: usize = 32;
const QUOTE_DECIMAL_OFFSET: usize = 40;
const BASE_VAULT_OFFSET: usize = 336;
const QUOTE_VAULT_OFFSET: usize = 368;
pub const BASE_MINT_OFFSET: usize = 400;
pub const QUOTE_MINT_OFFSET: usize = 432;

const SUPPLY_CACHE_TTL_SECS: u64 = 3600;
const POOL_CACHE_TTL_SECS: u64 = 300;
const MAX_DECIMALS: u8 = 18;

/// A discovered pool for a (token, quote) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolCandidate {
    pub pool_addr: String,
    pub base_mint: String,
    pub quote_mint: String,
}

/// Raw vault balances for one pool, resolved to the token's side
#[derive(Debug, Clone, Copy)]
pub struct PoolReserves {
    pub token_reserve_raw: u64,
    pub quote_reserve_raw: u64,
    pub token_decimals: u8,
    pub quote_decimals: u8,
}

impl PoolReserves {
    /// Quote units per token unit, from the reserve ratio.
    pub fn price_of_token(&self) -> f64 {
        let token = self.token_reserve_raw as f64 / 10f64.powi(self.token_decimals as i32);
        let quote = self.quote_reserve_raw as f64 / 10f64.powi(self.quote_decimals as i32);
        if token <= 0.0 {
            return 0.0;
        }
        quote / token
    }

    /// Reserve of the quote side in UI units; proxy for pool depth.
    pub fn quote_reserve_ui(&self) -> f64 {
        self.quote_reserve_raw as f64 / 10f64.powi(self.quote_decimals as i32)
    }
}

/// Fields of interest in a full v4 pool account
#[derive(Debug, Clone, PartialEq)]
pub struct PoolState {
    pub base_decimals: u8,
    pub quote_decimals: u8,
    pub base_vault: String,
    pub quote_vault: String,
    pub base_mint: String,
    pub quote_mint: String,
}

fn u64_at(data: &[u8], offset: usize) -> PulseResult<u64> {
    let bytes: [u8; 8] = data
        .get(offset..offset + 8)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| PulseError::ChainUnavailable("truncated pool account".into()))?;
    Ok(u64::from_le_bytes(bytes))
}

fn pubkey_at(data: &[u8], offset: usize) -> PulseResult<String> {
    let bytes = data
        .get(offset..offset + 32)
        .ok_or_else(|| PulseError::ChainUnavailable("truncated pool account".into()))?;
    Ok(bs58::encode(bytes).into_string())
}

/// Parse the vault/mint/decimal fields from a full v4 pool account
pub fn parse_pool_state(data: &[u8]) -> PulseResult<PoolState> {
    if data.len() < AMM_STATE_SIZE {
        return Err(PulseError::ChainUnavailable(format!(
            "pool account too small: {} bytes",
            data.len()
        )));
    }
    Ok(PoolState {
        base_decimals: u64_at(data, BASE_DECIMAL_OFFSET)? as u8,
        quote_decimals: u64_at(data, QUOTE_DECIMAL_OFFSET)? as u8,
        base_vault: pubkey_at(data, BASE_VAULT_OFFSET)?,
        quote_vault: pubkey_at(data, QUOTE_VAULT_OFFSET)?,
        base_mint: pubkey_at(data, BASE_MINT_OFFSET)?,
        quote_mint: pubkey_at(data, QUOTE_MINT_OFFSET)?,
    })
}

/// Parse the (base, quote) mint prefix returned by a sliced scan
fn parse_mint_pair(data: &[u8]) -> PulseResult<(String, String)> {
    if data.len() < 64 {
        return Err(PulseError::ChainUnavailable(
            "sliced pool prefix too small".into(),
        ));
    }
    Ok((pubkey_at(data, 0)?, pubkey_at(data, 32)?))
}

pub struct ChainAdapter {
    rpc: LightRpcClient,
    cache: Arc<RedisCache>,
}

impl ChainAdapter {
    pub fn new(endpoint: String, timeout: Duration, cache: Arc<RedisCache>) -> PulseResult<Self> {
        Ok(Self {
            rpc: LightRpcClient::new(endpoint, timeout)?,
            cache,
        })
    }

    /// Confirm a mint account exists, is owned by a token program, and has a
    /// positive supply with sane decimals.
    ///
    /// The native mint is accepted without a round-trip. Logical problems are
    /// `InvalidMint`; transport problems stay `ChainUnavailable` so transient
    /// outages never get a mint banned.
    pub async fn validate_mint(&self, mint: &str) -> PulseResult<()> {
        if mint == NATIVE_MINT {
            return Ok(());
        }

        if Pubkey::from_str(mint).is_err() {
            return Err(PulseError::invalid_mint("not a valid public key"));
        }

        let account = self
            .rpc
            .get_account_info(mint, None)
            .await?
            .ok_or_else(|| PulseError::invalid_mint("account does not exist"))?;

        if account.owner != TOKEN_PROGRAM_ID && account.owner != TOKEN_2022_PROGRAM_ID {
            return Err(PulseError::invalid_mint(format!(
                "owner {} is not a token program",
                account.owner
            )));
        }

        let data = account.decoded_data()?;
        if data.len() < Mint::LEN {
            return Err(PulseError::invalid_mint("account data too small for a mint"));
        }
        // Token-2022 mints append extensions; the base layout is identical.
        let state = Mint::unpack_from_slice(&data[..Mint::LEN])
            .map_err(|e| PulseError::invalid_mint(format!("unreadable mint state: {}", e)))?;

        if !state.is_initialized {
            return Err(PulseError::invalid_mint("mint is not initialized"));
        }
        if state.decimals > MAX_DECIMALS {
            return Err(PulseError::invalid_mint(format!(
                "decimals {} out of range",
                state.decimals
            )));
        }
        if state.supply == 0 {
            return Err(PulseError::invalid_mint("zero supply"));
        }

        Ok(())
    }

    /// Raw supply and decimals, cache-through.
    ///
    /// Decimals never change and are cached permanently; the raw supply is
    /// cached for an hour.
    pub async fn read_supply(&self, mint: &str) -> PulseResult<TokenSupply> {
        if mint == NATIVE_MINT {
            return Ok(TokenSupply {
                raw: (NATIVE_TOTAL_SUPPLY * 10f64.powi(NATIVE_DECIMALS as i32)) as u64,
                decimals: NATIVE_DECIMALS,
            });
        }

        let supply_key = keys::token_supply(mint);
        let decimals_key = keys::token_decimals(mint);

        let cached_supply = self.cache.get(&supply_key).await.unwrap_or(None);
        let cached_decimals = self.cache.get(&decimals_key).await.unwrap_or(None);
        if let (Some(raw), Some(decimals)) = (&cached_supply, &cached_decimals) {
            if let (Ok(raw), Ok(decimals)) = (raw.parse(), decimals.parse()) {
                crate::metrics::global()
                    .cache_hits
                    .with_label_values(&["supply"])
                    .inc();
                return Ok(TokenSupply { raw, decimals });
            }
        }
        crate::metrics::global()
            .cache_misses
            .with_label_values(&["supply"])
            .inc();

        let amount = self.rpc.get_token_supply(mint).await?;
        let raw: u64 = amount
            .amount
            .parse()
            .map_err(|_| PulseError::invalid_mint("unreadable supply"))?;
        let supply = TokenSupply {
            raw,
            decimals: amount.decimals,
        };

        if let Err(e) = self
            .cache
            .set_with_ttl(&supply_key, &raw.to_string(), SUPPLY_CACHE_TTL_SECS)
            .await
        {
            warn!(mint, error = %e, "failed to cache supply");
        }
        if let Err(e) = self
            .cache
            .set_permanent(&decimals_key, &supply.decimals.to_string())
            .await
        {
            warn!(mint, error = %e, "failed to cache decimals");
        }

        Ok(supply)
    }

    /// All pools whose (base, quote) set equals `{a, b}`.
    ///
    /// Two sliced scans, one per orientation; only the 64-byte mint prefix of
    /// each candidate is ever fetched.
    pub async fn find_pools_for_pair(&self, a: &str, b: &str) -> PulseResult<Vec<PoolCandidate>> {
        let cache_key = keys::pool(a, b);
        if let Ok(Some(cached)) = self.cache.get_json::<Vec<PoolCandidate>>(&cache_key).await {
            crate::metrics::global()
                .cache_hits
                .with_label_values(&["pool"])
                .inc();
            return Ok(cached);
        }
        crate::metrics::global()
            .cache_misses
            .with_label_values(&["pool"])
            .inc();

        let slice = Some((BASE_MINT_OFFSET, 64));
        let (forward, reverse) = tokio::join!(
            self.rpc
                .get_program_accounts(AMM_PROGRAM_ID, AMM_STATE_SIZE, BASE_MINT_OFFSET, a, slice),
            self.rpc
                .get_program_accounts(AMM_PROGRAM_ID, AMM_STATE_SIZE, BASE_MINT_OFFSET, b, slice),
        );

        let mut pools = Vec::new();
        for (scan, wanted_quote) in [(forward?, b), (reverse?, a)] {
            for keyed in scan {
                let data = keyed.account.decoded_data()?;
                let (base_mint, quote_mint) = parse_mint_pair(&data)?;
                if quote_mint == wanted_quote {
                    pools.push(PoolCandidate {
                        pool_addr: keyed.pubkey,
                        base_mint,
                        quote_mint,
                    });
                }
            }
        }

        debug!(a, b, pools = pools.len(), "pool scan complete");
        if let Err(e) = self
            .cache
            .set_json(&cache_key, &pools, POOL_CACHE_TTL_SECS)
            .await
        {
            warn!(error = %e, "failed to cache pool candidates");
        }

        Ok(pools)
    }

    /// Vault balances for one pool, resolved so `token_*` always refers to
    /// the requested mint's side. Both balances are fetched in parallel.
    pub async fn read_pool_reserves(
        &self,
        pool_addr: &str,
        token_mint: &str,
    ) -> PulseResult<PoolReserves> {
        let account = self
            .rpc
            .get_account_info(pool_addr, None)
            .await?
            .ok_or_else(|| PulseError::ChainUnavailable(format!("pool {} not found", pool_addr)))?;
        let state = parse_pool_state(&account.decoded_data()?)?;

        let token_is_base = if state.base_mint == token_mint {
            true
        } else if state.quote_mint == token_mint {
            false
        } else {
            return Err(PulseError::ChainUnavailable(format!(
                "pool {} does not contain {}",
                pool_addr, token_mint
            )));
        };

        let (base_balance, quote_balance) = tokio::join!(
            self.rpc.get_token_account_balance(&state.base_vault),
            self.rpc.get_token_account_balance(&state.quote_vault),
        );
        let base_balance = base_balance?;
        let quote_balance = quote_balance?;

        let parse = |amount: &str| -> PulseResult<u64> {
            amount
                .parse()
                .map_err(|_| PulseError::ChainUnavailable("unreadable vault balance".into()))
        };

        let reserves = if token_is_base {
            PoolReserves {
                token_reserve_raw: parse(&base_balance.amount)?,
                quote_reserve_raw: parse(&quote_balance.amount)?,
                token_decimals: state.base_decimals,
                quote_decimals: state.quote_decimals,
            }
        } else {
            PoolReserves {
                token_reserve_raw: parse(&quote_balance.amount)?,
                quote_reserve_raw: parse(&base_balance.amount)?,
                token_decimals: state.quote_decimals,
                quote_decimals: state.base_decimals,
            }
        };

        Ok(reserves)
    }

    /// Largest holders joined against supply for percentage shares
    pub async fn read_top_holders(
        &self,
        mint: &str,
        limit: usize,
    ) -> PulseResult<Vec<HolderBalance>> {
        let largest = self.rpc.get_token_largest_accounts(mint).await?;
        let supply = self.read_supply(mint).await?;
        let supply_ui = supply.ui_amount();

        let accounts: Vec<String> = largest
            .iter()
            .take(limit)
            .map(|a| a.address.clone())
            .collect();

        // Resolve token-account owners; fall back to the account address when
        // the parsed form is unavailable.
        let owners = self
            .rpc
            .get_multiple_accounts_parsed(&accounts)
            .await
            .unwrap_or_else(|_| vec![None; accounts.len()]);

        let holders = largest
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, entry)| {
                let owner = owners
                    .get(i)
                    .and_then(|a| a.as_ref())
                    .and_then(|a| a.pointer("/data/parsed/info/owner"))
                    .and_then(|o| o.as_str())
                    .unwrap_or(entry.address.as_str())
                    .to_string();
                let balance = entry.ui_amount.unwrap_or_else(|| {
                    entry.amount.parse::<u64>().unwrap_or(0) as f64
                        / 10f64.powi(entry.decimals as i32)
                });
                let share_pct = if supply_ui > 0.0 {
                    (balance / supply_ui * 100.0).min(100.0)
                } else {
                    0.0
                };
                HolderBalance {
                    owner,
                    balance,
                    share_pct,
                }
            })
            .collect();

        Ok(holders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_pool(base_mint: &Pubkey, quote_mint: &Pubkey) -> Vec<u8> {
        let mut data = vec![0u8; AMM_STATE_SIZE];
        data[BASE_DECIMAL_OFFSET..BASE_DECIMAL_OFFSET + 8].copy_from_slice(&6u64.to_le_bytes());
        data[QUOTE_DECIMAL_OFFSET..QUOTE_DECIMAL_OFFSET + 8].copy_from_slice(&9u64.to_le_bytes());
        data[BASE_VAULT_OFFSET..BASE_VAULT_OFFSET + 32]
            .copy_from_slice(Pubkey::new_unique().as_ref());
        data[QUOTE_VAULT_OFFSET..QUOTE_VAULT_OFFSET + 32]
            .copy_from_slice(Pubkey::new_unique().as_ref());
        data[BASE_MINT_OFFSET..BASE_MINT_OFFSET + 32].copy_from_slice(base_mint.as_ref());
        data[QUOTE_MINT_OFFSET..QUOTE_MINT_OFFSET + 32].copy_from_slice(quote_mint.as_ref());
        data
    }

    #[test]
    fn pool_state_parses_layout_offsets() {
        let base = Pubkey::new_unique();
        let quote = Pubkey::new_unique();
        let data = synthetic_pool(&base, &quote);

        let state = parse_pool_state(&data).unwrap();
        assert_eq!(state.base_decimals, 6);
        assert_eq!(state.quote_decimals, 9);
        assert_eq!(state.base_mint, base.to_string());
        assert_eq!(state.quote_mint, quote.to_string());
    }

    #[test]
    fn pool_state_rejects_truncated_accounts() {
        assert!(parse_pool_state(&[0u8; 100]).is_err());
    }

    #[test]
    fn mint_pair_prefix_parses() {
        let base = Pubkey::new_unique();
        let quote = Pubkey::new_unique();
        let mut prefix = Vec::with_capacity(64);
        prefix.extend_from_slice(base.as_ref());
        prefix.extend_from_slice(quote.as_ref());

        let (b, q) = parse_mint_pair(&prefix).unwrap();
        assert_eq!(b, base.to_string());
        assert_eq!(q, quote.to_string());
    }

    #[test]
    fn reserve_price_is_quote_over_token() {
        // 1000 tokens (6 decimals) against 50 native (9 decimals) -> 0.05.
        let reserves = PoolReserves {
            token_reserve_raw: 1_000_000_000,
            quote_reserve_raw: 50_000_000_000,
            token_decimals: 6,
            quote_decimals: 9,
        };
        assert!((reserves.price_of_token() - 0.05).abs() < 1e-12);
        assert!((reserves.quote_reserve_ui() - 50.0).abs() < 1e-12);
    }

    #[test]
    fn empty_token_side_prices_at_zero() {
        let reserves = PoolReserves {
            token_reserve_raw: 0,
            quote_reserve_raw: 1_000_000_000,
            token_decimals: 6,
            quote_decimals: 9,
        };
        assert_eq!(reserves.price_of_token(), 0.0);
    }
}
