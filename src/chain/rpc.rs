//! Lightweight Solana JSON-RPC client
//!
//! Implements only the handful of methods the service actually needs,
//! avoiding the heavy dependency chain of the full RPC client crate.

use crate::core::{PulseError, PulseResult};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// RPC response wrapper
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

/// RPC error structure
#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Envelope for methods that return `{context, value}`
#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

/// Raw account as returned with base64 encoding
#[derive(Debug, Clone, Deserialize)]
pub struct RawAccount {
    pub lamports: u64,
    /// `(data, encoding)` tuple
    pub data: (String, String),
    pub owner: String,
}

impl RawAccount {
    pub fn decoded_data(&self) -> PulseResult<Vec<u8>> {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD
            .decode(&self.data.0)
            .map_err(|e| PulseError::ChainUnavailable(format!("bad account encoding: {}", e)))
    }
}

/// Token amount as the RPC reports it
#[derive(Debug, Clone, Deserialize)]
pub struct UiTokenAmount {
    pub amount: String,
    pub decimals: u8,
    #[serde(rename = "uiAmount")]
    pub ui_amount: Option<f64>,
}

/// One entry from getTokenLargestAccounts
#[derive(Debug, Clone, Deserialize)]
pub struct LargestAccount {
    pub address: String,
    pub amount: String,
    pub decimals: u8,
    #[serde(rename = "uiAmount")]
    pub ui_amount: Option<f64>,
}

/// One entry from getProgramAccounts
#[derive(Debug, Clone, Deserialize)]
pub struct KeyedAccount {
    pub pubkey: String,
    pub account: RawAccount,
}

pub struct LightRpcClient {
    url: String,
    http: reqwest::Client,
}

impl LightRpcClient {
    pub fn new(url: String, timeout: Duration) -> PulseResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PulseError::ChainUnavailable(e.to_string()))?;
        Ok(Self { url, http })
    }

    /// Make a JSON-RPC call
    async fn call<T>(&self, method: &str, params: Value) -> PulseResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        debug!(method, "rpc call");

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PulseError::ChainUnavailable(e.to_string()))?;

        if response.status().as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(PulseError::Throttled {
                provider: "chain",
                retry_after,
            });
        }

        let rpc: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| PulseError::ChainUnavailable(e.to_string()))?;

        if let Some(err) = rpc.error {
            return Err(PulseError::ChainUnavailable(format!(
                "rpc error {}: {}",
                err.code, err.message
            )));
        }

        rpc.result
            .ok_or_else(|| PulseError::ChainUnavailable(format!("{}: empty rpc result", method)))
    }

    /// Account lookup, optionally restricted to a byte slice of the data
    pub async fn get_account_info(
        &self,
        pubkey: &str,
        data_slice: Option<(usize, usize)>,
    ) -> PulseResult<Option<RawAccount>> {
        let mut config = json!({ "encoding": "base64" });
        if let Some((offset, length)) = data_slice {
            config["dataSlice"] = json!({ "offset": offset, "length": length });
        }
        let result: WithContext<Option<RawAccount>> = self
            .call("getAccountInfo", json!([pubkey, config]))
            .await?;
        Ok(result.value)
    }

    pub async fn get_token_supply(&self, mint: &str) -> PulseResult<UiTokenAmount> {
        let result: WithContext<UiTokenAmount> =
            self.call("getTokenSupply", json!([mint])).await?;
        Ok(result.value)
    }

    pub async fn get_token_account_balance(&self, account: &str) -> PulseResult<UiTokenAmount> {
        let result: WithContext<UiTokenAmount> = self
            .call("getTokenAccountBalance", json!([account]))
            .await?;
        Ok(result.value)
    }

    pub async fn get_token_largest_accounts(
        &self,
        mint: &str,
    ) -> PulseResult<Vec<LargestAccount>> {
        let result: WithContext<Vec<LargestAccount>> =
            self.call("getTokenLargestAccounts", json!([mint])).await?;
        Ok(result.value)
    }

    /// Parsed reads for several accounts at once
    pub async fn get_multiple_accounts_parsed(
        &self,
        pubkeys: &[String],
    ) -> PulseResult<Vec<Option<Value>>> {
        let result: WithContext<Vec<Option<Value>>> = self
            .call(
                "getMultipleAccounts",
                json!([pubkeys, { "encoding": "jsonParsed" }]),
            )
            .await?;
        Ok(result.value)
    }

    /// Filtered program-account scan.
    ///
    /// `data_slice` keeps the response to the requested byte range so a scan
    /// over thousands of pool accounts never streams full bodies.
    pub async fn get_program_accounts(
        &self,
        program: &str,
        data_size: usize,
        memcmp_offset: usize,
        memcmp_bytes: &str,
        data_slice: Option<(usize, usize)>,
    ) -> PulseResult<Vec<KeyedAccount>> {
        let mut config = json!({
            "encoding": "base64",
            "filters": [
                { "dataSize": data_size },
                { "memcmp": { "offset": memcmp_offset, "bytes": memcmp_bytes } },
            ],
        });
        if let Some((offset, length)) = data_slice {
            config["dataSlice"] = json!({ "offset": offset, "length": length });
        }
        self.call("getProgramAccounts", json!([program, config]))
            .await
    }
}
