//! Ethereum JSON-RPC transport shared by the wallet and the contract binding.
//!
//! ## Resilience
//!
//! * Exponential back-off is applied to transport failures and HTTP 429
//!   responses, up to [`MAX_BACKOFF_SECS`] seconds per wait and
//!   `max_retries` attempts.
//! * JSON-RPC error objects are never retried here; they are classified by
//!   [`RpcError::into_error`] so that wallet rejections and contract reverts
//!   surface as their own error kinds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::errors::{DashboardError, Result};

const MAX_BACKOFF_SECS: u64 = 8;
const INITIAL_BACKOFF_MS: u64 = 250;

/// EIP-1193 "User Rejected Request".
pub const USER_REJECTED: i64 = 4001;
/// EIP-1193 "Unauthorized".
pub const UNAUTHORIZED: i64 = 4100;
/// EIP-1193 "Disconnected" / "Chain Disconnected".
pub const DISCONNECTED: i64 = 4900;
pub const CHAIN_DISCONNECTED: i64 = 4901;
/// Geth-style `execution reverted`.
pub const EXECUTION_REVERTED: i64 = 3;

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl RpcError {
    /// Map a JSON-RPC error object onto the dashboard error taxonomy.
    pub fn into_error(self) -> DashboardError {
        match self.code {
            USER_REJECTED | UNAUTHORIZED => DashboardError::UserRejected,
            DISCONNECTED | CHAIN_DISCONNECTED => DashboardError::WalletUnavailable,
            EXECUTION_REVERTED => DashboardError::ChainCallReverted(self.message),
            _ if self.message.contains("revert") => {
                DashboardError::ChainCallReverted(self.message)
            }
            code => DashboardError::Rpc {
                code,
                message: self.message,
            },
        }
    }
}

// ─────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RpcClient {
    client: Client,
    url: String,
    max_retries: u32,
    next_id: Arc<AtomicU64>,
}

impl RpcClient {
    pub fn new(client: Client, url: impl Into<String>, max_retries: u32) -> Self {
        Self {
            client,
            url: url.into(),
            max_retries,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Issue one JSON-RPC request and return its `result`.
    ///
    /// A `null` result is returned as [`Value::Null`]; callers decide whether
    /// that means "absent" (e.g. a pending receipt) or a malformed response.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let mut backoff = Duration::from_millis(INITIAL_BACKOFF_MS);
        let mut attempt = 0u32;

        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let response = self
                .client
                .post(&self.url)
                .json(&json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "method": method,
                    "params": params,
                }))
                .send()
                .await;

            let retry_reason = match response {
                Err(e) if attempt < self.max_retries => format!("{e}"),
                Err(e) => return Err(e.into()),
                Ok(resp) if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                    if attempt >= self.max_retries {
                        return Err(DashboardError::Rpc {
                            code: 429,
                            message: format!("{method}: rate limited"),
                        });
                    }
                    "rate limited".to_string()
                }
                Ok(resp) => {
                    let body: RpcResponse = resp.error_for_status()?.json().await?;
                    if let Some(err) = body.error {
                        debug!("{method} returned error {}: {}", err.code, err.message);
                        return Err(err.into_error());
                    }
                    return Ok(body.result.unwrap_or(Value::Null));
                }
            };

            attempt += 1;
            warn!(
                "{method} failed (attempt {attempt}/{}; retry in {:?}): {retry_reason}",
                self.max_retries, backoff
            );
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(MAX_BACKOFF_SECS));
        }
    }
}

// ─────────────────────────────────────────────────────────
// Hex helpers
// ─────────────────────────────────────────────────────────

/// `0x`-prefixed lowercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Decode a `0x`-prefixed hex string result.
pub fn from_hex(value: &Value) -> Result<Vec<u8>> {
    let s = value
        .as_str()
        .ok_or_else(|| DashboardError::Decode(format!("expected hex string, got {value}")))?;
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(|e| DashboardError::Decode(format!("invalid hex {s}: {e}")))
}

/// Parse a hex quantity such as `"0x1a"`.
pub fn quantity(value: &Value) -> Result<u64> {
    let s = value
        .as_str()
        .ok_or_else(|| DashboardError::Decode(format!("expected quantity, got {value}")))?;
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|e| DashboardError::Decode(format!("invalid quantity {s}: {e}")))
}
