//! Application configuration loaded from environment variables.

use std::time::Duration;

use alloy_primitives::Address;

use crate::errors::{DashboardError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Ethereum JSON-RPC endpoint used for contract reads and writes
    pub rpc_url: String,
    /// EIP-1193 wallet endpoint; `None` runs without a wallet
    pub wallet_rpc_url: Option<String>,
    /// Address of the project tracker contract
    pub contract_address: Address,
    /// Path to the SQLite database holding session hints
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// How often (in seconds) the wallet is polled for account/chain changes
    pub wallet_poll_interval_secs: u64,
    /// How often (in milliseconds) a pending transaction receipt is polled
    pub receipt_poll_interval_ms: u64,
    /// How long to wait for a transaction receipt before giving up
    pub receipt_timeout_secs: u64,
    /// Retries for transient RPC transport failures
    pub rpc_max_retries: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let rpc_url = env_var("RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:8545".to_string());
        let wallet_rpc_url = match std::env::var("WALLET_RPC_URL") {
            Ok(url) if url.trim().is_empty() => None,
            Ok(url) => Some(url),
            Err(_) => Some(rpc_url.clone()),
        };

        Ok(Config {
            rpc_url,
            wallet_rpc_url,
            contract_address: env_var("CONTRACT_ADDRESS")
                .map_err(|_| {
                    DashboardError::Config(
                        "CONTRACT_ADDRESS environment variable is required".to_string(),
                    )
                })?
                .parse()
                .map_err(|_| DashboardError::Config("Invalid CONTRACT_ADDRESS".to_string()))?,
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./safechain_session.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| DashboardError::Config("Invalid API_PORT".to_string()))?,
            wallet_poll_interval_secs: env_var("WALLET_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .map_err(|_| {
                    DashboardError::Config("Invalid WALLET_POLL_INTERVAL_SECS".to_string())
                })?,
            receipt_poll_interval_ms: env_var("RECEIPT_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .map_err(|_| DashboardError::Config("Invalid RECEIPT_POLL_INTERVAL_MS".to_string()))?,
            receipt_timeout_secs: env_var("RECEIPT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .map_err(|_| DashboardError::Config("Invalid RECEIPT_TIMEOUT_SECS".to_string()))?,
            rpc_max_retries: env_var("RPC_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| DashboardError::Config("Invalid RPC_MAX_RETRIES".to_string()))?,
        })
    }

    pub fn wallet_poll_interval(&self) -> Duration {
        Duration::from_secs(self.wallet_poll_interval_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| DashboardError::Config(format!("Missing env var: {key}")))
}
