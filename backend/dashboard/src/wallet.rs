//! Wallet provider access and change notifications.
//!
//! The wallet is reached through the EIP-1193 request methods it shares with
//! a JSON-RPC endpoint. Providers that cannot push `accountsChanged` /
//! `chainChanged` / `disconnect` to a backend are polled by [`run_watcher`],
//! which turns observed differences into [`WalletEvent`]s for the session.

use std::time::Duration;

use alloy_primitives::Address;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{DashboardError, Result};
use crate::rpc::{quantity, RpcClient};

#[async_trait]
pub trait Wallet: Send + Sync {
    /// Accounts already authorised for this origin (`eth_accounts`).
    async fn accounts(&self) -> Result<Vec<Address>>;
    /// Prompt for account access (`eth_requestAccounts`).
    async fn request_accounts(&self) -> Result<Vec<Address>>;
    /// Force the account-selection prompt (`wallet_requestPermissions`).
    async fn request_permissions(&self) -> Result<()>;
    async fn chain_id(&self) -> Result<u64>;
}

/// Notifications a wallet can emit at any time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
    Disconnect,
}

// ─────────────────────────────────────────────────────────
// JSON-RPC wallet
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RpcWallet {
    rpc: RpcClient,
}

impl RpcWallet {
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }
}

fn parse_accounts(value: &Value) -> Result<Vec<Address>> {
    let list = value
        .as_array()
        .ok_or_else(|| DashboardError::Decode(format!("expected account list, got {value}")))?;
    list.iter()
        .map(|v| {
            v.as_str()
                .and_then(|s| s.parse::<Address>().ok())
                .ok_or_else(|| DashboardError::Decode(format!("invalid account {v}")))
        })
        .collect()
}

/// Transport failures mean the provider is gone rather than misbehaving.
fn unavailable_on_transport(err: DashboardError) -> DashboardError {
    match err {
        DashboardError::Http(e) => {
            debug!("wallet transport error: {e}");
            DashboardError::WalletUnavailable
        }
        other => other,
    }
}

#[async_trait]
impl Wallet for RpcWallet {
    async fn accounts(&self) -> Result<Vec<Address>> {
        let result = self
            .rpc
            .request("eth_accounts", json!([]))
            .await
            .map_err(unavailable_on_transport)?;
        parse_accounts(&result)
    }

    async fn request_accounts(&self) -> Result<Vec<Address>> {
        let result = self
            .rpc
            .request("eth_requestAccounts", json!([]))
            .await
            .map_err(unavailable_on_transport)?;
        parse_accounts(&result)
    }

    async fn request_permissions(&self) -> Result<()> {
        self.rpc
            .request("wallet_requestPermissions", json!([{ "eth_accounts": {} }]))
            .await
            .map_err(unavailable_on_transport)?;
        Ok(())
    }

    async fn chain_id(&self) -> Result<u64> {
        let result = self
            .rpc
            .request("eth_chainId", json!([]))
            .await
            .map_err(unavailable_on_transport)?;
        quantity(&result)
    }
}

// ─────────────────────────────────────────────────────────
// Change detection
// ─────────────────────────────────────────────────────────

/// Remembers the last observed wallet state and reports differences.
#[derive(Debug, Default)]
pub struct WalletWatcher {
    accounts: Option<Vec<Address>>,
    chain_id: Option<u64>,
}

impl WalletWatcher {
    /// Record a successful poll. The first observation only sets the
    /// baseline.
    pub fn observe(&mut self, accounts: Vec<Address>, chain_id: u64) -> Vec<WalletEvent> {
        let mut events = Vec::new();

        if let Some(previous) = self.chain_id {
            if previous != chain_id {
                events.push(WalletEvent::ChainChanged(chain_id));
            }
        }
        if let Some(previous) = &self.accounts {
            if *previous != accounts {
                events.push(WalletEvent::AccountsChanged(accounts.clone()));
            }
        }

        self.accounts = Some(accounts);
        self.chain_id = Some(chain_id);
        events
    }

    /// Record a failed poll. Emits `Disconnect` once per outage.
    pub fn lost(&mut self) -> Option<WalletEvent> {
        let was_connected = self.chain_id.is_some();
        self.accounts = None;
        self.chain_id = None;
        was_connected.then_some(WalletEvent::Disconnect)
    }
}

/// Poll the wallet until `cancel` fires, forwarding changes to `events`.
pub async fn run_watcher<W: Wallet + ?Sized>(
    wallet: &W,
    interval: Duration,
    events: mpsc::Sender<WalletEvent>,
    cancel: CancellationToken,
) {
    info!("Wallet watcher starting (every {interval:?})");
    let mut watcher = WalletWatcher::default();

    loop {
        let observed = match (wallet.accounts().await, wallet.chain_id().await) {
            (Ok(accounts), Ok(chain_id)) => watcher.observe(accounts, chain_id),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Wallet poll failed: {e}");
                watcher.lost().into_iter().collect()
            }
        };

        for event in observed {
            debug!("wallet event: {event:?}");
            if events.send(event).await.is_err() {
                info!("Session closed; wallet watcher stopping");
                return;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Wallet watcher stopped");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
