//! SafeChain dashboard backend entry point.
//!
//! Owns the single wallet session, keeps a contract handle bound to the
//! connected account, and serves aggregated project views and write actions
//! over a small Axum REST API.

mod abi;
mod actions;
mod amount;
mod api;
mod config;
mod contract;
mod errors;
mod queries;
mod roles;
mod rpc;
mod session;
mod storage;
mod types;
mod wallet;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use reqwest::Client;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use contract::RpcBinder;
use rpc::RpcClient;
use session::SessionStore;
use storage::SqliteSessionStorage;
use wallet::{RpcWallet, Wallet};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Session hints live in SQLite; migrations run on startup.
    let pool = storage::init_pool(&config.database_url).await?;
    let storage = Arc::new(SqliteSessionStorage::new(pool));

    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    let binder = Arc::new(RpcBinder {
        rpc: RpcClient::new(client.clone(), &config.rpc_url, config.rpc_max_retries),
        contract: config.contract_address,
        receipt_poll_interval: config.receipt_poll_interval(),
        receipt_timeout: config.receipt_timeout(),
    });

    let wallet: Option<Arc<dyn Wallet>> = match &config.wallet_rpc_url {
        Some(url) => Some(Arc::new(RpcWallet::new(RpcClient::new(
            client,
            url,
            config.rpc_max_retries,
        )))),
        None => {
            warn!("WALLET_RPC_URL is empty; running without a wallet");
            None
        }
    };

    // ─── Session task ─────────────────────────────────────
    let cancel = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::channel(32);
    let store = SessionStore::new(wallet.clone(), binder, storage);
    let (session, session_task) = session::spawn(store, events_rx, cancel.clone());

    let mut notices = session.notices();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => info!("Session: {notice:?}"),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Session notice log fell behind by {n}")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    match session.restore().await {
        Ok(true) => info!("Previous wallet session restored"),
        Ok(false) => info!("No previous wallet session"),
        Err(e) => warn!("Could not restore wallet session: {e}"),
    }

    // ─── Wallet watcher ───────────────────────────────────
    if let Some(wallet) = wallet {
        let interval = config.wallet_poll_interval();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            wallet::run_watcher(wallet.as_ref(), interval, events_tx, cancel).await;
        });
    }

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(api::ApiState { session });

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/session", get(api::get_session))
        .route("/session/connect", post(api::connect))
        .route("/session/disconnect", post(api::disconnect))
        .route("/session/roles", post(api::refresh_roles))
        .route("/dashboard", get(api::get_dashboard))
        .route("/projects", get(api::get_projects).post(api::create_project))
        .route("/projects/:id", get(api::get_project))
        .route("/projects/:id/complete", post(api::complete_project))
        .route("/projects/:id/milestones", post(api::add_milestone))
        .route(
            "/projects/:id/milestones/:milestone_id",
            get(api::get_milestone),
        )
        .route(
            "/projects/:id/milestones/:milestone_id/complete",
            post(api::complete_milestone),
        )
        .route("/projects/:id/expenses", post(api::add_expense))
        .route("/projects/:id/expenses/:expense_id", get(api::get_expense))
        .route("/milestones", get(api::get_milestones))
        .route("/expenses", get(api::get_expenses))
        .route("/notifications", get(api::get_notifications))
        .route("/inbox", get(api::get_inbox))
        .route("/inbox/:index/read", post(api::mark_inbox_read))
        .route("/roles/grant", post(api::grant_role))
        .route("/roles/revoke", post(api::revoke_role))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(api_state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    session_task.await?;
    Ok(())
}
