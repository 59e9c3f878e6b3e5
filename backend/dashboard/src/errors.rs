//! Application-wide error types.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("No wallet provider is available")]
    WalletUnavailable,

    #[error("Wallet request was rejected by the user")]
    UserRejected,

    #[error("Wallet authorised no accounts")]
    NoAccounts,

    #[error("Wallet is not connected")]
    NotConnected,

    #[error("Contract handle was superseded by a newer session")]
    StaleHandle,

    #[error("Contract call reverted: {0}")]
    ChainCallReverted(String),

    #[error("Transaction submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("Transaction {tx_hash} failed after submission: {reason}")]
    FinalizationFailed { tx_hash: String, reason: String },

    #[error("Query failed: {0}")]
    TopLevelQuery(String),

    #[error("Malformed contract response: {0}")]
    Decode(String),

    #[error("Missing capability: {0}")]
    MissingCapability(&'static str),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DashboardError>;

/// Coarse classification of a [`DashboardError`], safe to hand to observers
/// and API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    WalletUnavailable,
    UserRejected,
    NoAccounts,
    NotConnected,
    StaleHandle,
    ChainCallReverted,
    SubmissionRejected,
    FinalizationFailed,
    TopLevelQueryFailure,
    Decode,
    MissingCapability,
    InvalidInput,
    Upstream,
    Internal,
}

impl ErrorKind {
    /// Whether retrying the same request can succeed without user action.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::UserRejected | Self::StaleHandle | Self::TopLevelQueryFailure | Self::Upstream
        )
    }
}

impl DashboardError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::WalletUnavailable => ErrorKind::WalletUnavailable,
            Self::UserRejected => ErrorKind::UserRejected,
            Self::NoAccounts => ErrorKind::NoAccounts,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::StaleHandle => ErrorKind::StaleHandle,
            Self::ChainCallReverted(_) => ErrorKind::ChainCallReverted,
            Self::SubmissionRejected(_) => ErrorKind::SubmissionRejected,
            Self::FinalizationFailed { .. } => ErrorKind::FinalizationFailed,
            Self::TopLevelQuery(_) => ErrorKind::TopLevelQueryFailure,
            Self::Decode(_) => ErrorKind::Decode,
            Self::MissingCapability(_) => ErrorKind::MissingCapability,
            Self::InvalidAmount(_) | Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Rpc { .. } | Self::Http(_) => ErrorKind::Upstream,
            Self::Database(_)
            | Self::Migrate(_)
            | Self::Json(_)
            | Self::Config(_) => ErrorKind::Internal,
        }
    }
}
