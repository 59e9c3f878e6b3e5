//! Session persistence: migrations and the three session hint keys.
//!
//! Nothing stored here is authoritative. It only decides whether a silent
//! restore is attempted on startup.

use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::info;

use crate::errors::Result;

pub const KEY_CONNECTED: &str = "walletConnected";
pub const KEY_ACCOUNT: &str = "userAccount";
pub const KEY_ROLES: &str = "userRoles";

const UPSERT: &str = r#"
    INSERT INTO session_state (key, value, updated_at)
    VALUES (?1, ?2, strftime('%s', 'now'))
    ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                   updated_at = excluded.updated_at
"#;

/// What a previous run left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedSession {
    pub connected: bool,
    pub account: Option<String>,
    /// Raw role snapshot; may be unreadable.
    pub roles: Option<String>,
}

#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn load(&self) -> Result<PersistedSession>;
    async fn save_connection(&self, account: &str) -> Result<()>;
    async fn save_roles(&self, roles_json: &str) -> Result<()>;
    /// Forget the role snapshot only.
    async fn clear_roles(&self) -> Result<()>;
    /// Remove every session key.
    async fn clear(&self) -> Result<()>;
}

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };
    // Create the file on first run.
    let url = if url.contains('?') || url.contains(":memory:") {
        url
    } else {
        format!("{url}?mode=rwc")
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

#[derive(Debug, Clone)]
pub struct SqliteSessionStorage {
    pool: SqlitePool,
}

impl SqliteSessionStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM session_state WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(UPSERT)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStorage for SqliteSessionStorage {
    async fn load(&self) -> Result<PersistedSession> {
        Ok(PersistedSession {
            connected: self.get(KEY_CONNECTED).await?.as_deref() == Some("true"),
            account: self.get(KEY_ACCOUNT).await?,
            roles: self.get(KEY_ROLES).await?,
        })
    }

    async fn save_connection(&self, account: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in [(KEY_CONNECTED, "true"), (KEY_ACCOUNT, account)] {
            sqlx::query(UPSERT)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn save_roles(&self, roles_json: &str) -> Result<()> {
        self.put(KEY_ROLES, roles_json).await
    }

    async fn clear_roles(&self) -> Result<()> {
        sqlx::query("DELETE FROM session_state WHERE key = ?1")
            .bind(KEY_ROLES)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM session_state WHERE key IN (?1, ?2, ?3)")
            .bind(KEY_CONNECTED)
            .bind(KEY_ACCOUNT)
            .bind(KEY_ROLES)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
