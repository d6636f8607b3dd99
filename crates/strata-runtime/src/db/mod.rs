//! PostgreSQL backend: a single dedicated connection that is both the
//! version store and the statement driver.
//!
//! The migration lock is a session-level advisory lock, so the store and the
//! driver must share one connection rather than a pool.

mod driver;
mod store;

use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use tracing::debug;

use strata_core::config::DatabaseConfig;
use strata_core::error::{Result, StrataError};

/// Lock ID for the migration advisory lock (arbitrary but consistent).
/// "STRATA" in hex.
const MIGRATION_LOCK_ID: i64 = 0x535452415441;

/// Database handle used by the migrator.
pub struct Database {
    conn: PgConnection,
    table: String,
    locked: bool,
}

impl Database {
    /// Open a connection from configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        config.validate()?;

        let options: PgConnectOptions = config
            .url
            .parse()
            .map_err(|e| StrataError::Config(format!("Invalid database URL: {}", e)))?;

        let mut conn = tokio::time::timeout(
            config.connect_timeout(),
            PgConnection::connect_with(&options),
        )
        .await
        .map_err(|_| {
            StrataError::Database(format!(
                "Timed out after {:?} connecting to database",
                config.connect_timeout()
            ))
        })?
        .map_err(|e| StrataError::Database(format!("Failed to connect to database: {}", e)))?;

        if let Some(timeout) = config.statement_timeout() {
            let set = format!("SET statement_timeout = {}", timeout.as_millis());
            sqlx::raw_sql(&set).execute(&mut conn).await.map_err(|e| {
                StrataError::Database(format!("Failed to set statement timeout: {}", e))
            })?;
        }

        debug!("Connected to database, version table {}", config.table);

        Ok(Self {
            conn,
            table: config.table.clone(),
            locked: false,
        })
    }

    /// Close the connection gracefully. Any advisory lock still held is
    /// released by the server when the session ends.
    pub async fn close(self) -> Result<()> {
        self.conn
            .close()
            .await
            .map_err(|e| StrataError::Database(format!("Failed to close connection: {}", e)))
    }
}
