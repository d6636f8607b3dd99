use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use sqlx::postgres::PgConnection;
use sqlx::{Connection, Executor};
use tracing::debug;

use strata_core::backend::VersionStore;
use strata_core::error::{Result, StrataError};
use strata_core::migration::{Version, VersionRecord};

use super::{Database, MIGRATION_LOCK_ID};

/// Interval between attempts to take the advisory lock.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

async fn initialize_table(conn: &mut PgConnection, table: &str) -> Result<()> {
    if let Some((schema, _)) = table.split_once('.') {
        let create_schema = format!("CREATE SCHEMA IF NOT EXISTS {}", schema);
        (&mut *conn)
            .execute(sqlx::raw_sql(&create_schema))
            .await
            .map_err(|e| StrataError::Database(format!("Failed to create schema: {}", e)))?;
    }

    let create_table = format!(
        "CREATE TABLE IF NOT EXISTS {} (version BIGINT NOT NULL, dirty BOOLEAN NOT NULL)",
        table
    );
    (&mut *conn)
        .execute(sqlx::raw_sql(&create_table))
        .await
        .map_err(|e| StrataError::Database(format!("Failed to create version table: {}", e)))?;

    let count_rows = format!("SELECT COUNT(*) FROM {}", table);
    let count: i64 = sqlx::query_scalar(&count_rows)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| StrataError::Database(format!("Failed to read version table: {}", e)))?;

    if count == 0 {
        debug!("Initializing version table {}", table);
        write_record(conn, table, VersionRecord::default()).await?;
    }

    Ok(())
}

async fn read_record(conn: &mut PgConnection, table: &str) -> Result<VersionRecord> {
    let exists: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
        .bind(table)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| StrataError::Database(format!("Failed to look up version table: {}", e)))?;

    if exists.is_none() {
        return Err(StrataError::StoreUninitialized);
    }

    let select = format!("SELECT version, dirty FROM {} LIMIT 1", table);
    let row: Option<(i64, bool)> = sqlx::query_as(&select)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| StrataError::Database(format!("Failed to read version table: {}", e)))?;

    let (version, dirty) = row.ok_or(StrataError::StoreUninitialized)?;
    let version = Version::try_from(version).map_err(|_| {
        StrataError::Database(format!("Version table holds a negative version: {}", version))
    })?;

    Ok(VersionRecord { version, dirty })
}

async fn try_advisory_lock(conn: &mut PgConnection) -> Result<bool> {
    sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
        .bind(MIGRATION_LOCK_ID)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| StrataError::Database(format!("Failed to acquire migration lock: {}", e)))
}

async fn advisory_unlock(conn: &mut PgConnection) -> Result<()> {
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(&mut *conn)
        .await
        .map_err(|e| StrataError::Database(format!("Failed to release migration lock: {}", e)))?;
    Ok(())
}

/// Replace the single version row on `conn`. The caller owns the transaction.
pub(super) async fn replace_record(
    conn: &mut PgConnection,
    table: &str,
    record: VersionRecord,
) -> Result<()> {
    let version = i64::try_from(record.version).map_err(|_| {
        StrataError::InvalidArgument(format!("Version {} does not fit in BIGINT", record.version))
    })?;

    let delete = format!("DELETE FROM {}", table);
    (&mut *conn)
        .execute(sqlx::raw_sql(&delete))
        .await
        .map_err(|e| StrataError::Database(format!("Failed to clear version table: {}", e)))?;

    let insert = format!("INSERT INTO {} (version, dirty) VALUES ($1, $2)", table);
    sqlx::query(&insert)
        .bind(version)
        .bind(record.dirty)
        .execute(&mut *conn)
        .await
        .map_err(|e| StrataError::Database(format!("Failed to write version {}: {}", record, e)))?;

    Ok(())
}

/// Replace the single version row inside its own transaction.
async fn write_record(conn: &mut PgConnection, table: &str, record: VersionRecord) -> Result<()> {
    let mut tx = conn
        .begin()
        .await
        .map_err(|e| StrataError::Database(format!("Failed to start transaction: {}", e)))?;

    replace_record(&mut *tx, table, record).await?;

    tx.commit()
        .await
        .map_err(|e| StrataError::Database(format!("Failed to commit version {}: {}", record, e)))
}

impl VersionStore for Database {
    fn initialize(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { initialize_table(&mut self.conn, &self.table).await })
    }

    fn read(&mut self) -> BoxFuture<'_, Result<VersionRecord>> {
        Box::pin(async move { read_record(&mut self.conn, &self.table).await })
    }

    fn write(&mut self, record: VersionRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            debug!("Writing version {}", record);
            write_record(&mut self.conn, &self.table, record).await
        })
    }

    fn lock(&mut self, timeout: Duration) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            debug!("Acquiring migration lock...");
            let started = Instant::now();

            loop {
                if try_advisory_lock(&mut self.conn).await? {
                    self.locked = true;
                    debug!("Migration lock acquired");
                    return Ok(());
                }

                let waited = started.elapsed();
                if waited >= timeout {
                    return Err(StrataError::LockTimeout { waited });
                }
                tokio::time::sleep(LOCK_POLL_INTERVAL.min(timeout - waited)).await;
            }
        })
    }

    fn unlock(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.locked {
                return Ok(());
            }

            advisory_unlock(&mut self.conn).await?;
            self.locked = false;
            debug!("Migration lock released");
            Ok(())
        })
    }
}
