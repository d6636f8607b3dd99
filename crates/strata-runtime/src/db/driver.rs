use futures::future::BoxFuture;
use sqlx::postgres::PgConnection;
use sqlx::{Connection, Executor};
use tracing::{debug, warn};

use strata_core::backend::Driver;
use strata_core::error::{Result, StrataError};
use strata_core::migration::VersionRecord;

use super::store::replace_record;
use super::Database;

/// Run statements one by one, reporting the failing statement's position.
async fn run_statements(conn: &mut PgConnection, statements: &[String]) -> Result<()> {
    for (idx, statement) in statements.iter().enumerate() {
        debug!("Executing statement {}/{}", idx + 1, statements.len());
        (&mut *conn)
            .execute(sqlx::raw_sql(statement))
            .await
            .map_err(|e| {
                StrataError::Database(format!(
                    "statement {} of {} failed: {}",
                    idx + 1,
                    statements.len(),
                    e
                ))
            })?;
    }
    Ok(())
}

/// Run statements, and optionally replace the version row, in one
/// transaction. Nothing is kept when any part fails.
async fn run_in_transaction(
    conn: &mut PgConnection,
    statements: &[String],
    recorded: Option<(&str, VersionRecord)>,
) -> Result<()> {
    let mut tx = conn
        .begin()
        .await
        .map_err(|e| StrataError::Database(format!("Failed to start transaction: {}", e)))?;

    let mut result = run_statements(&mut *tx, statements).await;
    if result.is_ok() {
        if let Some((table, record)) = recorded {
            result = replace_record(&mut *tx, table, record).await;
        }
}

if let Err(e) = result {
    if let Err(rollback) = tx.rollback().await {
        warn!("Failed to roll back migration transaction: {}", rollback);
    }
    return Err(e);
}

tx.commit()
    .await
    .map_err(|e| StrataError::Database(format!("Failed to commit migration: {}", e)))
}

impl Driver for Database {
    fn execute<'a>(
        &'a mut self,
        statements: &'a [String],
        use_transaction: bool,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if use_transaction {
                run_in_transaction(&mut self.conn, statements, None).await
            } else {
                run_statements(&mut self.conn, statements).await
            }
        })
    }

    fn execute_recorded<'a>(
        &'a mut self,
        statements: &'a [String],
        record: VersionRecord,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            run_in_transaction(&mut self.conn, statements, Some((self.table.as_str(), record))).await
        })
    }
}
