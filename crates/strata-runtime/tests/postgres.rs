//! Integration tests against a real PostgreSQL.
//!
//! These read TEST_DATABASE_URL (never DATABASE_URL) and are skipped when it
//! is not set. Each test works inside its own schema.

use std::time::Duration;

use sqlx::postgres::PgConnection;
use sqlx::Connection;

use strata_core::backend::{Driver, VersionStore};
use strata_core::config::DatabaseConfig;
use strata_core::error::StrataError;
use strata_core::migration::VersionRecord;
use strata_runtime::{Database, EmbeddedSource, Migrator};

fn test_url() -> Option<String> {
    match std::env::var("TEST_DATABASE_URL") {
        Ok(url) => Some(url),
        Err(_) => {
            eprintln!("TEST_DATABASE_URL not set, skipping PostgreSQL test");
            None
        }
    }
}

async fn reset_schema(url: &str, schema: &str) {
    let mut conn = PgConnection::connect(url).await.unwrap();
    sqlx::raw_sql(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema))
        .execute(&mut conn)
        .await
        .unwrap();
    conn.close().await.unwrap();
}

async fn connect(url: &str, schema: &str) -> Database {
    let config = DatabaseConfig {
        url: url.to_string(),
        table: format!("{}.versions", schema),
        lock_timeout_secs: 30,
        ..Default::default()
    };
    Database::connect(&config).await.unwrap()
}

async fn table_exists(url: &str, table: &str) -> bool {
    let mut conn = PgConnection::connect(url).await.unwrap();
    let found: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
        .bind(table)
        .fetch_one(&mut conn)
        .await
        .unwrap();
    conn.close().await.unwrap();
    found.is_some()
}

fn users_source(schema: &str) -> EmbeddedSource {
    EmbeddedSource::new([
        (
            "1_users.up.sql".to_string(),
            format!("CREATE TABLE {s}.users (id BIGSERIAL PRIMARY KEY, email TEXT NOT NULL);", s = schema),
        ),
        ("1_users.down.sql".to_string(), format!("DROP TABLE {}.users;", schema)),
        (
            "2_posts.up.sql".to_string(),
            format!(
                "CREATE TABLE {s}.posts (id BIGSERIAL PRIMARY KEY, user_id BIGINT REFERENCES {s}.users (id));",
                s = schema
            ),
        ),
        ("2_posts.down.sql".to_string(), format!("DROP TABLE {}.posts;", schema)),
    ])
    .unwrap()
}

#[tokio::test]
async fn test_up_down_round_trip() {
    let Some(url) = test_url() else { return };
    let schema = "strata_it_round_trip";
    reset_schema(&url, schema).await;

    let mut migrator = Migrator::new(users_source(schema), connect(&url, schema).await);

    let report = migrator.up().await.unwrap();
    assert_eq!(report.to, 2);
    assert!(table_exists(&url, &format!("{}.posts", schema)).await);
    assert_eq!(migrator.version().await.unwrap(), VersionRecord::clean(2));

    assert!(migrator.up().await.unwrap_err().is_no_change());

    migrator.down().await.unwrap();
    assert!(!table_exists(&url, &format!("{}.users", schema)).await);
    assert_eq!(migrator.version().await.unwrap(), VersionRecord::clean(0));

    migrator.into_backend().close().await.unwrap();
}

#[tokio::test]
async fn test_failed_step_rolls_back_and_marks_dirty() {
    let Some(url) = test_url() else { return };
    let schema = "strata_it_dirty";
    reset_schema(&url, schema).await;

    let source = EmbeddedSource::new([
        ("1_ok.up.sql".to_string(), format!("CREATE TABLE {}.ok (id INT);", schema)),
        (
            "2_broken.up.sql".to_string(),
            format!("CREATE TABLE {}.partial (id INT);\nSELEC 1;", schema),
        ),
        ("3_never.up.sql".to_string(), format!("CREATE TABLE {}.never (id INT);", schema)),
    ])
    .unwrap();

    let mut migrator = Migrator::new(source, connect(&url, schema).await);
    let err = migrator.up().await.unwrap_err();
    assert!(matches!(err, StrataError::Execution { version: 2, .. }));

    assert_eq!(migrator.version().await.unwrap(), VersionRecord::dirty(1));
    assert!(table_exists(&url, &format!("{}.ok", schema)).await);
    assert!(!table_exists(&url, &format!("{}.partial", schema)).await);
    assert!(!table_exists(&url, &format!("{}.never", schema)).await);

    assert!(matches!(
        migrator.up().await,
        Err(StrataError::Dirty { version: 1 })
    ));

    migrator.into_backend().close().await.unwrap();
}

#[tokio::test]
async fn test_no_transaction_script() {
    let Some(url) = test_url() else { return };
    let schema = "strata_it_no_tx";
    reset_schema(&url, schema).await;

    let source = EmbeddedSource::new([
        ("1_users.up.sql".to_string(), format!("CREATE TABLE {}.users (email TEXT);", schema)),
        (
            "2_index.up.sql".to_string(),
            format!(
                "-- strata:no-transaction\nCREATE INDEX CONCURRENTLY users_email_idx ON {}.users (email);",
                schema
            ),
        ),
    ])
    .unwrap();

    let mut migrator = Migrator::new(source, connect(&url, schema).await);
    migrator.up().await.unwrap();
    assert!(table_exists(&url, &format!("{}.users_email_idx", schema)).await);

    migrator.into_backend().close().await.unwrap();
}

#[tokio::test]
async fn test_second_session_times_out_on_lock() {
    let Some(url) = test_url() else { return };
    let schema = "strata_it_lock";
    reset_schema(&url, schema).await;

    let mut holder = connect(&url, schema).await;
    holder.lock(Duration::from_secs(30)).await.unwrap();

    let mut migrator = Migrator::new(users_source(schema), connect(&url, schema).await)
        .with_lock_timeout(Duration::from_millis(200));
    let err = migrator.up().await.unwrap_err();
    assert!(err.is_retryable());

    holder.unlock().await.unwrap();
    holder.close().await.unwrap();
    migrator.into_backend().close().await.unwrap();
}

#[tokio::test]
async fn test_transactional_execute_keeps_nothing_on_failure() {
    let Some(url) = test_url() else { return };
    let schema = "strata_it_execute_tx";
    reset_schema(&url, schema).await;

    let mut db = connect(&url, schema).await;
    db.initialize().await.unwrap();

    let statements = vec![
        format!("CREATE TABLE {}.first (id INT)", schema),
        "SELEC 1".to_string(),
        format!("CREATE TABLE {}.third (id INT)", schema),
    ];
    let err = db.execute(&statements, true).await.unwrap_err();
    assert!(err.to_string().contains("statement 2 of 3"));
    assert!(!table_exists(&url, &format!("{}.first", schema)).await);
    assert!(!table_exists(&url, &format!("{}.third", schema)).await);

    let err = db.execute(&statements, false).await.unwrap_err();
    assert!(err.to_string().contains("statement 2 of 3"));
    assert!(table_exists(&url, &format!("{}.first", schema)).await);
    assert!(!table_exists(&url, &format!("{}.third", schema)).await);

    assert_eq!(db.read().await.unwrap(), VersionRecord::clean(0));
    db.close().await.unwrap();
}
