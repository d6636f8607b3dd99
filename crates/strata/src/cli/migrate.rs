use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use tracing::{info, warn};

use strata_core::config::StrataConfig;
use strata_core::error::StrataError;
use strata_core::migration::Version;
use strata_runtime::{Database, DirectorySource, MigrationReport, Migrator};

/// What the invocation asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Up,
    Down,
    Steps(i64),
    Goto(Version),
    Force(Version),
    Status,
}

impl Action {
    fn label(&self) -> &'static str {
        match self {
            Action::Up => "Up migrations",
            Action::Down => "Down migrations",
            Action::Steps(n) if *n >= 0 => "Step up migrations",
            Action::Steps(_) => "Step down migrations",
            Action::Goto(_) => "Goto migrations",
            Action::Force(_) => "Force",
            Action::Status => "Status",
        }
    }
}

type DirMigrator = Migrator<DirectorySource, Database>;

/// Connect, run `action`, print one status line, close.
pub async fn run(config: &StrataConfig, action: Action, timeout: Option<Duration>) -> Result<()> {
    let db = Database::connect(&config.database).await?;
    let source = DirectorySource::new(&config.migrations.dir);
    let mut migrator =
        Migrator::new(source, db).with_lock_timeout(config.database.lock_timeout());
    info!("Using migrations from {}", migrator.source().dir().display());

    let result = match timeout {
        Some(limit) => {
            let timed = tokio::time::timeout(limit, dispatch(&mut migrator, action)).await;
            match timed {
                Ok(result) => result,
                // Returning drops the migrator, which closes the connection
                // mid-statement; the server aborts whatever was running.
                Err(_) => anyhow::bail!(
                    "{} timed out after {:?}; the database may be left dirty",
                    action.label(),
                    limit
                ),
            }
        }
        None => dispatch(&mut migrator, action).await,
    };

    if let Err(e) = migrator.into_backend().close().await {
        warn!("Failed to close database connection: {}", e);
    }

    result
}

async fn dispatch(migrator: &mut DirMigrator, action: Action) -> Result<()> {
    let outcome = match action {
        Action::Up => migrator.up().await,
        Action::Down => migrator.down().await,
        Action::Steps(n) => migrator.steps(n).await,
        Action::Goto(version) => migrator.goto(version).await,
        Action::Force(version) => {
            migrator
                .force(version)
                .await
                .with_context(|| format!("Failed to force version {}", version))?;
            println!(
                "  {} Forced version {} (dirty flag cleared)",
                style("✓").green(),
                version
            );
            return Ok(());
        }
        Action::Status => return print_status(migrator).await,
    };

    report(migrator, action, outcome).await
}

async fn report(
    migrator: &mut DirMigrator,
    action: Action,
    outcome: strata_core::Result<MigrationReport>,
) -> Result<()> {
    match outcome {
        Ok(report) => {
            println!(
                "  {} {} applied successfully: {}",
                style("✓").green(),
                action.label(),
                report
            );
            Ok(())
        }
        Err(e) if e.is_no_change() => {
            let current = migrator.version().await?;
            println!(
                "  {} No change: database is at version {}",
                style("ℹ").blue(),
                current
            );
            Ok(())
        }
        Err(e @ StrataError::Dirty { .. }) => Err(e).context(format!(
            "Failed to apply {}; inspect the database, then run `strata --force VERSION`",
            action.label().to_lowercase()
        )),
        Err(e) => Err(e).context(format!("Failed to apply {}", action.label().to_lowercase())),
    }
}

async fn print_status(migrator: &mut DirMigrator) -> Result<()> {
    let status = migrator.status().await?;

    for m in &status.applied {
        println!(
            "    {} {} {}",
            style("✓").green(),
            m.version,
            style(&m.description).cyan()
        );
    }
    for m in &status.pending {
        let down_marker = if m.has_down { "" } else { " (no down)" };
        println!(
            "    {} {} {}{}",
            style("○").yellow(),
            m.version,
            style(&m.description).yellow(),
            style(down_marker).dim()
        );
    }

    let marker = if status.current.dirty {
        style("✗").red()
    } else {
        style("ℹ").blue()
    };
    println!(
        "  {} Version {}: {} applied, {} pending",
        marker,
        status.current,
        status.applied.len(),
        status.pending.len()
    );
    Ok(())
}
