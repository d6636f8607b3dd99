mod migrate;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, ArgGroup, Parser};
use console::style;

use strata_core::config::StrataConfig;
use strata_core::migration::Version;

pub use migrate::Action;

/// strata - versioned schema migrations for PostgreSQL
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("action")
        .args(["up", "down", "step", "goto", "force", "status"])
        .multiple(false)
))]
pub struct Cli {
    /// Apply all up migrations.
    #[arg(long)]
    pub up: bool,

    /// Apply all down migrations.
    #[arg(long)]
    pub down: bool,

    /// Number of migrations to apply. Use a positive number for up and a
    /// negative number for down.
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    pub step: Option<i64>,

    /// Migrate up or down to an exact version.
    #[arg(long, value_name = "VERSION")]
    pub goto: Option<Version>,

    /// Record VERSION as current and clear the dirty flag, without running
    /// any migration.
    #[arg(long, value_name = "VERSION")]
    pub force: Option<Version>,

    /// Show applied and pending migrations.
    #[arg(long)]
    pub status: bool,

    /// Configuration file path (used only if it exists).
    #[arg(short, long, default_value = "strata.toml")]
    pub config: PathBuf,

    /// Migrations directory (overrides config).
    #[arg(short, long)]
    pub path: Option<PathBuf>,

    /// Abort the whole run after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Enable debug logging.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// The requested action, `None` when no action flag was given.
    pub fn action(&self) -> Option<Action> {
        if self.up {
            Some(Action::Up)
        } else if self.down {
            Some(Action::Down)
        } else if let Some(n) = self.step {
            Some(Action::Steps(n))
        } else if let Some(version) = self.goto {
            Some(Action::Goto(version))
        } else if let Some(version) = self.force {
            Some(Action::Force(version))
        } else if self.status {
            Some(Action::Status)
        } else {
            None
        }
    }

    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        init_tracing(self.log_level());

        // Load .env if present
        dotenvy::dotenv().ok();

        let Some(action) = self.action() else {
            println!(
                "  {} No migration flags provided. Use --up, --down or --step.",
                style("ℹ").blue()
            );
            return Ok(());
        };

        let config = self.load_config()?;
        let timeout = self.timeout.map(Duration::from_secs);

        migrate::run(&config, action, timeout).await
    }

    /// Default log filter when RUST_LOG is not set.
    fn log_level(&self) -> &'static str {
        if self.verbose > 0 {
            "debug"
        } else {
            "info"
        }
    }

    /// Config file if present, then DATABASE_URL and --path overrides.
    fn load_config(&self) -> Result<StrataConfig> {
        let mut config = if Path::new(&self.config).exists() {
            StrataConfig::from_file(&self.config)
                .with_context(|| format!("Failed to load {}", self.config.display()))?
        } else {
            StrataConfig::default()
        };

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                config.database.url = url;
            }
        }

        if let Some(path) = &self.path {
            config.migrations.dir = path.clone();
        }

        if config.database.url.is_empty() {
            anyhow::bail!("DATABASE_URL environment variable not set.");
        }

        Ok(config)
    }
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string()))
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_parse_up() {
        assert_eq!(parse(&["strata", "--up"]).action(), Some(Action::Up));
    }

    #[test]
    fn test_cli_parse_negative_step() {
        assert_eq!(
            parse(&["strata", "--step", "-2"]).action(),
            Some(Action::Steps(-2))
        );
        assert_eq!(
            parse(&["strata", "--step=3"]).action(),
            Some(Action::Steps(3))
        );
    }

    #[test]
    fn test_cli_step_zero_is_distinct_from_absent() {
        assert_eq!(
            parse(&["strata", "--step", "0"]).action(),
            Some(Action::Steps(0))
        );
        assert_eq!(parse(&["strata"]).action(), None);
    }

    #[test]
    fn test_cli_actions_are_exclusive() {
        assert!(Cli::try_parse_from(["strata", "--up", "--down"]).is_err());
        assert!(Cli::try_parse_from(["strata", "--up", "--step", "1"]).is_err());
    }

    #[test]
    fn test_cli_parse_force_and_path() {
        let cli = parse(&["strata", "--force", "20240101", "-p", "db/migrations", "-vv"]);
        assert_eq!(cli.action(), Some(Action::Force(20240101)));
        assert_eq!(cli.path, Some(PathBuf::from("db/migrations")));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_level(), "debug");
    }

    #[test]
    fn test_default_log_level_is_info() {
        assert_eq!(parse(&["strata", "--up"]).log_level(), "info");
    }

    #[test]
    fn test_load_config_from_file_with_path_override() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("strata.toml");
        std::fs::write(
            &config_path,
            r#"
                [database]
                url = "postgres://localhost/from_file"
                lock_timeout_secs = 3

                [migrations]
                dir = "sql"
            "#,
        )
        .unwrap();

        let cli = parse(&[
            "strata",
            "--up",
            "--config",
            config_path.to_str().unwrap(),
            "--path",
            "other",
        ]);
        let config = cli.load_config().unwrap();
        assert_eq!(config.database.lock_timeout_secs, 3);
        assert_eq!(config.migrations.dir, PathBuf::from("other"));
        assert!(!config.database.url.is_empty());
    }
}
