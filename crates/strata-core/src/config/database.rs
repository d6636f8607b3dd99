use std::time::Duration;

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

static TABLE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").unwrap()
});

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL of the primary database.
    #[serde(default)]
    pub url: String,

    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Server-side statement timeout in seconds (0 keeps the server default).
    #[serde(default)]
    pub statement_timeout_secs: u64,

    /// How long to wait for the migration lock, in seconds.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,

    /// Name of the version table, optionally schema-qualified.
    #[serde(default = "default_table")]
    pub table: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout_secs: default_connect_timeout(),
            statement_timeout_secs: 0,
            lock_timeout_secs: default_lock_timeout(),
            table: default_table(),
        }
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Statement timeout, if one is configured.
    pub fn statement_timeout(&self) -> Option<Duration> {
        (self.statement_timeout_secs > 0).then(|| Duration::from_secs(self.statement_timeout_secs))
    }

    /// Check fields that are interpolated into SQL or required to connect.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(StrataError::Config(
                "Database URL is not set (use DATABASE_URL or [database].url)".into(),
            ));
        }
        if !TABLE_NAME.is_match(&self.table) {
            return Err(StrataError::Config(format!(
                "Invalid version table name: '{}'",
                self.table
            )));
        }
        Ok(())
    }
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_lock_timeout() -> u64 {
    15
}

fn default_table() -> String {
    "schema_migrations".to_string()
}
