use std::fmt;
use std::time::Duration;

use strata_core::migration::{Direction, MigrationInfo, Version, VersionRecord};

/// A migration step that completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedStep {
    pub version: Version,
    pub description: String,
    pub direction: Direction,
    pub elapsed: Duration,
}

/// Outcome of a migrating call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub direction: Direction,
    /// Version before the call.
    pub from: Version,
    /// Version after the call.
    pub to: Version,
    pub steps: Vec<AppliedStep>,
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.steps.len() == 1 {
            "migration"
        } else {
            "migrations"
        };
        write!(
            f,
            "applied {} {} {} ({} -> {})",
            self.steps.len(),
            self.direction,
            noun,
            self.from,
            self.to
        )
    }
}

/// Applied and pending migrations relative to the stored version.
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub current: VersionRecord,
    /// Ascending.
    pub applied: Vec<MigrationInfo>,
    /// Ascending.
    pub pending: Vec<MigrationInfo>,
}

impl MigrationStatus {
    /// Whether the database is at the latest known version.
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty() && !self.current.dirty
    }
}
