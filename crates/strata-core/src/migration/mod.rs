mod name;

pub use name::{parse_file_name, MigrationFileName};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::sql::split_sql_statements;

/// Migration version. `0` means "nothing applied" and is never a migration.
pub type Version = u64;

/// Directive that opts a script out of the surrounding transaction.
pub const NO_TRANSACTION_DIRECTIVE: &str = "-- strata:no-transaction";

/// Direction a migration is applied in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// File name suffix for this direction.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The statement-set for one direction of one migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    /// Raw SQL body.
    pub body: String,
    /// Whether the statements run inside a single transaction.
    pub transactional: bool,
}

impl Script {
    /// Create a script, honouring the no-transaction directive on its first
    /// non-blank line.
    pub fn new(body: impl Into<String>) -> Self {
        let body = body.into();
        let transactional = body
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(|l| !l.eq_ignore_ascii_case(NO_TRANSACTION_DIRECTIVE))
            .unwrap_or(true);

        Self {
            body,
            transactional,
        }
    }

    /// Individual statements of the body, comments-only fragments removed.
    pub fn statements(&self) -> Vec<String> {
        split_sql_statements(&self.body)
    }
}

/// A fully loaded migration.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: Version,
    pub description: String,
    pub up: Option<Script>,
    pub down: Option<Script>,
}

impl Migration {
    /// The script for `direction`, if this migration supports it.
    pub fn script(&self, direction: Direction) -> Option<&Script> {
        match direction {
            Direction::Up => self.up.as_ref(),
            Direction::Down => self.down.as_ref(),
        }
    }
}

/// Index entry for a discovered migration. Bodies are loaded on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationInfo {
    pub version: Version,
    pub description: String,
    pub has_up: bool,
    pub has_down: bool,
}

impl MigrationInfo {
    /// Whether a script exists for `direction`.
    pub fn supports(&self, direction: Direction) -> bool {
        match direction {
            Direction::Up => self.has_up,
            Direction::Down => self.has_down,
        }
    }
}

/// Ordered set of migrations with unique versions.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    entries: Vec<MigrationInfo>,
}

impl MigrationSet {
    /// Build a set from parsed file names, pairing up and down files per
    /// version.
    pub fn from_file_names<I>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = MigrationFileName>,
    {
        let mut by_version: BTreeMap<Version, MigrationInfo> = BTreeMap::new();

        for file in names {
            let entry = by_version
                .entry(file.version)
                .or_insert_with(|| MigrationInfo {
                    version: file.version,
                    description: file.description.clone(),
                    has_up: false,
                    has_down: false,
                });

            if entry.description != file.description {
                return Err(StrataError::Source(format!(
                    "Migration {} has mismatched descriptions: '{}' and '{}'",
                    file.version, entry.description, file.description
                )));
            }

            let slot = match file.direction {
                Direction::Up => &mut entry.has_up,
                Direction::Down => &mut entry.has_down,
            };
            if *slot {
                return Err(StrataError::Source(format!(
                    "Duplicate {} migration for version {}",
                    file.direction, file.version
                )));
            }
            *slot = true;
        }

        Ok(Self {
            entries: by_version.into_values().collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending version order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &MigrationInfo> {
        self.entries.iter()
    }

    /// Look up an entry by version.
    pub fn get(&self, version: Version) -> Option<&MigrationInfo> {
        self.entries
            .binary_search_by_key(&version, |m| m.version)
            .ok()
            .map(|idx| &self.entries[idx])
    }

    pub fn contains(&self, version: Version) -> bool {
        self.get(version).is_some()
    }

    /// Highest version in the set, or 0 when empty.
    pub fn latest(&self) -> Version {
        self.entries.last().map(|m| m.version).unwrap_or(0)
    }

    /// The version directly below `version` in the set, or 0.
    pub fn previous(&self, version: Version) -> Version {
        self.entries
            .iter()
            .rev()
            .map(|m| m.version)
            .find(|v| *v < version)
            .unwrap_or(0)
    }
}

impl<'a> IntoIterator for &'a MigrationSet {
    type Item = &'a MigrationInfo;
    type IntoIter = std::slice::Iter<'a, MigrationInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// The persisted migration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VersionRecord {
    pub version: Version,
    pub dirty: bool,
}

impl VersionRecord {
    pub fn clean(version: Version) -> Self {
        Self {
            version,
            dirty: false,
        }
    }

    pub fn dirty(version: Version) -> Self {
        Self {
            version,
            dirty: true,
        }
    }
}

impl fmt::Display for VersionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dirty {
            write!(f, "{} (dirty)", self.version)
        } else {
            write!(f, "{}", self.version)
        }
    }
}
