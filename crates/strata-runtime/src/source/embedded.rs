use std::collections::BTreeMap;

use strata_core::error::{Result, StrataError};
use strata_core::migration::{parse_file_name, Direction, MigrationSet, Script, Version};

use super::MigrationSource;

/// Migrations held in memory, keyed by their file names.
///
/// Useful for bundling migrations into the binary:
///
/// ```ignore
/// let source = EmbeddedSource::new([
///     ("0001_create_users.up.sql", include_str!("../migrations/0001_create_users.up.sql")),
///     ("0001_create_users.down.sql", include_str!("../migrations/0001_create_users.down.sql")),
/// ])?;
/// ```
#[derive(Debug, Clone)]
pub struct EmbeddedSource {
    set: MigrationSet,
    bodies: BTreeMap<(Version, Direction), String>,
}

impl EmbeddedSource {
    /// Build a source from `(file name, body)` pairs. Names follow the same
    /// convention as on disk; names that are not migrations are rejected.
    pub fn new<I, N, B>(files: I) -> Result<Self>
    where
        I: IntoIterator<Item = (N, B)>,
        N: AsRef<str>,
        B: Into<String>,
    {
        let mut names = Vec::new();
        let mut bodies = BTreeMap::new();

        for (name, body) in files {
            let name = name.as_ref();
            let parsed = parse_file_name(name)?.ok_or_else(|| {
                StrataError::Source(format!("'{}' is not a migration file name", name))
            })?;
            bodies.insert((parsed.version, parsed.direction), body.into());
            names.push(parsed);
        }

        let set = MigrationSet::from_file_names(names)?;
        Ok(Self { set, bodies })
    }
}

impl MigrationSource for EmbeddedSource {
    fn list(&self) -> Result<MigrationSet> {
        Ok(self.set.clone())
    }

    fn read(&self, version: Version, direction: Direction) -> Result<Script> {
        self.bodies
            .get(&(version, direction))
            .map(|body| Script::new(body.clone()))
            .ok_or_else(|| {
                StrataError::Source(format!(
                    "No {} migration for version {}",
                    direction, version
                ))
            })
    }
}
