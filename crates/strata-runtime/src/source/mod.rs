//! Migration discovery.
//!
//! A source indexes migrations by version without loading their bodies;
//! scripts are read on demand when a step actually runs.

mod directory;
mod embedded;

pub use directory::DirectorySource;
pub use embedded::EmbeddedSource;

use strata_core::error::Result;
use strata_core::migration::{Direction, Migration, MigrationInfo, MigrationSet, Script, Version};

/// Something migrations can be read from.
pub trait MigrationSource: Send + Sync {
    /// All migrations, sorted ascending, with duplicate versions rejected.
    fn list(&self) -> Result<MigrationSet>;

    /// Load the script for one direction of one migration.
    fn read(&self, version: Version, direction: Direction) -> Result<Script>;

    /// Lazily load migrations in ascending order.
    ///
    /// Each call starts again from the first migration.
    fn stream(&self) -> Result<MigrationStream<'_, Self>>
    where
        Self: Sized,
    {
        let set = self.list()?;
        Ok(MigrationStream {
            source: self,
            entries: set.iter().cloned().collect::<Vec<_>>().into_iter(),
        })
    }
}

/// Iterator returned by [`MigrationSource::stream`].
pub struct MigrationStream<'a, S: ?Sized> {
    source: &'a S,
    entries: std::vec::IntoIter<MigrationInfo>,
}

impl<S: MigrationSource + ?Sized> Iterator for MigrationStream<'_, S> {
    type Item = Result<Migration>;

    fn next(&mut self) -> Option<Self::Item> {
        let info = self.entries.next()?;
        Some(load(self.source, info))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

fn load<S: MigrationSource + ?Sized>(source: &S, info: MigrationInfo) -> Result<Migration> {
    let up = if info.has_up {
        Some(source.read(info.version, Direction::Up)?)
    } else {
        None
    };
    let down = if info.has_down {
        Some(source.read(info.version, Direction::Down)?)
    } else {
        None
    };

    Ok(Migration {
        version: info.version,
        description: info.description,
        up,
        down,
    })
}
