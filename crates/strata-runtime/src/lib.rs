pub mod db;
pub mod migrator;
pub mod source;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use db::Database;
pub use migrator::{AppliedStep, MigrationReport, MigrationStatus, Migrator};
pub use source::{DirectorySource, EmbeddedSource, MigrationSource, MigrationStream};
