//! Core types for the strata migration engine: errors, configuration, the
//! migration data model, step planning and the store/driver seams.

pub mod backend;
pub mod config;
pub mod error;
pub mod migration;
pub mod plan;
pub mod sql;

pub use backend::{Driver, VersionStore};
pub use config::{DatabaseConfig, MigrationsConfig, StrataConfig};
pub use error::{Result, StrataError};
pub use migration::{
    Direction, Migration, MigrationInfo, MigrationSet, Script, Version, VersionRecord,
};
pub use plan::{PlannedStep, StepPlan, Target};
