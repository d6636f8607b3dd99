//! Testing utilities for strata.
//!
//! [`MemoryBackend`] stands in for a database so migrator behaviour can be
//! exercised without PostgreSQL.

mod memory;

pub use memory::MemoryBackend;

use strata_core::error::Result;

use crate::source::EmbeddedSource;

/// Build a source where every version gets an up and a down script that
/// record themselves, e.g. `CREATE TABLE t1` / `DROP TABLE t1`.
pub fn reversible_source(versions: &[u64]) -> Result<EmbeddedSource> {
    EmbeddedSource::new(versions.iter().flat_map(|v| {
        [
            (format!("{}_m{}.up.sql", v, v), format!("CREATE TABLE t{};", v)),
            (format!("{}_m{}.down.sql", v, v), format!("DROP TABLE t{};", v)),
        ]
    }))
}

/// Build a source where every version only has an up script.
pub fn up_only_source(versions: &[u64]) -> Result<EmbeddedSource> {
    EmbeddedSource::new(
        versions
            .iter()
            .map(|v| (format!("{}_m{}.up.sql", v, v), format!("CREATE TABLE t{};", v))),
    )
}
