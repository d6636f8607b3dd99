use once_cell::sync::Lazy;
use regex_lite::Regex;

use super::{Direction, Version};
use crate::error::{Result, StrataError};

/// `{version}_{description}.{up|down}.{ext}`
static FILE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]+)_(.+)\.(up|down)\.([^.]+)$").unwrap());

/// A parsed migration file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFileName {
    pub version: Version,
    pub description: String,
    pub direction: Direction,
}

/// Parse a migration file name.
///
/// Returns `Ok(None)` for names that are not migrations at all (READMEs,
/// editor backups) and an error for names that look like migrations but
/// carry an unusable version.
pub fn parse_file_name(name: &str) -> Result<Option<MigrationFileName>> {
    let Some(caps) = FILE_NAME.captures(name) else {
        return Ok(None);
    };

    let version: Version = caps[1]
        .parse()
        .map_err(|e| StrataError::Source(format!("Invalid version in '{}': {}", name, e)))?;

    if version == 0 {
        return Err(StrataError::Source(format!(
            "Invalid version in '{}': version 0 is reserved",
            name
        )));
    }

    // The version column is a BIGINT.
    if version > i64::MAX as Version {
        return Err(StrataError::Source(format!(
            "Invalid version in '{}': {} exceeds the largest storable version {}",
            name,
            version,
            i64::MAX
        )));
    }

    let direction = match &caps[3] {
        "up" => Direction::Up,
        _ => Direction::Down,
    };

    Ok(Some(MigrationFileName {
        version,
        description: caps[2].to_string(),
        direction,
    }))
}
