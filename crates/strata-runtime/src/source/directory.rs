use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use strata_core::error::{Result, StrataError};
use strata_core::migration::{parse_file_name, Direction, MigrationSet, Script, Version};
use tracing::debug;

use super::MigrationSource;

type PathIndex = BTreeMap<(Version, Direction), PathBuf>;

/// Migrations stored as files in a directory.
///
/// Files are named `{version}_{description}.{up|down}.{ext}`, e.g.
/// `0001_create_users.up.sql` / `0001_create_users.down.sql`. Other files
/// are ignored.
pub struct DirectorySource {
    dir: PathBuf,
    index: RwLock<Option<PathIndex>>,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            index: RwLock::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn scan(&self) -> Result<(MigrationSet, PathIndex)> {
        if !self.dir.exists() {
            debug!("Migrations directory does not exist: {:?}", self.dir);
            return Ok((MigrationSet::default(), PathIndex::new()));
        }

        let mut names = Vec::new();
        let mut paths = PathIndex::new();

        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            StrataError::Source(format!("Failed to read {}: {}", self.dir.display(), e))
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                StrataError::Source(format!("Failed to read {}: {}", self.dir.display(), e))
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
                debug!("Skipping non UTF-8 file name: {:?}", path);
                continue;
            };

            match parse_file_name(file_name)? {
                Some(parsed) => {
                    paths.insert((parsed.version, parsed.direction), path.clone());
                    names.push(parsed);
                }
                None => debug!("Skipping non-migration file: {}", file_name),
            }
        }

        let set = MigrationSet::from_file_names(names)?;
        debug!("Indexed {} migrations in {:?}", set.len(), self.dir);
        Ok((set, paths))
    }

    fn path_for(&self, version: Version, direction: Direction) -> Result<Option<PathBuf>> {
        {
            let index = self
                .index
                .read()
                .map_err(|_| StrataError::Source("Migration index lock poisoned".into()))?;
            if let Some(index) = index.as_ref() {
                return Ok(index.get(&(version, direction)).cloned());
            }
        }

        let (_, paths) = self.scan()?;
        let path = paths.get(&(version, direction)).cloned();
        self.store_index(paths)?;
        Ok(path)
    }

    fn store_index(&self, paths: PathIndex) -> Result<()> {
        let mut index = self
            .index
            .write()
            .map_err(|_| StrataError::Source("Migration index lock poisoned".into()))?;
        *index = Some(paths);
        Ok(())
    }
}

impl MigrationSource for DirectorySource {
    fn list(&self) -> Result<MigrationSet> {
        let (set, paths) = self.scan()?;
        self.store_index(paths)?;
        Ok(set)
    }

    fn read(&self, version: Version, direction: Direction) -> Result<Script> {
        let path = self.path_for(version, direction)?.ok_or_else(|| {
            StrataError::Source(format!(
                "No {} migration for version {} in {}",
                direction,
                version,
                self.dir.display()
            ))
        })?;

        let bytes = std::fs::read(&path).map_err(|e| {
            StrataError::Source(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let body = String::from_utf8(bytes).map_err(|_| {
            StrataError::Source(format!("{} is not valid UTF-8", path.display()))
        })?;

        Ok(Script::new(body))
    }
}
