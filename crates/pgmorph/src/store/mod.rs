//! Filesystem-backed migration store.
//!
//! Migrations live in one directory as `<version>_<name>.sql` files, with
//! optional `<version>_<name>.down.sql` companions. Files are append-only:
//! the store writes new migrations atomically and never rewrites existing
//! ones, so a recorded checksum stays valid until someone edits the file by
//! hand, which the executor then reports as drift.

use crate::error::{MorphError, Result};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A migration loaded from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Strictly positive, strictly increasing version.
    pub version: u64,

    /// snake_case migration name.
    pub name: String,

    /// Full DDL text.
    pub sql: String,

    /// Hex SHA-256 of the DDL text.
    pub checksum: String,

    /// Path of the migration file.
    pub path: PathBuf,
}

/// Hex SHA-256 of a DDL text.
pub fn checksum(sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Filesystem-backed, version-ordered migration store.
pub struct MigrationStore {
    dir: PathBuf,
}

impl MigrationStore {
    /// Create a store over the given migrations directory.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// The migrations directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load all migrations, sorted by version ascending.
    ///
    /// `.sql` files that do not match the `<version>_<name>.sql` pattern
    /// produce a warning and are skipped; files with other extensions are
    /// ignored outright. Duplicate versions or names are store errors.
    pub fn load_all(&self) -> Result<(Vec<Migration>, Vec<String>)> {
        let mut migrations = Vec::new();
        let mut warnings = Vec::new();

        if !self.dir.exists() {
            return Ok((migrations, warnings));
        }

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            // Down migrations are companions, not candidates.
            if file_name.ends_with(".down.sql") {
                continue;
            }
            if !file_name.ends_with(".sql") {
                continue;
            }
            match parse_file_name(file_name) {
                Some((version, name)) => {
                    let sql = fs::read_to_string(&path)?;
                    migrations.push(Migration {
                        version,
                        name,
                        checksum: checksum(&sql),
                        sql,
                        path,
                    });
                }
                None => warnings.push(format!(
                    "file '{}' does not match <version>_<name>.sql and was skipped",
                    file_name
                )),
            }
        }

        migrations.sort_by_key(|m| m.version);

        let mut versions = HashSet::new();
        let mut names = HashSet::new();
        for migration in &migrations {
            if !versions.insert(migration.version) {
                return Err(MorphError::Store(format!(
                    "two migrations share version {}",
                    migration.version
                )));
            }
            if !names.insert(migration.name.clone()) {
                return Err(MorphError::Store(format!(
                    "two migrations share the name '{}'",
                    migration.name
                )));
            }
        }

        debug!("loaded {} migrations from {}", migrations.len(), self.dir.display());
        Ok((migrations, warnings))
    }

    /// The version the next created migration will get.
    pub fn next_version(&self) -> Result<u64> {
        let (migrations, _) = self.load_all()?;
        Ok(migrations.last().map(|m| m.version + 1).unwrap_or(1))
    }

    /// Create a new migration file atomically: write to a `.tmp` sibling,
    /// fsync, then rename into place.
    pub fn create(&self, name: &str, sql: &str) -> Result<Migration> {
        if !is_snake_case(name) {
            return Err(MorphError::Store(format!(
                "migration name '{}' is not snake_case",
                name
            )));
        }
        fs::create_dir_all(&self.dir)?;

        let version = self.next_version()?;
        let mut sql = sql.to_string();
        if !sql.ends_with('\n') {
            sql.push('\n');
        }

        let file_name = format!("{}_{}.sql", version, name);
        let path = self.dir.join(&file_name);
        let tmp_path = self.dir.join(format!("{}.tmp", file_name));

        {
            use std::io::Write;
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(sql.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;

        debug!("created migration {}", path.display());
        Ok(Migration {
            version,
            name: name.to_string(),
            checksum: checksum(&sql),
            sql,
            path,
        })
    }

    /// Load the down migration for `migration`, if one exists on disk.
    pub fn load_down(&self, migration: &Migration) -> Result<Option<String>> {
        let path = self
            .dir
            .join(format!("{}_{}.down.sql", migration.version, migration.name));
        if path.exists() {
            Ok(Some(fs::read_to_string(path)?))
        } else {
            Ok(None)
        }
    }
}

/// Parse `<version>_<name>.sql` into its parts. The version is a positive
/// integer (leading zeros tolerated); the name must be snake_case.
fn parse_file_name(file_name: &str) -> Option<(u64, String)> {
    let stem = file_name.strip_suffix(".sql")?;
    let (version_part, name_part) = stem.split_once('_')?;
    if version_part.is_empty() || !version_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let version: u64 = version_part.parse().ok()?;
    if version == 0 || !is_snake_case(name_part) {
        return None;
    }
    Some((version, name_part.to_string()))
}

/// snake_case: a lowercase letter followed by lowercase letters, digits,
/// and underscores.
fn is_snake_case(name: &str) -> bool {
    let mut bytes = name.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_lowercase() => {}
        _ => return false,
    }
    name.bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}
