//! Migration file store
//!
//! Enumerates `<YYYYMMDDHHMMSS>_<slug>.sql` files, hashes the set for
//! template-cache validation and splits files into statements.

use crate::error::{user_error, AppError, AppResult};
use crate::files::write_atomic;
use crate::sql::{split_statements, SqlStatement};
use chrono::{DateTime, Duration, NaiveDateTime, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Timestamp layout of a migration version
pub const VERSION_FORMAT: &str = "%Y%m%d%H%M%S";

static MIGRATION_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{14})_(.+)\.sql$").expect("valid migration name pattern"));
static SLUG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid slug pattern"));

/// A migration file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub version: String,
    pub slug: String,
    pub filename: String,
    pub path: PathBuf,
}

impl MigrationFile {
    fn from_path(path: PathBuf) -> Option<Self> {
        let filename = path.file_name()?.to_str()?.to_string();
        let caps = MIGRATION_NAME.captures(&filename)?;
        NaiveDateTime::parse_from_str(&caps[1], VERSION_FORMAT).ok()?;
        Some(Self {
            version: caps[1].to_string(),
            slug: caps[2].to_string(),
            filename,
            path,
        })
    }

    pub fn read(&self) -> AppResult<String> {
        std::fs::read_to_string(&self.path).map_err(|e| AppError::fs(&self.path, e))
    }
}

/// Reject slugs that would escape the migrations directory or break the name pattern
pub fn validate_slug(slug: &str) -> AppResult<()> {
    if SLUG.is_match(slug) {
        Ok(())
    } else {
        Err(user_error(format!(
            "invalid migration name {:?}: use letters, digits, '_' and '-'",
            slug
        )))
    }
}

pub struct MigrationStore {
    dir: PathBuf,
}

impl MigrationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Migration files ordered by version, then slug. A missing directory is an empty set.
    pub fn list(&self) -> AppResult<Vec<MigrationFile>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::fs(&self.dir, e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| AppError::fs(&self.dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match MigrationFile::from_path(path) {
                Some(file) => files.push(file),
                None => debug!(
                    "Skipping {:?}: file name must match <YYYYMMDDHHMMSS>_<name>.sql",
                    entry.file_name()
                ),
            }
        }

        files.sort_by(|a, b| (&a.version, &a.slug).cmp(&(&b.version, &b.slug)));
        Ok(files)
    }

    /// SHA-256 over the current migration set
    pub fn hash(&self) -> AppResult<String> {
        Self::hash_files(&self.list()?)
    }

    /// SHA-256 over length-prefixed `(filename, content)` pairs in filename order
    pub fn hash_files(files: &[MigrationFile]) -> AppResult<String> {
        let mut sorted: Vec<&MigrationFile> = files.iter().collect();
        sorted.sort_by(|a, b| a.filename.cmp(&b.filename));

        let mut hasher = Sha256::new();
        for file in sorted {
            let content = std::fs::read(&file.path).map_err(|e| AppError::fs(&file.path, e))?;
            hasher.update((file.filename.len() as u64).to_be_bytes());
            hasher.update(file.filename.as_bytes());
            hasher.update((content.len() as u64).to_be_bytes());
            hasher.update(&content);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Split a migration file into its statements
    pub fn parse(&self, file: &MigrationFile) -> AppResult<Vec<SqlStatement>> {
        Ok(split_statements(&file.read()?))
    }

    /// Two files sharing a timestamp make the history ambiguous
    pub fn check_unique_versions(files: &[MigrationFile]) -> AppResult<()> {
        for pair in files.windows(2) {
            if pair[0].version == pair[1].version {
                return Err(user_error(format!(
                    "duplicate migration version {}: {} and {}",
                    pair[0].version, pair[0].filename, pair[1].filename
                )));
            }
        }
        Ok(())
    }

    /// `max(now, last + 1s)` so a new version is strictly greater than every existing one
    pub fn next_version(files: &[MigrationFile], now: DateTime<Utc>) -> String {
        let now = now
            .naive_utc()
            .with_nanosecond(0)
            .unwrap_or_else(|| now.naive_utc());
        let latest = files
            .iter()
            .filter_map(|f| NaiveDateTime::parse_from_str(&f.version, VERSION_FORMAT).ok())
            .max();

        let version = match latest {
            Some(last) if now <= last => last + Duration::seconds(1),
            _ => now,
        };
        version.format(VERSION_FORMAT).to_string()
    }

    /// Write a new migration atomically and return it
    pub fn create(
        &self,
        slug: &str,
        sql: &str,
        now: DateTime<Utc>,
        temp_dir: &Path,
    ) -> AppResult<MigrationFile> {
        validate_slug(slug)?;
        let existing = self.list()?;
        let version = Self::next_version(&existing, now);
        let filename = format!("{}_{}.sql", version, slug);
        let path = self.dir.join(&filename);

        write_atomic(&path, sql.as_bytes(), temp_dir)?;
        debug!("Created migration {}", path.display());

        Ok(MigrationFile {
            version,
            slug: slug.to_string(),
            filename,
            path,
        })
    }
}
