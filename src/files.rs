//! Project file helpers
//!
//! Glob expansion over the project tree, content hashing and atomic writes.

use crate::error::{AppError, AppResult};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const GLOB_META: [char; 4] = ['*', '?', '[', '{'];

fn normalize(pattern: &str) -> &str {
    pattern.trim_start_matches("./")
}

/// Build a matcher where `*` never crosses a path separator
pub fn build_globset(patterns: &[String]) -> AppResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(normalize(pattern))
            .literal_separator(true)
            .build()
            .map_err(|e| AppError::Config(format!("invalid glob {:?}: {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| AppError::Config(format!("invalid glob set: {}", e)))
}

/// Leading path components of a pattern that contain no glob syntax
pub fn glob_base(pattern: &str) -> PathBuf {
    normalize(pattern)
        .split('/')
        .take_while(|component| !component.contains(GLOB_META))
        .collect()
}

/// Directory to watch for a pattern: its literal base, or the parent of a plain file path
pub fn watch_root(pattern: &str) -> PathBuf {
    let base = glob_base(pattern);
    if normalize(pattern).contains(GLOB_META) {
        base
    } else {
        base.parent().map(Path::to_path_buf).unwrap_or_default()
    }
}

/// All files under `root` matching any pattern, relative to `root`, sorted lexicographically
pub fn expand_globs(root: &Path, patterns: &[String]) -> AppResult<Vec<PathBuf>> {
    let matcher = build_globset(patterns)?;
    let mut found = BTreeSet::new();

    for pattern in patterns {
        let base = root.join(glob_base(pattern));
        if !base.exists() {
            continue;
        }
        for entry in WalkDir::new(&base).follow_links(true) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| base.clone());
                AppError::fs(path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(root) {
                if matcher.is_match(relative) {
                    found.insert(relative.to_path_buf());
                }
            }
        }
    }

    Ok(found.into_iter().collect())
}

/// Hex SHA-256 of a byte slice
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Write `contents` to `target` via a temp file in `temp_dir` and a rename
pub fn write_atomic(target: &Path, contents: &[u8], temp_dir: &Path) -> AppResult<()> {
    std::fs::create_dir_all(temp_dir).map_err(|e| AppError::fs(temp_dir, e))?;
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| AppError::fs(parent, e))?;
    }

    let mut tmp = tempfile::NamedTempFile::new_in(temp_dir).map_err(|e| AppError::fs(temp_dir, e))?;
    tmp.write_all(contents).map_err(|e| AppError::fs(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| AppError::fs(tmp.path(), e))?;
    tmp.persist(target).map_err(|e| AppError::fs(target, e.error))?;
    Ok(())
}
