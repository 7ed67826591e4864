//! Path classification
//!
//! Maps a changed path to the pipeline that owns it, after dropping editor
//! noise and the engine's own scratch directory.

use crate::error::AppResult;
use crate::files::{build_globset, watch_root};
use globset::GlobSet;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Migration files the watcher reacts to
pub const MIGRATION_GLOB: &str = "supabase/migrations/*.sql";

/// Editor backups, swap files, temp files and vim's `4913` write probe
const IGNORED_SUFFIXES: [&str; 4] = ["~", ".swp", ".tmp", "4913"];

/// Scratch directory written by the engine itself
const TEMP_PREFIX: &str = "supabase/.temp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeClass {
    Schema,
    Migration,
    Seed,
}

/// Debounced set of changed paths for one class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    pub class: ChangeClass,
    pub paths: Vec<PathBuf>,
}

/// True for paths no pipeline should ever see
pub fn is_ignored(relative: &Path) -> bool {
    if relative.starts_with(TEMP_PREFIX) {
        return true;
    }
    relative
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| IGNORED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)))
}

pub struct PathClassifier {
    schema: GlobSet,
    migration: GlobSet,
    seed: GlobSet,
    patterns: Vec<String>,
}

impl PathClassifier {
    /// Empty pattern lists disable a class
    pub fn new(schema_globs: &[String], seed_globs: &[String]) -> AppResult<Self> {
        let migration_globs = vec![MIGRATION_GLOB.to_string()];
        let patterns = schema_globs
            .iter()
            .chain(&migration_globs)
            .chain(seed_globs)
            .cloned()
            .collect();

        Ok(Self {
            schema: build_globset(schema_globs)?,
            migration: build_globset(&migration_globs)?,
            seed: build_globset(seed_globs)?,
            patterns,
        })
    }

    /// Class of a project-relative path. Migrations win over seeds, seeds over
    /// schemas, so a broad schema glob never captures the other two.
    pub fn classify(&self, relative: &Path) -> Option<ChangeClass> {
        if is_ignored(relative) {
            None
        } else if self.migration.is_match(relative) {
            Some(ChangeClass::Migration)
        } else if self.seed.is_match(relative) {
            Some(ChangeClass::Seed)
        } else if self.schema.is_match(relative) {
            Some(ChangeClass::Schema)
        } else {
            None
        }
    }

    /// Project-relative directories to watch, one per distinct pattern root
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        let roots: BTreeSet<PathBuf> = self.patterns.iter().map(|p| watch_root(p)).collect();
        roots.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn classifier() -> PathClassifier {
        PathClassifier::new(
            &["supabase/schemas/**/*.sql".to_string()],
            &["supabase/seed.sql".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_classes_by_root() {
        let c = classifier();
        assert_eq!(
            c.classify(Path::new("supabase/schemas/users.sql")),
            Some(ChangeClass::Schema)
        );
        assert_eq!(
            c.classify(Path::new("supabase/schemas/auth/roles.sql")),
            Some(ChangeClass::Schema)
        );
        assert_eq!(
            c.classify(Path::new("supabase/migrations/20240101000000_init.sql")),
            Some(ChangeClass::Migration)
        );
        assert_eq!(c.classify(Path::new("supabase/seed.sql")), Some(ChangeClass::Seed));
        assert_eq!(c.classify(Path::new("supabase/config.toml")), None);
        assert_eq!(c.classify(Path::new("supabase/schemas/notes.md")), None);
    }

    #[test]
    fn test_editor_noise_is_ignored() {
        let c = classifier();
        for noise in [
            "supabase/schemas/users.sql~",
            "supabase/schemas/.users.sql.swp",
            "supabase/schemas/users.sql.tmp",
            "supabase/schemas/4913",
        ] {
            assert!(is_ignored(Path::new(noise)), "{}", noise);
            assert_eq!(c.classify(Path::new(noise)), None, "{}", noise);
        }
    }

    #[test]
    fn test_temp_dir_is_ignored() {
        let c = PathClassifier::new(&["supabase/**/*.sql".to_string()], &[]).unwrap();
        assert_eq!(c.classify(Path::new("supabase/.temp/x.sql")), None);
        assert_eq!(
            c.classify(Path::new("supabase/functions/x.sql")),
            Some(ChangeClass::Schema)
        );
    }

    #[test]
    fn test_specific_classes_win_over_broad_schema_glob() {
        let c = PathClassifier::new(
            &["supabase/**/*.sql".to_string()],
            &["supabase/seed.sql".to_string()],
        )
        .unwrap();
        assert_eq!(
            c.classify(Path::new("supabase/migrations/20240101000000_a.sql")),
            Some(ChangeClass::Migration)
        );
        assert_eq!(c.classify(Path::new("supabase/seed.sql")), Some(ChangeClass::Seed));
    }

    #[test]
    fn test_disabled_class_never_matches() {
        let c = PathClassifier::new(&[], &[]).unwrap();
        assert_eq!(c.classify(Path::new("supabase/schemas/users.sql")), None);
        assert_eq!(c.classify(Path::new("supabase/seed.sql")), None);
    }

    #[test]
    fn test_watch_roots_are_deduplicated() {
        assert_eq!(
            classifier().watch_roots(),
            vec![
                PathBuf::from("supabase"),
                PathBuf::from("supabase/migrations"),
                PathBuf::from("supabase/schemas"),
            ]
        );
    }
}
