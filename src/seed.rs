//! Seed runner
//!
//! Applies the configured seed files to the local database. Cached mode skips
//! files whose content hash matches the recorded one; dev-override mode
//! always re-executes. Seeds are never truncated first: seed files own their
//! idempotence.

use crate::cancel::CancellationToken;
use crate::db::{execute_statements, queries};
use crate::error::{AppError, AppResult};
use crate::files::{content_hash, expand_globs};
use crate::migration::history::ensure_history_schema;
use crate::sql::split_statements;
use deadpool_postgres::Pool;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedMode {
    /// Skip files whose hash is unchanged
    Cached,
    /// Always execute, used by the dev session
    DevOverride,
}

/// Whether a seed file must run given its recorded and current hashes
pub fn should_apply(mode: SeedMode, recorded: Option<&str>, current: &str) -> bool {
    match mode {
        SeedMode::DevOverride => true,
        SeedMode::Cached => recorded != Some(current),
    }
}

#[derive(Debug, Default)]
pub struct SeedReport {
    pub applied: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

pub struct SeedRunner {
    pool: Pool,
    project_root: PathBuf,
    patterns: Vec<String>,
}

impl SeedRunner {
    pub fn new(pool: Pool, project_root: impl Into<PathBuf>, patterns: Vec<String>) -> Self {
        Self {
            pool,
            project_root: project_root.into(),
            patterns,
        }
    }

    /// Seed files in application order, relative to the project root
    pub fn files(&self) -> AppResult<Vec<PathBuf>> {
        expand_globs(&self.project_root, &self.patterns)
    }

    /// Run every seed file. Each file executes in its own transaction together
    /// with its hash upsert; the first failing file stops the run.
    pub async fn run(&self, mode: SeedMode, cancel: &CancellationToken) -> AppResult<SeedReport> {
        let files = self.files()?;
        let mut report = SeedReport::default();
        if files.is_empty() {
            debug!("No seed files matched {:?}", self.patterns);
            return Ok(report);
        }

        let mut client = self.pool.get().await?;
        ensure_history_schema(&client).await?;

        for relative in files {
            cancel.check()?;
            let key = relative.to_string_lossy().to_string();
            let absolute = self.project_root.join(&relative);
            let sql = std::fs::read_to_string(&absolute).map_err(|e| AppError::fs(&absolute, e))?;
            let hash = content_hash(sql.as_bytes());

            let recorded: Option<String> = client
                .query_opt(queries::GET_SEED_HASH, &[&key])
                .await?
                .map(|row| row.get(0));

            if !should_apply(mode, recorded.as_deref(), &hash) {
                debug!("Seed {} unchanged, skipping", key);
                report.skipped.push(relative);
                continue;
            }

            info!("🌱 Seeding data from {}", key);
            let statements = split_statements(&sql);
            let transaction = client.transaction().await?;
            execute_statements(
                &transaction,
                statements.iter().map(|s| s.text.as_str()).collect::<Vec<_>>(),
                cancel,
            )
            .await
            .map_err(|e| seed_error(&relative, e))?;
            transaction
                .execute(queries::UPSERT_SEED_HASH, &[&key, &hash])
                .await?;
            transaction.commit().await?;

            report.applied.push(relative);
        }

        Ok(report)
    }
}

fn seed_error(path: &Path, err: AppError) -> AppError {
    match err {
        AppError::Cancelled => AppError::Cancelled,
        AppError::ApplyFailed {
            statement_index,
            sql_state,
            message,
        } => AppError::Seed {
            path: path.to_path_buf(),
            message: match sql_state {
                Some(state) => format!(
                    "statement {} failed: {} (SQLSTATE {})",
                    statement_index + 1,
                    message,
                    state
                ),
                None => format!("statement {} failed: {}", statement_index + 1, message),
            },
        },
        other => AppError::Seed {
            path: path.to_path_buf(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_mode_skips_unchanged() {
        assert!(!should_apply(SeedMode::Cached, Some("abc"), "abc"));
        assert!(should_apply(SeedMode::Cached, Some("abc"), "abd"));
        assert!(should_apply(SeedMode::Cached, None, "abc"));
    }

    #[test]
    fn test_dev_override_always_applies() {
        assert!(should_apply(SeedMode::DevOverride, Some("abc"), "abc"));
        assert!(should_apply(SeedMode::DevOverride, None, "abc"));
    }

    #[test]
    fn test_seed_error_keeps_statement_and_state() {
        let err = seed_error(
            Path::new("supabase/seed.sql"),
            AppError::ApplyFailed {
                statement_index: 0,
                sql_state: Some("23505".to_string()),
                message: "duplicate key value".to_string(),
            },
        );
        match err {
            AppError::Seed { path, message } => {
                assert_eq!(path, PathBuf::from("supabase/seed.sql"));
                assert_eq!(message, "statement 1 failed: duplicate key value (SQLSTATE 23505)");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(matches!(
            seed_error(Path::new("seed.sql"), AppError::Cancelled),
            AppError::Cancelled
        ));
    }
}
