//! Migration history service
//!
//! Persists which migration files have been applied to the local database
//! and computes what `migration up` still has to run.

use crate::cancel::CancellationToken;
use crate::db::queries;
use crate::db::{execute_statements, in_source};
use crate::error::{user_error, AppResult};
use crate::files::content_hash;
use crate::migration::store::MigrationFile;
use crate::sql::split_statements;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use std::collections::BTreeSet;
use tokio_postgres::Client;
use tracing::{debug, info};

/// Row of the history table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: String,
    pub name: String,
    pub hash: String,
    pub applied_at: DateTime<Utc>,
}

/// Create the bookkeeping schema and tables if they are missing
pub async fn ensure_history_schema(client: &Client) -> AppResult<()> {
    client.batch_execute(queries::CREATE_HISTORY_SCHEMA).await?;
    client.batch_execute(queries::CREATE_HISTORY_TABLE).await?;
    client.batch_execute(queries::CREATE_SEED_TABLE).await?;
    Ok(())
}

/// Apply one migration file and record it, all in one transaction
pub async fn apply_migration(
    client: &mut Client,
    file: &MigrationFile,
    cancel: &CancellationToken,
) -> AppResult<()> {
    let sql = file.read()?;
    let statements = split_statements(&sql);
    let hash = content_hash(sql.as_bytes());

    let transaction = client.transaction().await?;
    execute_statements(
        &transaction,
        statements.iter().map(|s| s.text.as_str()).collect::<Vec<_>>(),
        cancel,
    )
    .await
    .map_err(|e| in_source(e, &file.filename))?;
    transaction
        .execute(queries::INSERT_MIGRATION, &[&file.version, &file.slug, &hash])
        .await?;
    transaction.commit().await?;

    debug!("Applied migration {} ({} statements)", file.filename, statements.len());
    Ok(())
}

/// Local files not yet recorded in the history, in version order.
///
/// A pending file older than the newest applied version would run out of
/// order; that is an error unless `include_all` is set. Applied versions with
/// no local file are reported so the history can be repaired.
pub fn pending_migrations(
    local: &[MigrationFile],
    applied: &[AppliedMigration],
    include_all: bool,
) -> AppResult<Vec<MigrationFile>> {
    let local_versions: BTreeSet<&str> = local.iter().map(|f| f.version.as_str()).collect();
    let missing: Vec<&str> = applied
        .iter()
        .map(|m| m.version.as_str())
        .filter(|v| !local_versions.contains(v))
        .collect();
    if !missing.is_empty() {
        return Err(user_error(format!(
            "applied migration versions not found in the migrations directory: {}. \
             Run `supadev migration repair --status reverted {}` to forget them",
            missing.join(", "),
            missing.join(" ")
        )));
    }

    let applied_versions: BTreeSet<&str> = applied.iter().map(|m| m.version.as_str()).collect();
    let pending: Vec<MigrationFile> = local
        .iter()
        .filter(|f| !applied_versions.contains(f.version.as_str()))
        .cloned()
        .collect();

    if !include_all {
        if let Some(latest) = applied_versions.iter().next_back() {
            let out_of_order: Vec<&str> = pending
                .iter()
                .filter(|f| f.version.as_str() < *latest)
                .map(|f| f.filename.as_str())
                .collect();
            if !out_of_order.is_empty() {
                return Err(user_error(format!(
                    "found local migrations older than the last applied version {}: {}. \
                     Rerun with --include-all to apply them anyway",
                    latest,
                    out_of_order.join(", ")
                )));
            }
        }
    }

    Ok(pending)
}

/// History service for the local database
pub struct HistoryService {
    pool: Pool,
}

impl HistoryService {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn ensure_table(&self) -> AppResult<()> {
        let client = self.pool.get().await?;
        ensure_history_schema(&client).await
    }

    /// All recorded migrations, oldest first
    pub async fn list_applied(&self) -> AppResult<Vec<AppliedMigration>> {
        let client = self.pool.get().await?;
        ensure_history_schema(&client).await?;

        let rows = client.query(queries::LIST_APPLIED_MIGRATIONS, &[]).await?;
        Ok(rows
            .into_iter()
            .map(|r| AppliedMigration {
                version: r.get(0),
                name: r.get(1),
                hash: r.get(2),
                applied_at: r.get(3),
            })
            .collect())
    }

    /// Apply files in order, stopping at the first failure
    pub async fn apply_all(
        &self,
        files: &[MigrationFile],
        cancel: &CancellationToken,
    ) -> AppResult<usize> {
        let mut client = self.pool.get().await?;
        ensure_history_schema(&client).await?;

        for file in files {
            info!("📜 Applying migration {}", file.filename);
            apply_migration(&mut client, file, cancel).await?;
        }
        Ok(files.len())
    }

    /// Record a file as applied without running it
    pub async fn mark_applied(&self, file: &MigrationFile) -> AppResult<()> {
        let client = self.pool.get().await?;
        ensure_history_schema(&client).await?;

        let hash = content_hash(file.read()?.as_bytes());
        client
            .execute(queries::INSERT_MIGRATION, &[&file.version, &file.slug, &hash])
            .await?;
        Ok(())
    }

    /// Forget a version; returns whether a row was removed
    pub async fn mark_reverted(&self, version: &str) -> AppResult<bool> {
        let client = self.pool.get().await?;
        ensure_history_schema(&client).await?;

        let removed = client.execute(queries::DELETE_MIGRATION, &[&version]).await?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn file(version: &str, slug: &str) -> MigrationFile {
        MigrationFile {
            version: version.to_string(),
            slug: slug.to_string(),
            filename: format!("{}_{}.sql", version, slug),
            path: PathBuf::from(format!("supabase/migrations/{}_{}.sql", version, slug)),
        }
    }

    fn applied(version: &str) -> AppliedMigration {
        AppliedMigration {
            version: version.to_string(),
            name: "x".to_string(),
            hash: String::new(),
            applied_at: Utc::now(),
        }
    }

    #[test]
    fn test_pending_after_latest_applied() {
        let local = vec![file("20240101000000", "a"), file("20240102000000", "b")];
        let pending = pending_migrations(&local, &[applied("20240101000000")], false).unwrap();
        assert_eq!(pending, vec![file("20240102000000", "b")]);
    }

    #[test]
    fn test_nothing_applied_runs_everything() {
        let local = vec![file("20240101000000", "a"), file("20240102000000", "b")];
        assert_eq!(pending_migrations(&local, &[], false).unwrap(), local);
    }

    #[test]
    fn test_out_of_order_requires_include_all() {
        let local = vec![
            file("20240101000000", "a"),
            file("20240102000000", "late"),
            file("20240103000000", "c"),
        ];
        let history = [applied("20240101000000"), applied("20240103000000")];

        assert!(matches!(
            pending_migrations(&local, &history, false),
            Err(AppError::UserInput(_))
        ));
        assert_eq!(
            pending_migrations(&local, &history, true).unwrap(),
            vec![file("20240102000000", "late")]
        );
    }

    #[test]
    fn test_applied_version_missing_locally() {
        let local = vec![file("20240101000000", "a")];
        let err = pending_migrations(&local, &[applied("20231231000000")], true).unwrap_err();
        assert!(err.to_string().contains("20231231000000"));
    }
}
