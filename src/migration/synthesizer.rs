//! `db diff`: turn declared schema changes into a migration file
//!
//! Diffs the local database against a freshly prepared shadow. Nothing is
//! applied and session dirtiness is left alone.

use crate::cancel::CancellationToken;
use crate::connection::ConnectionParams;
use crate::db::connect;
use crate::differ::{DiffResult, SchemaDiffer};
use crate::error::AppResult;
use crate::migration::history::ensure_history_schema;
use crate::migration::store::validate_slug;
use crate::migration::{MigrationFile, MigrationStore};
use crate::shadow::ShadowManager;
use crate::state::ProjectContext;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::{info, warn};

pub struct MigrationSynthesizer {
    shadow: ShadowManager,
    differ: SchemaDiffer,
    store: MigrationStore,
    local: ConnectionParams,
    temp_dir: PathBuf,
}

impl MigrationSynthesizer {
    pub fn new(ctx: &ProjectContext, cancel: CancellationToken) -> Self {
        Self {
            shadow: ShadowManager::new(ctx, cancel),
            differ: SchemaDiffer::new(ctx.supervisor.clone()),
            store: ctx.migration_store(),
            local: ctx.local_params(),
            temp_dir: ctx.temp_dir.clone(),
        }
    }

    /// Diff the local database against migrations plus declared schemas.
    /// The shadow container is removed again on every path.
    pub async fn diff(&mut self, schemas: &[String]) -> AppResult<DiffResult> {
        let result = self.diff_with_shadow(schemas).await;
        if let Err(e) = self.shadow.stop().await {
            warn!("⚠️  Could not stop shadow database: {}", e);
        }
        result
    }

    async fn diff_with_shadow(&mut self, schemas: &[String]) -> AppResult<DiffResult> {
        // Bookkeeping tables exist on both sides so they never show up in the diff
        let local = connect(&self.local).await?;
        ensure_history_schema(&local).await?;
        drop(local);

        let target = self.shadow.prepare().await?;
        self.differ.diff(&self.local, &target, schemas).await
    }

    /// Write `diff` as a new migration named after `slug`
    pub fn write(&self, slug: &str, diff: &DiffResult, now: DateTime<Utc>) -> AppResult<MigrationFile> {
        let mut sql = diff.sql.trim_end().to_string();
        sql.push('\n');
        let file = self.store.create(slug, &sql, now, &self.temp_dir)?;
        info!("📜 Wrote migration {}", file.filename);
        Ok(file)
    }

    /// Full `db diff` run: `Some(file)` when a migration was written
    pub async fn synthesize(
        &mut self,
        slug: Option<&str>,
        schemas: &[String],
    ) -> AppResult<(DiffResult, Option<MigrationFile>)> {
        if let Some(slug) = slug {
            validate_slug(slug)?;
        }

        let diff = self.diff(schemas).await?;
        match slug {
            Some(slug) if !diff.is_empty() => {
                let file = self.write(slug, &diff, Utc::now())?;
                Ok((diff, Some(file)))
            }
            _ => Ok((diff, None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn context() -> (tempfile::TempDir, ProjectContext) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("supabase/migrations")).unwrap();
        fs::write(dir.path().join("supabase/config.toml"), "project_id = \"acme\"\n").unwrap();
        let ctx = ProjectContext::from_root(dir.path().to_path_buf()).unwrap();
        (dir, ctx)
    }

    #[test]
    fn test_write_creates_timestamped_file() {
        let (_dir, ctx) = context();
        let synthesizer = MigrationSynthesizer::new(&ctx, CancellationToken::new());
        let diff = DiffResult::from_sql("create table \"public\".\"users\" (\"id\" uuid not null);\n\n");
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let file = synthesizer.write("add_users", &diff, now).unwrap();
        assert_eq!(file.filename, "20240501120000_add_users.sql");
        assert_eq!(
            fs::read_to_string(&file.path).unwrap(),
            "create table \"public\".\"users\" (\"id\" uuid not null);\n"
        );
    }

    #[test]
    fn test_write_never_reuses_a_timestamp() {
        let (_dir, ctx) = context();
        let synthesizer = MigrationSynthesizer::new(&ctx, CancellationToken::new());
        let diff = DiffResult::from_sql("select 1;");
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let first = synthesizer.write("one", &diff, now).unwrap();
        let second = synthesizer.write("two", &diff, now).unwrap();
        assert!(second.version > first.version);
    }

    #[tokio::test]
    async fn test_invalid_slug_rejected_before_any_work() {
        let (_dir, ctx) = context();
        let mut synthesizer = MigrationSynthesizer::new(&ctx, CancellationToken::new());
        let err = synthesizer.synthesize(Some("bad slug!"), &[]).await.unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
