//! Pipeline worker
//!
//! The single consumer of change batches. It owns the shadow manager, so
//! pipelines never overlap and nothing else touches the shadow container.

use crate::apply::Applier;
use crate::cancel::CancellationToken;
use crate::connection::ConnectionParams;
use crate::differ::SchemaDiffer;
use crate::error::{AppError, AppResult};
use crate::files::expand_globs;
use crate::output::OutputManager;
use crate::pipeline::hooks::run_hook;
use crate::pipeline::typegen::TypeGenerator;
use crate::pipeline::SessionDirty;
use crate::seed::{SeedMode, SeedRunner};
use crate::shadow::ShadowManager;
use crate::sql::SchemaValidator;
use crate::state::ProjectContext;
use crate::watcher::{BatchQueue, ChangeBatch, ChangeClass};
use deadpool_postgres::Pool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One unit of work for the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    InitialSync,
    InitialSeed,
    Batch(ChangeBatch),
}

pub struct PipelineWorker {
    project_root: PathBuf,
    local: ConnectionParams,
    schema_paths: Vec<String>,
    schema_hook: Option<String>,
    seed_hook: Option<String>,
    shadow: ShadowManager,
    differ: SchemaDiffer,
    applier: Applier,
    seeds: SeedRunner,
    typegen: Option<TypeGenerator>,
    dirty: Arc<SessionDirty>,
    cancel: CancellationToken,
    output: OutputManager,
    timeout: Duration,
}

impl PipelineWorker {
    pub fn new(
        ctx: &ProjectContext,
        pool: Pool,
        strict_drops: bool,
        dirty: Arc<SessionDirty>,
        cancel: CancellationToken,
        output: OutputManager,
    ) -> Self {
        let settings = &ctx.settings;
        let typegen = settings.types_output().map(|path| {
            TypeGenerator::new(ctx.supervisor.clone(), ctx.resolve(path), ctx.temp_dir.clone())
        });

        Self {
            project_root: ctx.project_root.clone(),
            local: ctx.local_params(),
            schema_paths: settings.db.migrations.schema_paths.clone(),
            schema_hook: settings.schema_on_change().map(str::to_string),
            seed_hook: settings.seed_on_change().map(str::to_string),
            shadow: ShadowManager::new(ctx, cancel.clone()),
            differ: SchemaDiffer::new(ctx.supervisor.clone()),
            applier: Applier::new(pool.clone(), strict_drops),
            seeds: SeedRunner::new(pool, ctx.project_root.clone(), settings.db.seed.sql_paths.clone()),
            typegen,
            dirty,
            cancel,
            output,
            timeout: settings.pipeline_timeout(),
        }
    }

    /// Run `startup` jobs, then every batch until the queue closes.
    /// Returns early with the first error a dev session cannot survive.
    pub async fn run(mut self, startup: Vec<Job>, queue: Arc<BatchQueue>) -> (Self, AppResult<()>) {
        for job in startup {
            let initial_sync = job == Job::InitialSync;
            match self.run_job(job).await {
                Ok(()) if initial_sync => self.output.success("Initial sync complete"),
                Ok(()) => {}
                Err(e) if e.is_fatal_in_dev() => return (self, Err(e)),
                Err(e) => e.report(&self.output),
            }
            if self.cancel.is_cancelled() {
                return (self, Ok(()));
            }
        }

        self.output.info("Watching for changes. Press Ctrl+C to stop.");
        while let Some(batch) = queue.next().await {
            if self.cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.run_job(Job::Batch(batch)).await {
                if e.is_fatal_in_dev() {
                    return (self, Err(e));
                }
                e.report(&self.output);
            }
        }
        (self, Ok(()))
    }

    /// Run one job under the pipeline timeout. An expired job is dropped,
    /// which rolls back its open transaction, and the shadow is torn down
    /// since its state is unknown.
    pub async fn run_job(&mut self, job: Job) -> AppResult<()> {
        let timeout = self.timeout;
        match tokio::time::timeout(timeout, self.execute(job)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("⚠️  Pipeline exceeded {}s, resetting shadow database", timeout.as_secs());
                if let Err(e) = self.shadow.stop().await {
                    warn!("⚠️  Could not stop shadow database: {}", e);
                }
                Err(AppError::Timeout(timeout))
            }
        }
    }

    async fn execute(&mut self, job: Job) -> AppResult<()> {
        match job {
            Job::InitialSync => self.schema_pipeline().await,
            Job::InitialSeed => self.seed(SeedMode::Cached).await,
            Job::Batch(batch) => {
                debug!("{:?} batch: {:?}", batch.class, batch.paths);
                match batch.class {
                    ChangeClass::Schema => self.schema_pipeline().await,
                    ChangeClass::Migration => {
                        self.migration_pipeline();
                        Ok(())
                    }
                    ChangeClass::Seed => self.seed_pipeline().await,
                }
            }
        }
    }

    async fn schema_pipeline(&mut self) -> AppResult<()> {
        match self.schema_hook.clone() {
            Some(command) => run_hook(&command, &self.project_root).await?,
            None => self.sync_schemas().await?,
        }
        if let Some(typegen) = &self.typegen {
            typegen.generate(&self.local).await?;
        }
        Ok(())
    }

    /// Validate, diff against the shadow and apply to the local database
    async fn sync_schemas(&mut self) -> AppResult<()> {
        let files = expand_globs(&self.project_root, &self.schema_paths)?;
        SchemaValidator::validate_files(&self.project_root, &files)?;

        let target = self.shadow.prepare().await?;
        let diff = self.differ.diff(&self.local, &target, &[]).await?;
        if diff.is_empty() {
            debug!("Local database already matches declared schemas");
            return Ok(());
        }

        let applied = self
            .applier
            .apply(&diff, &self.dirty, &self.cancel, &self.output)
            .await?;
        self.output
            .success(&format!("Applied {} statement(s) to the local database", applied.len()));
        for statement in &applied {
            self.output.sql(statement);
        }
        Ok(())
    }

    /// Migrations already match the local database; only the template is stale
    fn migration_pipeline(&mut self) {
        self.shadow.invalidate();
        self.output.info("shadow template invalidated");
    }

    async fn seed_pipeline(&mut self) -> AppResult<()> {
        match self.seed_hook.clone() {
            Some(command) => run_hook(&command, &self.project_root).await,
            None => self.seed(SeedMode::DevOverride).await,
        }
    }

    async fn seed(&mut self, mode: SeedMode) -> AppResult<()> {
        let report = self.seeds.run(mode, &self.cancel).await?;
        if !report.applied.is_empty() {
            self.output
                .success(&format!("Seeded {} file(s)", report.applied.len()));
        }
        Ok(())
    }

    /// Tear down the shadow container
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.shadow.stop().await {
            warn!("⚠️  Could not stop shadow database: {}", e);
        }
        info!("Pipeline worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::GlobalOptions;
    use std::fs;

    fn quiet() -> OutputManager {
        OutputManager::new(GlobalOptions {
            quiet: true,
            no_color: true,
        })
    }

    /// Nothing listens on port 1, so no job in these tests may reach a database
    fn unreachable_pool() -> Pool {
        deadpool_postgres::Config {
            host: Some("127.0.0.1".to_string()),
            port: Some(1),
            dbname: Some("postgres".to_string()),
            ..Default::default()
        }
        .create_pool(Some(deadpool_postgres::Runtime::Tokio1), tokio_postgres::NoTls)
        .unwrap()
    }

    fn worker(config: &str) -> (tempfile::TempDir, PipelineWorker) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("supabase/migrations")).unwrap();
        fs::write(dir.path().join("supabase/config.toml"), config).unwrap();
        let ctx = ProjectContext::from_root(dir.path().to_path_buf()).unwrap();
        let dirty = Arc::new(SessionDirty::load(&ctx.dirty_marker));
        let worker = PipelineWorker::new(
            &ctx,
            unreachable_pool(),
            false,
            dirty,
            CancellationToken::new(),
            quiet(),
        );
        (dir, worker)
    }

    fn batch(class: ChangeClass, path: &str) -> Job {
        Job::Batch(ChangeBatch {
            class,
            paths: vec![PathBuf::from(path)],
        })
    }

    #[tokio::test]
    async fn test_migration_batch_only_invalidates_template() {
        let (_dir, mut worker) = worker("project_id = \"acme\"\n");
        worker
            .run_job(batch(ChangeClass::Migration, "supabase/migrations/20240101000000_a.sql"))
            .await
            .unwrap();
        assert!(worker.shadow.state().migrations_hash.is_none());
        assert!(!worker.dirty.is_dirty());
    }

    #[tokio::test]
    async fn test_seed_hook_replaces_seed_runner() {
        let (dir, mut worker) = worker("[dev.seed]\non_change = \"touch seeded\"\n");
        worker
            .run_job(batch(ChangeClass::Seed, "supabase/seed.sql"))
            .await
            .unwrap();
        assert!(dir.path().join("seeded").exists());
    }

    #[tokio::test]
    async fn test_failing_schema_hook_is_not_fatal() {
        let (_dir, mut worker) = worker("[dev.schemas]\non_change = \"exit 4\"\n");
        let err = worker
            .run_job(batch(ChangeClass::Schema, "supabase/schemas/users.sql"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Hook { status: 4, .. }));
        assert!(!err.is_fatal_in_dev());
    }

    #[tokio::test]
    async fn test_syntax_error_stops_before_shadow() {
        let (dir, mut worker) = worker("project_id = \"acme\"\n");
        fs::create_dir_all(dir.path().join("supabase/schemas")).unwrap();
        fs::write(
            dir.path().join("supabase/schemas/users.sql"),
            "CREATE TABL public.users (id uuid);",
        )
        .unwrap();

        let err = worker
            .run_job(batch(ChangeClass::Schema, "supabase/schemas/users.sql"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SqlSyntax(_)));
        assert!(worker.shadow.state().is_absent());
    }
}
