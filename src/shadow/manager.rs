//! Shadow database manager
//!
//! Sole owner of the shadow container and its `ShadowState`. Callers ask for
//! a prepared target database with `prepare`; the manager decides whether
//! that needs a cold start, a template rebuild or only a fast reset.

use crate::cancel::CancellationToken;
use crate::connection::ConnectionParams;
use crate::db::queries;
use crate::db::{connect, execute_statements, in_source, wait_until_ready};
use crate::error::{shadow_error, AppError, AppResult};
use crate::files::expand_globs;
use crate::migration::history::{apply_migration, ensure_history_schema};
use crate::migration::{MigrationFile, MigrationStore};
use crate::shadow::lock::ShadowLock;
use crate::shadow::{
    roles_to_drop, ShadowAction, ShadowState, ADMIN_DATABASE, MIGRATED_DATABASE, TARGET_DATABASE,
    TEMPLATE_DATABASE,
};
use crate::sql::split_statements;
use crate::state::ProjectContext;
use crate::supervisor::{shadow_container, ServiceSpec, Supervisor};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::Client;
use tracing::{debug, info, warn};

const READY_TIMEOUT: Duration = Duration::from_secs(30);
const EMPTY_TEMPLATE: &str = "template0";

pub struct ShadowManager {
    supervisor: Arc<dyn Supervisor>,
    spec: ServiceSpec,
    store: MigrationStore,
    project_root: PathBuf,
    schema_globs: Vec<String>,
    state: ShadowState,
    cancel: CancellationToken,
    lock_path: PathBuf,
    lock: Option<ShadowLock>,
}

impl ShadowManager {
    pub fn new(ctx: &ProjectContext, cancel: CancellationToken) -> Self {
        let settings = &ctx.settings;
        Self {
            supervisor: ctx.supervisor.clone(),
            spec: ServiceSpec::postgres(
                shadow_container(&settings.project_id),
                settings.db.major_version,
                settings.db.shadow_port,
            ),
            store: ctx.migration_store(),
            project_root: ctx.project_root.clone(),
            schema_globs: settings.db.migrations.schema_paths.clone(),
            state: ShadowState::default(),
            cancel,
            lock_path: ctx.temp_dir.join("shadow.lock"),
            lock: None,
        }
    }

    pub fn state(&self) -> &ShadowState {
        &self.state
    }

    fn params(&self, database: &str) -> ConnectionParams {
        ConnectionParams::local(self.spec.host_port).with_database(database)
    }

    /// Database holding migrations plus declared schemas after `prepare`
    pub fn target_params(&self) -> ConnectionParams {
        self.params(TARGET_DATABASE)
    }

    /// Force a template rebuild on the next `prepare`
    pub fn invalidate(&mut self) {
        self.state.invalidate();
        info!("shadow template invalidated");
    }

    /// Bring the target database to "committed migrations + declared schemas".
    ///
    /// A container or connection failure on a warm shadow is retried once
    /// through a template rebuild (or a cold start if the container is gone).
    /// If the retry fails too, later cycles migrate a fresh database per diff.
    pub async fn prepare(&mut self) -> AppResult<ConnectionParams> {
        match self.try_prepare().await {
            Err(e) if !self.state.is_absent() && is_retryable(&e) => {
                warn!("⚠️  Shadow database failed ({}), rebuilding once", e);
                if self.supervisor.is_running(&self.spec.name).await? {
                    self.state.invalidate();
                } else {
                    self.state = ShadowState::default();
                }
                let retried = self.try_prepare().await;
                if retried.is_err() && !self.state.is_absent() {
                    warn!("⚠️  Shadow template unusable, falling back to a fresh shadow database per diff");
                    self.state.degrade();
                }
                retried
            }
            other => other,
        }
    }

    async fn try_prepare(&mut self) -> AppResult<ConnectionParams> {
        let files = self.store.list()?;
        let hash = MigrationStore::hash_files(&files)?;
        let action = self.state.plan(&hash);
        debug!("Shadow plan {:?} for migration hash {}", action, &hash[..12]);

        match action {
            ShadowAction::ColdStart => self.cold_start(&files, &hash).await?,
            ShadowAction::RebuildTemplate => self.rebuild_template(&files, &hash).await?,
            ShadowAction::FastPath | ShadowAction::Ephemeral => {}
        }

        if self.state.template_ready {
            self.clone_template().await?;
        } else {
            self.migrate_target(&files).await?;
        }
        self.apply_declared().await?;
        Ok(self.target_params())
    }

    /// Start the container and build the template. Any failure removes the
    /// container again and leaves the state absent.
    async fn cold_start(&mut self, files: &[MigrationFile], hash: &str) -> AppResult<()> {
        let name = self.spec.name.clone();
        self.claim_container().await?;

        info!("🐘 Starting shadow database {} on port {}", name, self.spec.host_port);
        let id = self.supervisor.ensure_running(&self.spec).await?;
        self.state.container_id = Some(id);

        if let Err(e) = self.boot(files, hash).await {
            warn!("⚠️  Shadow database failed to start: {}", e);
            self.state = ShadowState::default();
            if let Err(remove_err) = self.supervisor.remove(&name).await {
                warn!("⚠️  Could not remove {}: {}", name, remove_err);
            }
            self.lock = None;
            return Err(e);
        }
        Ok(())
    }

    /// Take the ownership lock and clear out a container left by a process
    /// that died without removing it. A live owner makes this fail fast.
    async fn claim_container(&mut self) -> AppResult<()> {
        let name = &self.spec.name;
        if self.lock.is_none() {
            match ShadowLock::acquire(&self.lock_path)? {
                Some(lock) => self.lock = Some(lock),
                None => {
                    let holder = ShadowLock::holder(&self.lock_path)
                        .map(|pid| format!("pid {}", pid))
                        .unwrap_or_else(|| "another process".to_string());
                    return Err(shadow_error(format!(
                        "shadow database {} is in use by {} (stop that `supadev dev` or `db diff` first)",
                        name, holder
                    )));
                }
            }
        }

        if self.supervisor.is_running(name).await? {
            warn!("⚠️  Removing leftover shadow database {}", name);
            self.supervisor.remove(name).await?;
        }
        Ok(())
    }

    async fn boot(&mut self, files: &[MigrationFile], hash: &str) -> AppResult<()> {
        let admin_params = self.params(ADMIN_DATABASE);
        wait_until_ready(&admin_params, READY_TIMEOUT).await?;

        let admin = connect(&admin_params).await?;
        self.state.boot_roles = list_roles(&admin).await?;
        drop(admin);

        self.rebuild_template(files, hash).await
    }

    /// Recreate `postgres` from scratch, migrate it, snapshot the baseline
    /// roles and clone it into the template. A template failure degrades to
    /// per-request databases instead of failing the cycle.
    async fn rebuild_template(&mut self, files: &[MigrationFile], hash: &str) -> AppResult<()> {
        info!("🔁 Building shadow template from {} migration(s)", files.len());
        self.state.template_ready = false;
        self.state.migrations_hash = None;

        let admin = connect(&self.params(ADMIN_DATABASE)).await?;
        for database in [TARGET_DATABASE, TEMPLATE_DATABASE, MIGRATED_DATABASE] {
            admin.batch_execute(&queries::drop_database(database)).await?;
        }
        drop_roles_outside(&admin, &self.state.boot_roles).await?;
        admin
            .batch_execute(&queries::create_database(MIGRATED_DATABASE, EMPTY_TEMPLATE))
            .await?;

        self.apply_migrations(MIGRATED_DATABASE, files).await?;
        let roles = list_roles(&admin).await?;
        self.state.record_migrated(hash, roles);

        match admin
            .batch_execute(&queries::create_database(TEMPLATE_DATABASE, MIGRATED_DATABASE))
            .await
        {
            Ok(()) => {
                self.state.template_ready = true;
                debug!("Shadow template ready");
            }
            Err(e) => {
                warn!(
                    "⚠️  Could not create {}, falling back to a fresh shadow database per diff: {}",
                    TEMPLATE_DATABASE, e
                );
            }
        }
        Ok(())
    }

    /// Fast path: drop roles left by the previous cycle and clone the template
    async fn clone_template(&self) -> AppResult<()> {
        let admin = connect(&self.params(ADMIN_DATABASE)).await?;
        admin.batch_execute(&queries::drop_database(TARGET_DATABASE)).await?;
        drop_roles_outside(&admin, &self.state.baseline_roles).await?;
        admin
            .batch_execute(&queries::create_database(TARGET_DATABASE, TEMPLATE_DATABASE))
            .await?;
        debug!("Reset {} from {}", TARGET_DATABASE, TEMPLATE_DATABASE);
        Ok(())
    }

    /// Degraded path: migrate an empty target database on every request.
    /// Migration roles are recreated too, so `postgres` is dropped with them.
    async fn migrate_target(&self, files: &[MigrationFile]) -> AppResult<()> {
        let admin = connect(&self.params(ADMIN_DATABASE)).await?;
        for database in [TARGET_DATABASE, MIGRATED_DATABASE] {
            admin.batch_execute(&queries::drop_database(database)).await?;
        }
        drop_roles_outside(&admin, &self.state.boot_roles).await?;
        admin
            .batch_execute(&queries::create_database(TARGET_DATABASE, EMPTY_TEMPLATE))
            .await?;
        self.apply_migrations(TARGET_DATABASE, files).await
    }

    async fn apply_migrations(&self, database: &str, files: &[MigrationFile]) -> AppResult<()> {
        let mut client = connect(&self.params(database)).await?;
        ensure_history_schema(&client).await?;
        for file in files {
            apply_migration(&mut client, file, &self.cancel).await?;
        }
        debug!("Applied {} migration(s) to shadow {}", files.len(), database);
        Ok(())
    }

    /// Apply every declared schema file, one transaction per file
    async fn apply_declared(&self) -> AppResult<()> {
        let files = expand_globs(&self.project_root, &self.schema_globs)?;
        let mut client = connect(&self.target_params()).await?;

        for relative in &files {
            let absolute = self.project_root.join(relative);
            let sql = std::fs::read_to_string(&absolute).map_err(|e| AppError::fs(&absolute, e))?;
            let statements = split_statements(&sql);

            let transaction = client.transaction().await?;
            execute_statements(
                &transaction,
                statements.iter().map(|s| s.text.as_str()).collect::<Vec<_>>(),
                &self.cancel,
            )
            .await
            .map_err(|e| in_source(e, &relative.display().to_string()))?;
            transaction.commit().await?;
        }

        debug!("Applied {} declared schema file(s) to shadow", files.len());
        Ok(())
    }

    /// Remove the container. Safe to call in any state.
    pub async fn stop(&mut self) -> AppResult<()> {
        if self.state.is_absent() {
            self.lock = None;
            return Ok(());
        }
        info!("🧹 Removing shadow database {}", self.spec.name);
        self.state = ShadowState::default();
        let removed = self.supervisor.remove(&self.spec.name).await;
        self.lock = None;
        removed
    }
}

async fn list_roles(client: &Client) -> AppResult<BTreeSet<String>> {
    let rows = client.query(queries::LIST_ROLES, &[]).await?;
    Ok(rows.into_iter().map(|r| r.get(0)).collect())
}

/// Drop every role missing from `keep`. A role that still owns objects makes
/// `DROP ROLE` fail; that Postgres error is returned unchanged.
async fn drop_roles_outside(admin: &Client, keep: &BTreeSet<String>) -> AppResult<()> {
    let current = list_roles(admin).await?;
    for role in roles_to_drop(keep, &current) {
        debug!("Dropping role {}", role);
        admin.batch_execute(&queries::drop_role(&role)).await?;
    }
    Ok(())
}

/// Failures worth one rebuild: container trouble and lost connections, never
/// errors reported by the server about user SQL
fn is_retryable(err: &AppError) -> bool {
    match err {
        AppError::Container(_) | AppError::Shadow(_) => true,
        AppError::Database(e) => e.as_db_error().is_none(),
        _ => false,
    }
}
