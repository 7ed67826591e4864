//! Dev session orchestrator
//!
//! Brings the local database up, starts the watcher and the pipeline worker,
//! and tears everything down again on Ctrl+C / SIGTERM or a fatal error.

use crate::cancel::CancellationToken;
use crate::db::{wait_until_ready, DatabaseManager};
use crate::error::{shadow_error, AppError, AppResult};
use crate::migration::HistoryService;
use crate::output::OutputManager;
use crate::pipeline::worker::{Job, PipelineWorker};
use crate::pipeline::SessionDirty;
use crate::state::ProjectContext;
use crate::supervisor::shadow_container;
use crate::watcher::{BatchQueue, FileWatcher, PathClassifier};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DB_READY_TIMEOUT: Duration = Duration::from_secs(60);
/// How long an in-flight pipeline may take to notice cancellation
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Default)]
pub struct DevOptions {
    /// Fail instead of starting a stopped local database
    pub no_start: bool,
    /// Refuse destructive diffs
    pub strict_drops: bool,
}

/// Classifier for the globs enabled in `settings`
pub fn session_classifier(ctx: &ProjectContext) -> AppResult<PathClassifier> {
    let settings = &ctx.settings;
    let schema_globs: &[String] = if settings.dev.schemas.enabled {
        settings.schema_watch_globs()
    } else {
        &[]
    };
    let seed_globs: &[String] = if settings.dev_seed_enabled() {
        &settings.db.seed.sql_paths
    } else {
        &[]
    };
    PathClassifier::new(schema_globs, seed_globs)
}

/// Jobs to run before the first watched change
pub fn startup_jobs(ctx: &ProjectContext) -> Vec<Job> {
    let settings = &ctx.settings;
    let mut jobs = Vec::new();
    if settings.dev.schemas.enabled && settings.dev.schemas.sync_on_start {
        jobs.push(Job::InitialSync);
    }
    if settings.dev_seed_enabled() {
        jobs.push(Job::InitialSeed);
    }
    jobs
}

pub struct DevSession<'a> {
    ctx: &'a ProjectContext,
    options: DevOptions,
    output: OutputManager,
}

impl<'a> DevSession<'a> {
    pub fn new(ctx: &'a ProjectContext, options: DevOptions, output: OutputManager) -> Self {
        Self {
            ctx,
            options,
            output,
        }
    }

    /// Run until interrupted. Startup failures are returned before any
    /// watcher or worker exists.
    pub async fn run(self) -> AppResult<()> {
        let db = self.start_local_database().await?;
        HistoryService::new(db.pool().clone()).ensure_table().await?;

        let strict_drops = self.options.strict_drops || self.ctx.settings.dev.schemas.strict_drops;
        let cancel = CancellationToken::new();
        let dirty = Arc::new(SessionDirty::load(&self.ctx.dirty_marker));
        if dirty.inherited() {
            self.output.info(
                "The local database already has uncaptured schema changes from an earlier session",
            );
        }
        let queue = Arc::new(BatchQueue::new());

        let watcher = FileWatcher::spawn(
            &self.ctx.project_root,
            session_classifier(self.ctx)?,
            self.ctx.settings.debounce(),
            queue.clone(),
        )?;

        let worker = PipelineWorker::new(
            self.ctx,
            db.pool().clone(),
            strict_drops,
            dirty.clone(),
            cancel.clone(),
            self.output.clone(),
        );
        let mut worker_task = tokio::spawn(worker.run(startup_jobs(self.ctx), queue.clone()));

        let joined = tokio::select! {
            _ = shutdown_signal() => {
                cancel.cancel();
                queue.close();
                match tokio::time::timeout(SHUTDOWN_GRACE, &mut worker_task).await {
                    Ok(joined) => Some(joined),
                    Err(_) => {
                        warn!("⚠️  Pipeline did not stop within {}s, aborting it", SHUTDOWN_GRACE.as_secs());
                        worker_task.abort();
                        None
                    }
                }
            }
            joined = &mut worker_task => Some(joined),
        };

        queue.close();
        watcher.stop().await;

        let result = match joined {
            Some(Ok((mut worker, result))) => {
                worker.shutdown().await;
                result
            }
            Some(Err(e)) => {
                self.remove_shadow().await;
                Err(shadow_error(format!("pipeline worker failed: {}", e)))
            }
            None => {
                self.remove_shadow().await;
                Ok(())
            }
        };

        if let Some(warning) = dirty.exit_warning() {
            self.output.warning(warning);
        }
        info!("👋 Dev session stopped");
        result
    }

    async fn start_local_database(&self) -> AppResult<DatabaseManager> {
        let service = self.ctx.local_service();
        let supervisor = &self.ctx.supervisor;

        if !supervisor.is_running(&service.name).await? {
            if self.options.no_start {
                return Err(AppError::Container(format!(
                    "local database {} is not running and --no-start was given",
                    service.name
                )));
            }
            info!("🐘 Starting local database {} on port {}", service.name, service.host_port);
            supervisor.ensure_running(&service).await?;
        }

        let params = self.ctx.local_params();
        wait_until_ready(&params, DB_READY_TIMEOUT).await?;
        DatabaseManager::new(params).await
    }

    /// Last-resort teardown when the worker no longer owns the shadow
    async fn remove_shadow(&self) {
        let name = shadow_container(&self.ctx.settings.project_id);
        if let Err(e) = self.ctx.supervisor.remove(&name).await {
            warn!("⚠️  Could not remove {}: {}", name, e);
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("⚠️  Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("⚠️  Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, stopping dev session...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, stopping dev session...");
        },
    }
}
