//! Project context
//!
//! Resolved paths, settings and the container supervisor shared by every
//! command.

use crate::config::Settings;
use crate::connection::ConnectionParams;
use crate::error::{user_error, AppError, AppResult};
use crate::migration::MigrationStore;
use crate::supervisor::{db_container, DockerSupervisor, ServiceSpec, Supervisor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Context for one command invocation
pub struct ProjectContext {
    /// Directory containing `supabase/`
    pub project_root: PathBuf,
    pub supabase_dir: PathBuf,
    pub migrations_dir: PathBuf,
    /// Scratch space for atomic writes and the dirty marker
    pub temp_dir: PathBuf,
    pub dirty_marker: PathBuf,
    pub settings: Settings,
    pub supervisor: Arc<dyn Supervisor>,
}

impl ProjectContext {
    /// Find the project from `workdir`, or the current directory
    pub fn find(workdir: Option<&Path>) -> AppResult<Self> {
        match workdir {
            Some(dir) => Self::find_from(dir),
            None => {
                let current = std::env::current_dir().map_err(|e| AppError::fs(".", e))?;
                Self::find_from(&current)
            }
        }
    }

    /// Find project context starting from the given directory
    pub fn find_from(start: &Path) -> AppResult<Self> {
        let project_root = Self::find_project_root(start)?;
        Self::from_root(project_root)
    }

    /// Create context from a known project root
    pub fn from_root(project_root: PathBuf) -> AppResult<Self> {
        let settings = Settings::load(&project_root)?;
        let supabase_dir = project_root.join("supabase");
        let temp_dir = supabase_dir.join(".temp");

        Ok(Self {
            migrations_dir: supabase_dir.join("migrations"),
            dirty_marker: temp_dir.join("schema-dirty"),
            temp_dir,
            supabase_dir,
            project_root,
            settings,
            supervisor: Arc::new(DockerSupervisor::default()),
        })
    }

    /// Replace the container supervisor
    #[cfg(test)]
    pub fn with_supervisor(mut self, supervisor: Arc<dyn Supervisor>) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// Find project root by looking for supabase/config.toml
    fn find_project_root(start: &Path) -> AppResult<PathBuf> {
        let mut current = start.to_path_buf();

        loop {
            if current.join("supabase").join("config.toml").is_file() {
                return Ok(current);
            }

            if !current.pop() {
                return Err(user_error(format!(
                    "Could not find supabase/config.toml in {} or any parent directory. \
                     Are you in a project directory?",
                    start.display()
                )));
            }
        }
    }

    pub fn migration_store(&self) -> MigrationStore {
        MigrationStore::new(&self.migrations_dir)
    }

    /// Connection parameters of the local development database
    pub fn local_params(&self) -> ConnectionParams {
        ConnectionParams::local(self.settings.db.port)
    }

    /// Service definition of the local development database
    pub fn local_service(&self) -> ServiceSpec {
        ServiceSpec::postgres(
            db_container(&self.settings.project_id),
            self.settings.db.major_version,
            self.settings.db.port,
        )
    }

    /// Absolute path of a project-relative path
    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.project_root.join(relative)
    }
}
