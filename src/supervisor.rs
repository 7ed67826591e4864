//! Container supervisor
//!
//! The engine never talks to a container runtime directly: it asks a
//! `Supervisor` to keep named services running, to run one-off images and to
//! remove containers. `DockerSupervisor` implements that contract with the
//! `docker` CLI.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Port Postgres listens on inside its container
pub const POSTGRES_CONTAINER_PORT: u16 = 5432;

/// A long-running service the supervisor keeps alive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub image: String,
    pub host_port: u16,
    pub container_port: u16,
    pub env: Vec<(String, String)>,
}

impl ServiceSpec {
    /// A Postgres server published on `host_port`
    pub fn postgres(name: impl Into<String>, major_version: u32, host_port: u16) -> Self {
        Self {
            name: name.into(),
            image: format!("postgres:{}", major_version),
            host_port,
            container_port: POSTGRES_CONTAINER_PORT,
            env: vec![(
                "POSTGRES_PASSWORD".to_string(),
                crate::connection::DEFAULT_PASSWORD.to_string(),
            )],
        }
    }
}

/// A one-off container run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecRequest {
    pub image: String,
    pub cmd: Vec<String>,
    /// `(host path, container path)` bind mounts
    pub mounts: Vec<(PathBuf, String)>,
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Start the service unless it is already running; returns the container id
    async fn ensure_running(&self, spec: &ServiceSpec) -> AppResult<String>;

    async fn is_running(&self, name: &str) -> AppResult<bool>;

    /// Run an image to completion and capture its output
    async fn exec(&self, request: &ExecRequest) -> AppResult<ExecOutput>;

    /// Remove a container and its anonymous volumes; missing containers are fine
    async fn remove(&self, name: &str) -> AppResult<()>;
}

/// Container name of the local development database
pub fn db_container(project_id: &str) -> String {
    format!("{}_db", project_id)
}

/// Container name of the shadow database
pub fn shadow_container(project_id: &str) -> String {
    format!("{}_shadow", project_id)
}

/// `Supervisor` backed by the `docker` command line
pub struct DockerSupervisor {
    program: String,
}

impl Default for DockerSupervisor {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerSupervisor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn docker(&self, args: &[String]) -> AppResult<ExecOutput> {
        debug!("{} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AppError::Container(format!("failed to run {}: {}", self.program, e)))?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn container_id(&self, name: &str) -> AppResult<String> {
        let out = self
            .docker(&args(&["inspect", "--format", "{{.Id}}", name]))
            .await?;
        if !out.success() {
            return Err(AppError::Container(format!(
                "container {} not found: {}",
                name,
                out.stderr.trim()
            )));
        }
        Ok(out.stdout.trim().to_string())
    }
}

fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Arguments for `docker run -d` of a service
pub fn run_args(spec: &ServiceSpec) -> Vec<String> {
    let mut run = args(&["run", "--detach", "--name", &spec.name]);
    run.push("--publish".to_string());
    run.push(format!("{}:{}", spec.host_port, spec.container_port));
    for (key, value) in &spec.env {
        run.push("--env".to_string());
        run.push(format!("{}={}", key, value));
    }
    run.push(spec.image.clone());
    run
}

/// Arguments for a one-off `docker run --rm` on the host network
pub fn exec_args(request: &ExecRequest) -> Vec<String> {
    let mut run = args(&["run", "--rm", "--network", "host"]);
    for (host, container) in &request.mounts {
        run.push("--volume".to_string());
        run.push(format!("{}:{}", host.display(), container));
    }
    for (key, value) in &request.env {
        run.push("--env".to_string());
        run.push(format!("{}={}", key, value));
    }
    run.push(request.image.clone());
    run.extend(request.cmd.iter().cloned());
    run
}

/// Translate `docker run` failures into actionable messages
fn start_error(spec: &ServiceSpec, stderr: &str) -> AppError {
    if stderr.contains("port is already allocated") || stderr.contains("address already in use") {
        AppError::Container(format!(
            "port {} is already in use; stop the process holding it or change the port in config.toml",
            spec.host_port
        ))
    } else {
        AppError::Container(format!("failed to start {}: {}", spec.name, stderr.trim()))
    }
}

#[async_trait]
impl Supervisor for DockerSupervisor {
    async fn ensure_running(&self, spec: &ServiceSpec) -> AppResult<String> {
        if self.is_running(&spec.name).await? {
            return self.container_id(&spec.name).await;
        }

        // A stopped container with the same name would block `run --name`
        self.remove(&spec.name).await?;

        let out = self.docker(&run_args(spec)).await?;
        if !out.success() {
            return Err(start_error(spec, &out.stderr));
        }
        let id = out.stdout.trim().to_string();
        debug!("Started {} ({})", spec.name, id);
        Ok(id)
    }

    async fn is_running(&self, name: &str) -> AppResult<bool> {
        let out = self
            .docker(&args(&["inspect", "--format", "{{.State.Running}}", name]))
            .await?;
        Ok(out.success() && out.stdout.trim() == "true")
    }

    async fn exec(&self, request: &ExecRequest) -> AppResult<ExecOutput> {
        self.docker(&exec_args(request)).await
    }

    async fn remove(&self, name: &str) -> AppResult<()> {
        let out = self
            .docker(&args(&["rm", "--force", "--volumes", name]))
            .await?;
        if out.success() || out.stderr.contains("No such container") {
            Ok(())
        } else {
            Err(AppError::Container(format!(
                "failed to remove {}: {}",
                name,
                out.stderr.trim()
            )))
        }
    }
}
