//! User `on_change` commands
//!
//! A configured command replaces the built-in pipeline for its class. It runs
//! through `sh -c` in the project directory and its exit status is the
//! pipeline result.

use crate::error::{AppError, AppResult};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

pub async fn run_hook(command: &str, cwd: &Path) -> AppResult<()> {
    info!("🪝 Running {}", command);
    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|e| AppError::fs(cwd, e))?;

    if status.success() {
        Ok(())
    } else {
        Err(AppError::Hook {
            command: command.to_string(),
            status: status.code().unwrap_or(-1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_exit_is_success() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run_hook("true", dir.path()).await.is_ok());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_hook_error() {
        let dir = tempfile::tempdir().unwrap();
        match run_hook("exit 3", dir.path()).await {
            Err(AppError::Hook { command, status }) => {
                assert_eq!(command, "exit 3");
                assert_eq!(status, 3);
            }
            other => panic!("expected Hook error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_runs_in_project_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), "").unwrap();
        assert!(run_hook("test -f marker", dir.path()).await.is_ok());
    }
}
