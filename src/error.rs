//! Error handling module
//!
//! Provides the unified error type for every command and pipeline, together
//! with the exit-code and reporting policy applied at the CLI boundary.

use crate::output::OutputManager;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

/// Location of the first unparseable statement in a declared schema file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub path: PathBuf,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}",
            self.path.display(),
            self.line,
            self.column,
            self.message
        )
    }
}

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    UserInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Filesystem error at {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Syntax error in {0}")]
    SqlSyntax(SyntaxError),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Shadow database error: {0}")]
    Shadow(String),

    #[error("Schema differ timed out after {}s", .0.as_secs())]
    DifferTimeout(Duration),

    #[error("Schema differ failed: {stderr}")]
    DifferFailed { stderr: String },

    #[error("Statement {} failed: {message}", .statement_index + 1)]
    ApplyFailed {
        statement_index: usize,
        sql_state: Option<String>,
        message: String,
    },

    #[error("Refusing to apply {0} destructive statement(s) in strict-drops mode")]
    DestructiveBlocked(usize),

    #[error("Seed file {} failed: {message}", .path.display())]
    Seed { path: PathBuf, message: String },

    #[error("Command `{command}` exited with status {status}")]
    Hook { command: String, status: i32 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
}

impl AppError {
    /// Wrap an IO error with the path it happened on
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Process exit code: 1 for user errors, 2 for system errors
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::UserInput(_)
            | AppError::Config(_)
            | AppError::SqlSyntax(_)
            | AppError::DestructiveBlocked(_) => 1,
            _ => 2,
        }
    }

    /// Whether a running `dev` session must stop on this error.
    /// Startup failures are fatal regardless and never reach this check.
    pub fn is_fatal_in_dev(&self) -> bool {
        matches!(self, AppError::UserInput(_) | AppError::Config(_))
    }

    /// Cancellation is expected on Ctrl+C and is never reported
    pub fn is_silent(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }

    /// Canonical fix for this error, if one exists
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            AppError::SqlSyntax(_) => Some("Fix the statement and save the file again"),
            AppError::ApplyFailed { .. } => {
                Some("Try rerunning the command with the local database reset: run `supadev db reset`")
            }
            AppError::DestructiveBlocked(_) => {
                Some("Disable strict_drops under [dev.schemas] or write the migration by hand")
            }
            AppError::Container(_) | AppError::Shadow(_) => {
                Some("Make sure Docker is running and the configured ports are free")
            }
            AppError::DifferTimeout(_) => Some("Check that both databases are reachable from Docker"),
            AppError::Hook { .. } => Some("Fix the on_change command or remove it from config.toml"),
            AppError::Seed { .. } => Some("Make your seed statements idempotent, or run `supadev db reset`"),
            _ => None,
        }
    }

    /// Print the error to the user channel with location details
    pub fn report(&self, output: &OutputManager) {
        if self.is_silent() {
            return;
        }

        match self {
            AppError::ApplyFailed {
                sql_state: Some(state),
                ..
            } => output.error(&format!("{} (SQLSTATE {})", self, state)),
            AppError::Database(e) => {
                error!("Database error: {:?}", e);
                match e.code() {
                    Some(code) => output.error(&format!("{} (SQLSTATE {})", self, code.code())),
                    None => output.error(&self.to_string()),
                }
            }
            _ => output.error(&self.to_string()),
        }

        if let Some(hint) = self.suggestion() {
            output.info(hint);
        }
    }
}

/// Result type alias used across the crate
pub type AppResult<T> = Result<T, AppError>;

/// Helper function to create a user input error
pub fn user_error(msg: impl Into<String>) -> AppError {
    AppError::UserInput(msg.into())
}

/// Helper function to create a shadow database error
pub fn shadow_error(msg: impl Into<String>) -> AppError {
    AppError::Shadow(msg.into())
}
