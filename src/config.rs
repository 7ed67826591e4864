//! Application configuration module
//!
//! Loads `supabase/config.toml` through the `config` crate. Only the keys the
//! schema engine consumes are modelled; everything else in the file is ignored.

use globset::Glob;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::error::AppError;

/// Default location of declared schema files, relative to the project root
pub const DEFAULT_SCHEMA_GLOB: &str = "supabase/schemas/**/*.sql";
/// Default seed file, relative to the project root
pub const DEFAULT_SEED_GLOB: &str = "supabase/seed.sql";

static ENV_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^env\(([A-Za-z_][A-Za-z0-9_]*)\)$").expect("valid env() pattern"));

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load environment file: {0}")]
    EnvLoad(#[from] dotenvy::Error),

    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// `[db]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbSettings {
    pub port: u16,
    pub shadow_port: u16,
    pub major_version: u32,
    pub migrations: MigrationSettings,
    pub seed: SeedSettings,
}

impl Default for DbSettings {
    fn default() -> Self {
        Self {
            port: 54322,
            shadow_port: 54320,
            major_version: 15,
            migrations: MigrationSettings::default(),
            seed: SeedSettings::default(),
        }
    }
}

/// `[db.migrations]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MigrationSettings {
    pub enabled: bool,
    pub schema_paths: Vec<String>,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            schema_paths: vec![DEFAULT_SCHEMA_GLOB.to_string()],
        }
    }
}

/// `[db.seed]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SeedSettings {
    pub enabled: bool,
    pub sql_paths: Vec<String>,
}

impl Default for SeedSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sql_paths: vec![DEFAULT_SEED_GLOB.to_string()],
        }
    }
}

/// `[dev.schemas]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DevSchemaSettings {
    pub enabled: bool,
    /// Globs that trigger the schema pipeline; empty means `db.migrations.schema_paths`
    pub watch: Vec<String>,
    pub on_change: String,
    /// Output path for generated types; empty disables type generation
    pub types: String,
    /// Debounce window in milliseconds
    pub debounce: u64,
    pub sync_on_start: bool,
    pub strict_drops: bool,
    /// Per-pipeline timeout in seconds
    pub timeout: u64,
}

impl Default for DevSchemaSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            watch: Vec::new(),
            on_change: String::new(),
            types: String::new(),
            debounce: 500,
            sync_on_start: true,
            strict_drops: false,
            timeout: 300,
        }
    }
}

/// `[dev.seed]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DevSeedSettings {
    pub enabled: bool,
    pub on_change: String,
}

impl Default for DevSeedSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            on_change: String::new(),
        }
    }
}

/// `[dev]` section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DevSettings {
    pub schemas: DevSchemaSettings,
    pub seed: DevSeedSettings,
}

/// Complete project settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub project_id: String,
    pub db: DbSettings,
    pub dev: DevSettings,
}

impl Settings {
    /// Load settings for the project rooted at `project_root`.
    ///
    /// A missing `supabase/config.toml` yields the defaults. `supabase/.env`
    /// is loaded first so `env(NAME)` values can be resolved.
    pub fn load(project_root: &Path) -> Result<Self, ConfigError> {
        let supabase_dir = project_root.join("supabase");
        let env_path = supabase_dir.join(".env");
        if env_path.is_file() {
            dotenvy::from_path(&env_path)?;
        }

        let config_path = supabase_dir.join("config.toml");
        let raw = config::Config::builder()
            .add_source(
                config::File::from(config_path.as_path())
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .build()?;

        let mut settings: Settings = raw.try_deserialize()?;

        if settings.project_id.is_empty() {
            settings.project_id = project_root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "supadev".to_string());
        }
        settings.project_id = sanitize_project_id(&settings.project_id);
        settings.dev.schemas.on_change = resolve_env(&settings.dev.schemas.on_change)?;
        settings.dev.schemas.types = resolve_env(&settings.dev.schemas.types)?;
        settings.dev.seed.on_change = resolve_env(&settings.dev.seed.on_change)?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db.shadow_port == self.db.port {
            return Err(ConfigError::InvalidValue(format!(
                "db.shadow_port ({}) must differ from db.port",
                self.db.shadow_port
            )));
        }
        if self.dev.schemas.debounce == 0 {
            return Err(ConfigError::InvalidValue(
                "dev.schemas.debounce must be greater than 0".to_string(),
            ));
        }
        if self.dev.schemas.timeout == 0 {
            return Err(ConfigError::InvalidValue(
                "dev.schemas.timeout must be greater than 0".to_string(),
            ));
        }

        let globs = self
            .db
            .migrations
            .schema_paths
            .iter()
            .chain(self.db.seed.sql_paths.iter())
            .chain(self.dev.schemas.watch.iter());
        for pattern in globs {
            Glob::new(pattern).map_err(|e| {
                ConfigError::InvalidValue(format!("invalid glob {:?}: {}", pattern, e))
            })?;
        }
        Ok(())
    }

    /// Globs that feed the schema pipeline
    pub fn schema_watch_globs(&self) -> &[String] {
        if self.dev.schemas.watch.is_empty() {
            &self.db.migrations.schema_paths
        } else {
            &self.dev.schemas.watch
        }
    }

    pub fn schema_on_change(&self) -> Option<&str> {
        non_empty(&self.dev.schemas.on_change)
    }

    pub fn seed_on_change(&self) -> Option<&str> {
        non_empty(&self.dev.seed.on_change)
    }

    pub fn types_output(&self) -> Option<&str> {
        non_empty(&self.dev.schemas.types)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.dev.schemas.debounce)
    }

    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.dev.schemas.timeout)
    }

    /// Whether seeds participate in `dev` at all
    pub fn dev_seed_enabled(&self) -> bool {
        self.db.seed.enabled && self.dev.seed.enabled
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Container names only allow `[a-zA-Z0-9_.-]`
fn sanitize_project_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Expand a value of the form `env(NAME)` from the process environment
fn resolve_env(value: &str) -> Result<String, ConfigError> {
    match ENV_REF.captures(value.trim()) {
        Some(caps) => {
            let name = &caps[1];
            std::env::var(name).map_err(|_| ConfigError::MissingVar(name.to_string()))
        }
        None => Ok(value.to_string()),
    }
}
