use chrono::{NaiveDateTime, Utc};
use clap::{Subcommand, ValueEnum};
use comfy_table::Cell;
use std::collections::BTreeMap;

use crate::cancel::CancellationToken;
use crate::commands::ExampleGroup;
use crate::db::DatabaseManager;
use crate::error::{user_error, AppResult};
use crate::migration::history::pending_migrations;
use crate::migration::store::VERSION_FORMAT;
use crate::migration::{HistoryService, MigrationFile, MigrationStore};
use crate::output::OutputManager;
use crate::state::ProjectContext;

pub const EXAMPLES: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Write migrations",
        commands: &[
            "supadev migration new create_users   # Create an empty migration file",
            "supadev migration list               # Compare local files with the history table",
        ],
    },
    ExampleGroup {
        title: "Apply migrations",
        commands: &[
            "supadev migration up                 # Apply pending migrations to the local database",
            "supadev migration up --include-all   # Also apply files older than the last applied one",
        ],
    },
    ExampleGroup {
        title: "Recovery",
        commands: &[
            "supadev migration repair 20240101000000 --status applied    # Record without running",
            "supadev migration repair 20240101000000 --status reverted   # Forget a version",
        ],
    },
];

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepairStatus {
    Applied,
    Reverted,
}

#[derive(Subcommand, Debug)]
pub enum MigrationCommands {
    /// Create an empty migration file
    #[command(name = "new")]
    New {
        /// Migration name (letters, digits, '_' and '-')
        name: String,
    },

    /// Apply pending migrations to the local database
    #[command(name = "up")]
    Up {
        /// Apply pending migrations older than the last applied version
        #[arg(long)]
        include_all: bool,
    },

    /// Mark migration versions as applied or reverted without running them
    #[command(name = "repair")]
    Repair {
        /// Versions to repair (YYYYMMDDHHMMSS)
        #[arg(required = true)]
        versions: Vec<String>,

        #[arg(long, value_enum)]
        status: RepairStatus,
    },

    /// List local and applied migrations
    #[command(name = "list")]
    List,
}

pub async fn handle_migration_commands(
    command: MigrationCommands,
    ctx: &ProjectContext,
    output: &OutputManager,
) -> AppResult<()> {
    match command {
        MigrationCommands::New { name } => handle_new(ctx, &name, output),
        MigrationCommands::Up { include_all } => handle_up(ctx, include_all, output).await,
        MigrationCommands::Repair { versions, status } => {
            handle_repair(ctx, &versions, status, output).await
        }
        MigrationCommands::List => handle_list(ctx, output).await,
    }
}

fn handle_new(ctx: &ProjectContext, name: &str, output: &OutputManager) -> AppResult<()> {
    let file = ctx
        .migration_store()
        .create(name, "", Utc::now(), &ctx.temp_dir)?;
    output.success(&format!(
        "Created new migration at supabase/migrations/{}",
        file.filename
    ));
    Ok(())
}

async fn local_history(ctx: &ProjectContext) -> AppResult<HistoryService> {
    let db = DatabaseManager::new(ctx.local_params()).await?;
    Ok(HistoryService::new(db.pool().clone()))
}

async fn handle_up(ctx: &ProjectContext, include_all: bool, output: &OutputManager) -> AppResult<()> {
    let local = ctx.migration_store().list()?;
    MigrationStore::check_unique_versions(&local)?;

    let history = local_history(ctx).await?;
    let applied = history.list_applied().await?;
    let pending = pending_migrations(&local, &applied, include_all)?;

    if pending.is_empty() {
        output.info("Local database is up to date");
        return Ok(());
    }
    for file in &pending {
        output.bullet(&format!("Applying migration {}", file.filename));
    }
    let count = history.apply_all(&pending, &CancellationToken::new()).await?;
    output.success(&format!("Applied {} migration(s)", count));
    Ok(())
}

/// Reject anything that is not a `YYYYMMDDHHMMSS` timestamp
pub fn validate_versions(versions: &[String]) -> AppResult<()> {
    for version in versions {
        if version.len() != 14 || NaiveDateTime::parse_from_str(version, VERSION_FORMAT).is_err() {
            return Err(user_error(format!(
                "invalid migration version {:?}: expected YYYYMMDDHHMMSS",
                version
            )));
        }
    }
    Ok(())
}

/// Local files for `versions`; marking a version applied needs its file
pub fn files_for_versions<'a>(
    local: &'a [MigrationFile],
    versions: &[String],
) -> AppResult<Vec<&'a MigrationFile>> {
    versions
        .iter()
        .map(|version| {
            local
                .iter()
                .find(|f| &f.version == version)
                .ok_or_else(|| {
                    user_error(format!(
                        "no local migration file for version {} in supabase/migrations",
                        version
                    ))
                })
        })
        .collect()
}

async fn handle_repair(
    ctx: &ProjectContext,
    versions: &[String],
    status: RepairStatus,
    output: &OutputManager,
) -> AppResult<()> {
    validate_versions(versions)?;
    let local = ctx.migration_store().list()?;

    match status {
        RepairStatus::Applied => {
            let files = files_for_versions(&local, versions)?;
            let history = local_history(ctx).await?;
            for file in files {
                history.mark_applied(file).await?;
                output.success(&format!("Marked {} as applied", file.filename));
            }
        }
        RepairStatus::Reverted => {
            let history = local_history(ctx).await?;
            for version in versions {
                if history.mark_reverted(version).await? {
                    output.success(&format!("Marked {} as reverted", version));
                } else {
                    output.warning(&format!("{} was not recorded as applied", version));
                }
            }
        }
    }
    Ok(())
}

async fn handle_list(ctx: &ProjectContext, output: &OutputManager) -> AppResult<()> {
    let local = ctx.migration_store().list()?;
    let applied = local_history(ctx).await?.list_applied().await?;

    // version -> (local filename, applied at)
    let mut rows: BTreeMap<String, (Option<String>, Option<String>)> = BTreeMap::new();
    for file in &local {
        rows.entry(file.version.clone()).or_default().0 = Some(file.filename.clone());
    }
    for migration in &applied {
        rows.entry(migration.version.clone()).or_default().1 =
            Some(migration.applied_at.format("%Y-%m-%d %H:%M:%S").to_string());
    }

    if rows.is_empty() {
        output.info("No migrations found");
        return Ok(());
    }

    let mut table = output.table(&["Version", "Local", "Applied"]);
    for (version, (filename, applied_at)) in rows {
        table.add_row(vec![
            Cell::new(version),
            Cell::new(filename.unwrap_or_else(|| "-".to_string())),
            Cell::new(applied_at.unwrap_or_else(|| "-".to_string())),
        ]);
    }
    output.print_table(&table);
    Ok(())
}
