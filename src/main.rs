//! supadev - local development CLI for declarative Postgres schemas
//!
//! Declared schema files under `supabase/schemas/` describe the desired
//! database. `supadev dev` keeps the local database in line with them by
//! diffing against a shadow database built from the committed migrations,
//! and `supadev db diff -f <name>` turns the difference into a migration.

mod apply;
mod cancel;
mod commands;
mod config;
mod connection;
mod db;
mod differ;
mod error;
mod files;
mod logging;
mod migration;
mod output;
mod pipeline;
mod seed;
mod shadow;
mod sql;
mod state;
mod supervisor;
mod watcher;

use clap::{error::ErrorKind, ColorChoice, Command, CommandFactory, FromArgMatches, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

use crate::commands::{
    command_examples,
    db::{handle_db_commands, DbCommands},
    dev::{handle_dev, DevArgs},
    migration::{handle_migration_commands, MigrationCommands},
    render_examples,
};
use crate::error::AppResult;
use crate::output::{GlobalOptions, OutputManager};
use crate::state::ProjectContext;

const ENVIRONMENT_VARIABLES: &[(&str, &str)] = &[(
    "DEBUG",
    "Comma separated debug namespaces, e.g. supadev:shadow,supadev:watcher or *",
)];

#[derive(Parser)]
#[command(name = "supadev")]
#[command(version)]
#[command(
    about = "Declarative schema development for local Postgres",
    long_about = r#"Declarative schema development for local Postgres:

• Edit SQL files under supabase/schemas/ and see them applied live
• Diffs are computed against a shadow database built from your migrations
• Turn the accumulated changes into a timestamped migration when ready

Commands:
  dev        Watch declared schemas and keep the local database in sync
  db         Diff or reset the local database
  migration  Create, apply and repair migrations
"#
)]
#[command(subcommand_required = true, arg_required_else_help = true)]
struct Cli {
    /// Run as if started in this directory
    #[arg(long, global = true)]
    workdir: Option<PathBuf>,

    /// Suppress output (only errors and SQL will be shown)
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch declared schemas and apply changes to the local database
    Dev(DevArgs),

    /// Diff or reset the local database
    #[command(subcommand)]
    Db(DbCommands),

    /// Manage migration files and the migration history
    #[command(subcommand)]
    Migration(MigrationCommands),
}

impl Cli {
    /// Parse arguments; help and version exit 0, usage errors exit 1
    fn parse_or_exit() -> Result<Self, ExitCode> {
        let matches = build_cli_command().try_get_matches().map_err(|err| {
            let _ = err.print();
            match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            }
        })?;
        Cli::from_arg_matches(&matches).map_err(|err| {
            let _ = err.print();
            ExitCode::from(1)
        })
    }
}

fn build_cli_command() -> Command {
    let mut command = Cli::command().after_long_help(render_environment());
    if std::env::args().any(|a| a == "--no-color") {
        command = command.color(ColorChoice::Never);
    }
    for example in command_examples() {
        if let Some(subcommand) = command.find_subcommand_mut(example.name) {
            *subcommand = subcommand.clone().after_long_help(render_examples(example.groups));
        }
    }
    command
}

fn render_environment() -> String {
    let mut buffer = String::from("Environment Variables:\n");
    for (key, description) in ENVIRONMENT_VARIABLES {
        buffer.push_str(&format!("  {}  {}\n", key, description));
    }
    buffer
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::parse_or_exit() {
        Ok(cli) => cli,
        Err(code) => return code,
    };

    logging::init_tracing();
    let _ = dotenvy::dotenv();

    let output = OutputManager::new(GlobalOptions {
        quiet: cli.quiet,
        no_color: cli.no_color,
    });
    if cli.no_color {
        colored::control::set_override(false);
    }

    match execute(cli, &output).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            debug!("Command failed: {:?}", err);
            err.report(&output);
            ExitCode::from(err.exit_code())
        }
    }
}

async fn execute(cli: Cli, output: &OutputManager) -> AppResult<()> {
    let ctx = ProjectContext::find(cli.workdir.as_deref())?;
    debug!("Project root: {}", ctx.project_root.display());

    match cli.command {
        Commands::Dev(args) => handle_dev(args, &ctx, output).await,
        Commands::Db(command) => handle_db_commands(command, &ctx, output).await,
        Commands::Migration(command) => handle_migration_commands(command, &ctx, output).await,
    }
}
