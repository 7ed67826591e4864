use clap::Subcommand;
use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::commands::ExampleGroup;
use crate::db::{wait_until_ready, DatabaseManager};
use crate::error::AppResult;
use crate::migration::{HistoryService, MigrationStore, MigrationSynthesizer};
use crate::output::OutputManager;
use crate::pipeline::SessionDirty;
use crate::seed::{SeedMode, SeedRunner};
use crate::state::ProjectContext;

const DB_READY_TIMEOUT: Duration = Duration::from_secs(60);

pub const EXAMPLES: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Capture schema changes",
        commands: &[
            "supadev db diff                      # Print the SQL the declared schemas need",
            "supadev db diff -f add_users         # Write it as a new migration",
            "supadev db diff --schema public,app  # Limit the diff to some schemas",
        ],
    },
    ExampleGroup {
        title: "Start over",
        commands: &[
            "supadev db reset                     # Rebuild the local database from migrations and seeds",
            "supadev db reset --no-seed           # Skip seed files",
        ],
    },
];

#[derive(Subcommand, Debug)]
pub enum DbCommands {
    /// Diff the local database against migrations plus declared schemas
    #[command(name = "diff")]
    Diff {
        /// Write the diff to a new migration with this name
        #[arg(short = 'f', long = "file")]
        file: Option<String>,

        /// Comma separated schemas to diff
        #[arg(long, value_delimiter = ',')]
        schema: Vec<String>,
    },

    /// Recreate the local database from migrations and seeds
    #[command(name = "reset")]
    Reset {
        /// Skip seed files
        #[arg(long)]
        no_seed: bool,
    },
}

pub async fn handle_db_commands(
    command: DbCommands,
    ctx: &ProjectContext,
    output: &OutputManager,
) -> AppResult<()> {
    match command {
        DbCommands::Diff { file, schema } => handle_diff(ctx, file.as_deref(), &schema, output).await,
        DbCommands::Reset { no_seed } => handle_reset(ctx, no_seed, output).await,
    }
}

async fn handle_diff(
    ctx: &ProjectContext,
    slug: Option<&str>,
    schemas: &[String],
    output: &OutputManager,
) -> AppResult<()> {
    let mut synthesizer = MigrationSynthesizer::new(ctx, CancellationToken::new());
    let (diff, written) = synthesizer.synthesize(slug, schemas).await?;

    if diff.is_empty() {
        output.info("No schema changes found");
        return Ok(());
    }
    for statement in &diff.destructive {
        output.warning(&format!("Dropping: {}", statement.sql));
    }

    match written {
        Some(file) => {
            let shown = file
                .path
                .strip_prefix(&ctx.project_root)
                .unwrap_or(&file.path)
                .display()
                .to_string();
            output.success(&format!("Created new migration at {}", shown));
        }
        None => output.sql(&diff.sql),
    }
    Ok(())
}

async fn handle_reset(ctx: &ProjectContext, no_seed: bool, output: &OutputManager) -> AppResult<()> {
    output.heading("Resetting local database");
    let service = ctx.local_service();
    let cancel = CancellationToken::new();

    output.bullet(&format!("Recreating container {}", service.name));
    ctx.supervisor.remove(&service.name).await?;
    ctx.supervisor.ensure_running(&service).await?;

    let params = ctx.local_params();
    wait_until_ready(&params, DB_READY_TIMEOUT).await?;
    let db = DatabaseManager::new(params).await?;

    let history = HistoryService::new(db.pool().clone());
    history.ensure_table().await?;

    if ctx.settings.db.migrations.enabled {
        let files = ctx.migration_store().list()?;
        MigrationStore::check_unique_versions(&files)?;
        for file in &files {
            output.bullet(&format!("Applying migration {}", file.filename));
        }
        history.apply_all(&files, &cancel).await?;
    } else {
        output.info("Migrations are disabled in config.toml, skipping");
    }

    if !no_seed && ctx.settings.db.seed.enabled {
        let seeds = SeedRunner::new(
            db.pool().clone(),
            ctx.project_root.clone(),
            ctx.settings.db.seed.sql_paths.clone(),
        );
        let report = seeds.run(SeedMode::Cached, &cancel).await?;
        for path in &report.applied {
            output.bullet(&format!("Seeded {}", path.display()));
        }
    }

    SessionDirty::clear(&ctx.dirty_marker)?;
    output.success("Local database reset");
    Ok(())
}
