use clap::Args;

use crate::commands::ExampleGroup;
use crate::error::AppResult;
use crate::output::OutputManager;
use crate::pipeline::{DevOptions, DevSession};
use crate::state::ProjectContext;

pub const EXAMPLES: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Develop against declared schemas",
        commands: &[
            "supadev dev                    # Start the local database and watch supabase/",
            "supadev dev --no-start         # Require an already running database",
        ],
    },
    ExampleGroup {
        title: "Guard against data loss",
        commands: &["supadev dev --strict-drops     # Refuse diffs that drop tables or columns"],
    },
];

#[derive(Args, Debug)]
pub struct DevArgs {
    /// Do not start the local database if it is stopped
    #[arg(long)]
    pub no_start: bool,

    /// Refuse to apply diffs containing DROP statements
    #[arg(long)]
    pub strict_drops: bool,
}

pub async fn handle_dev(args: DevArgs, ctx: &ProjectContext, output: &OutputManager) -> AppResult<()> {
    output.heading("Dev session");
    output.bullet(&format!("Project: {}", ctx.settings.project_id));
    output.bullet(&format!("Schemas: {}", ctx.settings.schema_watch_globs().join(", ")));

    let options = DevOptions {
        no_start: args.no_start,
        strict_drops: args.strict_drops,
    };
    DevSession::new(ctx, options, output.clone()).run().await
}
