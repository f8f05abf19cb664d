pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "rapport",
    about = "Rapport operator CLI",
    long_about = "Operate the rapport agent core: migrations, readiness checks, config \
                  inspection, event statistics, pending actions, and decision provenance.",
    after_help = "Examples:\n  rapport doctor --json\n  rapport pending --limit 20\n  \
                  rapport why agent_action 6f1c2d\n  rapport purge --days 30"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Validate config, DB connectivity, and migration state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Report system event counts by type and category")]
    Stats,
    #[command(about = "List proposed actions waiting for approval, newest first")]
    Pending {
        #[arg(long, default_value_t = 50, help = "Maximum number of actions to return")]
        limit: u32,
    },
    #[command(about = "Explain an entity through its decision traces and graph neighbourhood")]
    Why {
        #[arg(help = "Graph node type, e.g. agent_action, system_event, person")]
        entity_type: String,
        #[arg(help = "Identifier of the entity")]
        entity_id: String,
        #[arg(long, help = "Traversal depth (defaults to graph.default_depth)")]
        depth: Option<u32>,
    },
    #[command(about = "Delete processed events older than the retention window")]
    Purge {
        #[arg(long, help = "Age threshold in days (defaults to bus.retention_days)")]
        days: Option<u32>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Stats => commands::stats::run(),
        Command::Pending { limit } => commands::pending::run(limit),
        Command::Why { entity_type, entity_id, depth } => {
            commands::why::run(&entity_type, &entity_id, depth)
        }
        Command::Purge { days } => commands::purge::run(days),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
