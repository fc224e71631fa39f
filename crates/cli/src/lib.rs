pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "leadsync",
    about = "leadsync operator CLI",
    long_about = "Operate the CRM reconciliation store: migrations, config inspection, stage map seeding, offline webhook replay and CRM lookups.",
    after_help = "Examples:\n  leadsync migrate\n  leadsync seed-stages stages.toml\n  leadsync replay stage-change payload.json --in-memory --stages stages.toml"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum MigrationDirection {
    Up,
    Down,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply (or revert) database migrations and return structured status output")]
    Migrate {
        #[arg(value_enum, default_value_t = MigrationDirection::Up)]
        direction: MigrationDirection,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Load canonical stages from a TOML file into the stage map")]
    SeedStages {
        #[arg(help = "TOML file with one [[stage]] table per canonical stage")]
        file: PathBuf,
    },
    #[command(about = "Run a stored webhook payload through the reconciliation engine")]
    Replay {
        #[arg(help = "Event kind: stage-change, owner-change, opportunity-lost, appointment-created")]
        kind: String,
        #[arg(help = "JSON payload file")]
        file: PathBuf,
        #[arg(long, help = "Replay against an empty in-memory store seeded from the payload")]
        in_memory: bool,
        #[arg(long, help = "Stage map TOML to seed the in-memory store with")]
        stages: Option<PathBuf>,
    },
    #[command(about = "Fetch one opportunity from the CRM API using the configured credentials")]
    CrmOpportunity {
        #[arg(help = "CRM opportunity id")]
        id: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate { direction } => commands::migrate::run(direction),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::SeedStages { file } => commands::seed_stages::run(&file),
        Command::Replay { kind, file, in_memory, stages } => {
            commands::replay::run(&kind, &file, in_memory, stages.as_deref())
        }
        Command::CrmOpportunity { id } => commands::crm_opportunity::run(&id),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
