//! Ledgerlift CLI - bank-statement imports in your terminal

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{import, logs, presets, rules};

/// Environment variable holding the diagnostics filter (e.g. `debug`)
const LOG_ENV: &str = "LEDGERLIFT_LOG";

/// Ledgerlift - turn bank-statement CSVs into tagged transactions
#[derive(Parser)]
#[command(name = "lift", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import transactions from a CSV file (or stdin)
    Import {
        /// Path to CSV file; reads stdin when omitted
        file: Option<PathBuf>,
        /// Map a column to a field (type, amount, description, date, reference, ignore)
        #[arg(long = "map", value_name = "COLUMN=FIELD")]
        map: Vec<String>,
        /// Use a saved mapping preset
        #[arg(long, conflicts_with = "map")]
        preset: Option<String>,
        /// Save the chosen mapping as a preset
        #[arg(long, value_name = "NAME")]
        save_preset: Option<String>,
        /// Let the assistant propose the column mapping
        #[arg(long)]
        assist: bool,
        /// Free-text hint for the assistant
        #[arg(long)]
        guidance: Option<String>,
        /// Let the assistant suggest types and tags
        #[arg(long)]
        classify: bool,
        /// Skip the saved tag rules
        #[arg(long)]
        no_rules: bool,
        /// Commit rows flagged as duplicates too
        #[arg(long)]
        include_duplicates: bool,
        /// Review only; nothing is written
        #[arg(long)]
        dry_run: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage tag rules
    Rules {
        #[command(subcommand)]
        command: rules::RulesCommands,
    },

    /// Manage saved mapping presets
    Presets {
        #[command(subcommand)]
        command: presets::PresetsCommands,
    },

    /// View and manage the event log
    Logs {
        #[command(subcommand)]
        command: logs::LogsCommands,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let message = format!("{:#}", e);
            commands::log_failure(&message);
            output::error(&message);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Import {
            file,
            map,
            preset,
            save_preset,
            assist,
            guidance,
            classify,
            no_rules,
            include_duplicates,
            dry_run,
            json,
        } => runtime.block_on(import::run(import::ImportArgs {
            file,
            map,
            preset,
            save_preset,
            assist,
            guidance,
            classify,
            no_rules,
            include_duplicates,
            dry_run,
            json,
        })),
        Commands::Rules { command } => runtime.block_on(rules::run(command)),
        Commands::Presets { command } => presets::run(command),
        Commands::Logs { command } => logs::run(command),
    }
}
