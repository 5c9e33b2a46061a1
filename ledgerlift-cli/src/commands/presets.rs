//! Presets command - saved column mappings

use anyhow::{bail, Result};
use clap::Subcommand;
use colored::Colorize;
use ledgerlift_core::config::Config;

use super::{get_data_dir, get_logger, log_event, LogEvent};
use crate::output;

#[derive(Subcommand)]
pub enum PresetsCommands {
    /// List saved mapping presets
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a saved mapping preset
    Remove {
        /// Preset name
        name: String,
    },
}

pub fn run(command: PresetsCommands) -> Result<()> {
    let data_dir = get_data_dir()?;
    let mut config = Config::load(&data_dir)?;

    match command {
        PresetsCommands::List { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&config.mapping_presets)?);
                return Ok(());
            }

            if config.list_presets().is_empty() {
                println!("No presets saved. Use 'lift import --save-preset NAME' to create one.");
                return Ok(());
            }

            for name in config.list_presets() {
                let Some(mapping) = config.get_preset(name) else {
                    continue;
                };
                println!("{}", name.bold());
                let mut table = output::create_table();
                table.set_header(vec!["Column", "Field"]);
                for entry in mapping {
                    table.add_row(vec![entry.column.clone(), entry.field.to_string()]);
                }
                println!("{}", table);
            }
        }
        PresetsCommands::Remove { name } => {
            if !config.remove_preset(&name) {
                bail!("Preset '{}' not found", name.trim());
            }
            config.save(&data_dir)?;
            log_event(&get_logger(), LogEvent::new("preset_removed").with_command("presets"));
            output::success(&format!("Removed preset '{}'", name.trim()));
        }
    }

    Ok(())
}
