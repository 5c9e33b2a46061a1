//! CLI command implementations

pub mod import;
pub mod logs;
pub mod presets;
pub mod rules;

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ledgerlift_core::config;
use ledgerlift_core::domain::{CanonicalField, ColumnMapping};
use ledgerlift_core::services::LoggingService;
use ledgerlift_core::LedgerliftContext;

pub use ledgerlift_core::services::LogEvent;

/// Get the logging service for CLI operations
///
/// Returns None if logging fails to initialize (never blocks operations)
pub fn get_logger() -> Option<LoggingService> {
    let data_dir = get_data_dir().ok()?;
    std::fs::create_dir_all(&data_dir).ok()?;
    LoggingService::new(&data_dir, env!("CARGO_PKG_VERSION")).ok()
}

/// Log an event, ignoring any errors
pub fn log_event(logger: &Option<LoggingService>, event: LogEvent) {
    if let Some(l) = logger {
        if let Err(e) = l.log(event) {
            tracing::debug!(error = %e, "event log unavailable");
        }
    }
}

/// Record a failed command in the event log, ignoring any errors
pub fn log_failure(message: &str) {
    if let Some(l) = get_logger() {
        if let Err(e) = l.log_error("command_failed", message) {
            tracing::debug!(error = %e, "event log unavailable");
        }
    }
}

/// Data directory from `LEDGERLIFT_DIR` or `~/.ledgerlift`
pub fn get_data_dir() -> Result<PathBuf> {
    config::data_dir().context("Failed to locate the data directory")
}

/// Open the data directory and its database
pub fn get_context() -> Result<LedgerliftContext> {
    let data_dir = get_data_dir()?;
    LedgerliftContext::new(&data_dir)
        .with_context(|| format!("Failed to open ledgerlift data in {}", data_dir.display()))
}

/// Read CSV text from a file, or from stdin when no file is given
pub fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            if atty::is(atty::Stream::Stdin) {
                bail!("No CSV file given. Pass a path or pipe the file on stdin.");
            }
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        }
    }
}

/// Parse `COLUMN=FIELD` arguments into a mapping, in argument order
///
/// The last `=` splits, so column names may contain `=`.
pub fn parse_mapping_args(args: &[String]) -> Result<Vec<ColumnMapping>> {
    args.iter()
        .map(|arg| {
            let (column, field) = arg
                .rsplit_once('=')
                .with_context(|| format!("Invalid mapping '{}': expected COLUMN=FIELD", arg))?;
            let column = column.trim();
            if column.is_empty() {
                bail!("Invalid mapping '{}': column name is empty", arg);
            }
            let field: CanonicalField = field
                .parse::<CanonicalField>()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("Invalid mapping '{}'", arg))?;
            Ok(ColumnMapping::new(column, field))
        })
        .collect()
}
