//! Logs command - view and manage run events

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use strata_core::config::Config;
use strata_core::{EntryPoint, LoggingService};

use crate::output;

#[derive(Subcommand)]
pub enum LogsCommands {
    /// Show recent run events
    List {
        /// Number of entries to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Show only errors
        #[arg(long)]
        errors: bool,
        /// Show only events from this run
        #[arg(long)]
        run: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Clear old run events
    Clear {
        /// Delete events older than N days
        #[arg(long, default_value = "30")]
        older_than_days: u64,
        /// Skip confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show event log statistics and database path
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// The event log lives in the configured log directory; it does not need
/// the target database to be reachable
fn get_logging_service(dir: &Path) -> Result<LoggingService> {
    let config = Config::load(dir)?;
    LoggingService::new(&config.log_dir, EntryPoint::Cli, env!("CARGO_PKG_VERSION"))
        .with_context(|| format!("Failed to open event log in {}", config.log_dir.display()))
}

fn format_timestamp(timestamp_ms: i64) -> String {
    use chrono::{TimeZone, Utc};
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

pub fn run(dir: &Path, command: LogsCommands) -> Result<()> {
    match command {
        LogsCommands::List {
            limit,
            errors,
            run,
            json,
        } => {
            let service = get_logging_service(dir)?;
            let entries = match (&run, errors) {
                (Some(run_id), _) => service.get_run(run_id, limit)?,
                (None, true) => service.get_errors(limit)?,
                (None, false) => service.get_recent(limit)?,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }

            if entries.is_empty() {
                println!("No run events found.");
                return Ok(());
            }

            let mut table = output::create_table();
            table.set_header(vec!["Time", "Entry", "Event", "Migration", "Duration", "Error"]);

            for entry in entries {
                let error_indicator = match &entry.error_kind {
                    Some(kind) => kind.red().to_string(),
                    None => String::new(),
                };

                table.add_row(vec![
                    format_timestamp(entry.timestamp),
                    entry.entry_point,
                    entry.event,
                    entry.migration_id.unwrap_or_default(),
                    entry
                        .duration_ms
                        .map(|ms| format!("{}ms", ms))
                        .unwrap_or_default(),
                    error_indicator,
                ]);
            }

            println!("{}", table);

            // Show error details if any
            if !errors && run.is_none() {
                let errors_list = service.get_errors(5)?;
                if !errors_list.is_empty() {
                    println!();
                    println!("{}", "Recent Errors:".red().bold());
                    for err in errors_list.iter().take(3) {
                        println!(
                            "  {} [{}]: {}",
                            format_timestamp(err.timestamp).dimmed(),
                            err.event,
                            err.error_message.as_deref().unwrap_or("Unknown error")
                        );
                    }
                }
            }
        }
        LogsCommands::Clear {
            older_than_days,
            force,
            json,
        } => {
            let service = get_logging_service(dir)?;
            let cutoff_ms = chrono::Utc::now().timestamp_millis()
                - (older_than_days as i64 * 24 * 60 * 60 * 1000);

            if !force && !json {
                use dialoguer::Confirm;
                if !Confirm::new()
                    .with_prompt(format!(
                        "Delete run events older than {} days?",
                        older_than_days
                    ))
                    .default(false)
                    .interact()?
                {
                    println!("Cancelled.");
                    return Ok(());
                }
            }

            let deleted = service.delete_before(cutoff_ms)?;

            if json {
                println!("{}", serde_json::json!({"deleted": deleted}));
            } else {
                println!("Deleted {} run events", deleted);
            }
        }
        LogsCommands::Stats { json } => {
            let service = get_logging_service(dir)?;
            let stats = service.stats()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("{}", "Event Log Statistics".bold());
                println!("  Total entries: {}", stats.total_entries);
                println!("  Runs: {}", stats.run_count);
                println!("  Errors: {}", stats.error_count);
                println!("  Database: {}", stats.database_path.display());
                println!("  Size: {}", output::format_size(stats.database_size_bytes));
            }
        }
    }

    Ok(())
}
