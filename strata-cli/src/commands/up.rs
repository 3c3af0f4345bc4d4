//! Up command - apply pending migrations

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use strata_core::config::ConflictPolicy;
use strata_core::services::{MigrationOptions, MigrationService};

use super::get_context;
use crate::output;

pub fn run(dir: &Path, to: Option<&str>, adopt: bool, json: bool) -> Result<()> {
    let ctx = get_context(dir)?;

    let service = if adopt {
        let mut service = MigrationService::new(
            Arc::clone(&ctx.target),
            Arc::clone(&ctx.source),
            MigrationOptions {
                conflict_policy: ConflictPolicy::Adopt,
                ..MigrationOptions::from_config(&ctx.config)
            },
        );
        if let Some(logger) = &ctx.logger {
            service = service.with_logger(Arc::clone(logger));
        }
        Arc::new(service)
    } else {
        Arc::clone(&ctx.migration_service)
    };

    let spinner = if json {
        None
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("Migrating {}", ctx.target.describe()));
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    };

    let result = match to {
        Some(id) => service.apply_to(id),
        None => service.run_pending(),
    };

    if let Some(pb) = &spinner {
        pb.finish_and_clear();
    }
    let report = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.total() == 0 {
        output::success("Database is up to date");
        return Ok(());
    }

    for applied in &report.applied {
        println!(
            "{} {} {}",
            "Applied".green(),
            applied.id,
            format!("({}ms)", applied.execution_ms).dimmed()
        );
    }
    for id in &report.adopted {
        println!("{} {} {}", "Adopted".yellow(), id, "(schema already present)".dimmed());
    }
    println!();
    println!(
        "{} applied, {} adopted, {} already applied",
        report.applied.len(),
        report.adopted.len(),
        report.skipped
    );

    Ok(())
}
