//! Status command - show applied and pending migrations

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use comfy_table::{Cell, Color};
use strata_core::services::MigrationState;

use super::get_context;
use crate::output;

pub fn run(dir: &Path, json: bool) -> Result<()> {
    let ctx = get_context(dir)?;
    let plan = ctx.migration_service.status()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("{}", "Migration Status".bold());
    println!("  Database: {}", ctx.target.describe());
    println!("  Migrations: {}", ctx.source.describe());
    println!();

    if plan.statuses.is_empty() {
        println!("No migrations found.");
        return Ok(());
    }

    let mut table = output::create_table();
    table.set_header(vec!["Migration", "State", "Applied At", "Time", "Down"]);

    for status in &plan.statuses {
        let state_cell = match status.state {
            MigrationState::Applied => Cell::new("applied").fg(Color::Green),
            MigrationState::Pending => Cell::new("pending").fg(Color::Yellow),
            state => Cell::new(state.as_str()).fg(Color::Red),
        };
        table.add_row(vec![
            Cell::new(&status.id),
            state_cell,
            Cell::new(
                status
                    .applied_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default(),
            ),
            Cell::new(
                status
                    .execution_ms
                    .map(|ms| format!("{}ms", ms))
                    .unwrap_or_default(),
            ),
            Cell::new(if status.reversible { "yes" } else { "no" }),
        ]);
    }

    println!("{}", table);
    println!();

    let pending = plan.count(MigrationState::Pending);
    if !plan.is_consistent() {
        output::error("Applied history no longer matches the migration source");
        output::info("Run 'strata doctor --details' for more information");
    } else if pending > 0 {
        output::warning(&format!("{} migration(s) pending", pending));
    } else {
        output::success("Database is up to date");
    }

    Ok(())
}
