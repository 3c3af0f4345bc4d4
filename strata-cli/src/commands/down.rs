//! Down command - roll back applied migrations

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use dialoguer::Confirm;

use super::get_context;
use crate::output;

pub fn run(dir: &Path, steps: usize, force: bool, json: bool) -> Result<()> {
    let ctx = get_context(dir)?;

    if steps == 0 {
        anyhow::bail!("--steps must be at least 1");
    }

    let plan = ctx.migration_service.status()?;
    let targets: Vec<&str> = plan
        .applied()
        .iter()
        .rev()
        .take(steps)
        .map(|r| r.id.as_str())
        .collect();

    if targets.is_empty() {
        if json {
            println!("{}", serde_json::json!({"rolled_back": []}));
        } else {
            println!("No applied migrations to roll back.");
        }
        return Ok(());
    }

    // Confirm unless --force
    if !force && !json {
        println!("\n{}", "This will roll back:".yellow());
        for id in &targets {
            println!("  - {}", id);
        }
        println!("{}\n", "Data in dropped columns and tables is lost.".dimmed());

        if !Confirm::new()
            .with_prompt("Are you sure?")
            .default(false)
            .interact()?
        {
            println!("{}\n", "Cancelled".dimmed());
            return Ok(());
        }
    }

    let report = ctx.migration_service.rollback(steps)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for migration in &report.rolled_back {
        println!(
            "{} {} {}",
            "Rolled back".green(),
            migration.id,
            format!("({}ms)", migration.execution_ms).dimmed()
        );
    }
    output::success(&format!(
        "Rolled back {} migration(s)",
        report.rolled_back.len()
    ));

    Ok(())
}
