//! Drift command - compare live schema with the applied migrations

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use super::get_context;
use crate::output;

pub fn run(dir: &Path, json: bool) -> Result<()> {
    let ctx = get_context(dir)?;
    let report = ctx.drift_service.check()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Replayed {} applied migration(s) into a shadow database",
        report.applied.len()
    );
    println!();

    if report.is_clean() {
        output::success("No drift: live schema matches the applied migrations");
        return Ok(());
    }

    println!("{}", "Schema drift".red().bold());
    for drift in &report.drift {
        println!("  - {}", drift);
    }

    std::process::exit(1);
}
