//! Resolve command - baseline an existing database

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use super::get_context;
use crate::output;

pub fn run(dir: &Path, id: &str, json: bool) -> Result<()> {
    let ctx = get_context(dir)?;
    let recorded = ctx.migration_service.resolve(id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recorded)?);
        return Ok(());
    }

    if recorded.is_empty() {
        output::info(&format!("Nothing to resolve up to {}", id));
        return Ok(());
    }

    for record in &recorded {
        println!("{} {}", "Marked applied".green(), record.id);
    }
    output::warning("Their SQL was not executed. Run 'strata drift' to confirm the schema matches.");

    Ok(())
}
