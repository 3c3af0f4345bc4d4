//! Explain command - show DuckDB's query plan

use std::io::{self, Read};
use std::path::Path;

use anyhow::{Context, Result};

use super::get_context;

pub fn run(dir: &Path, sql: Option<&str>, file: Option<&Path>, json: bool) -> Result<()> {
    // Get SQL from: argument, file, or stdin
    let sql_content = if let Some(sql) = sql {
        sql.to_string()
    } else if let Some(file_path) = file {
        std::fs::read_to_string(file_path)
            .with_context(|| format!("Failed to read SQL file: {:?}", file_path))?
    } else if atty::isnt(atty::Stream::Stdin) {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read SQL from stdin")?;
        buffer
    } else {
        anyhow::bail!("No SQL query provided. Use positional argument, --file, or pipe from stdin.");
    };

    let ctx = get_context(dir)?;
    let plan = ctx.target.explain(sql_content.trim())?;

    if json {
        println!("{}", serde_json::json!({"sql": sql_content.trim(), "plan": plan}));
        return Ok(());
    }

    for line in &plan {
        println!("{}", line);
    }

    Ok(())
}
