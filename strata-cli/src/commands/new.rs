//! New command - author a migration from schema operations

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use strata_core::{ColumnDef, SchemaChange};

use super::get_context;

/// Operations collected from the command line, all on one table
pub struct NewOps {
    pub table: String,
    pub create: Vec<String>,
    pub add_columns: Vec<String>,
    pub drop_columns: Vec<String>,
    pub indexes: Vec<String>,
    pub unique_indexes: Vec<String>,
}

impl NewOps {
    /// Table first, then columns, then indexes so later operations can
    /// refer to what earlier ones create
    fn into_change(self) -> Result<SchemaChange> {
        let mut change = SchemaChange::new();

        if !self.create.is_empty() {
            let columns = self
                .create
                .iter()
                .map(|spec| ColumnDef::parse(spec))
                .collect::<strata_core::Result<Vec<_>>>()?;
            change = change.create_table(&self.table, columns);
        }
        for spec in &self.add_columns {
            change = change.add_column(&self.table, ColumnDef::parse(spec)?);
        }
        for column in &self.drop_columns {
            change = change.drop_column(&self.table, column);
        }
        for spec in &self.indexes {
            change = change.create_index(&self.table, &split_columns(spec));
        }
        for spec in &self.unique_indexes {
            change = change.create_unique_index(&self.table, &split_columns(spec));
        }

        Ok(change)
    }
}

fn split_columns(spec: &str) -> Vec<&str> {
    spec.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect()
}

pub fn run(dir: &Path, name: &str, ops: NewOps, json: bool) -> Result<()> {
    let ctx = get_context(dir)?;
    let change = ops.into_change()?;
    let created = ctx.authoring_service.create(name, &change)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&created)?);
        return Ok(());
    }

    println!("{} {}", "Created".green(), created.dir.display());
    println!();
    println!("{}", "-- up".dimmed());
    print!("{}", created.up_sql);
    println!("{}", "-- down".dimmed());
    print!("{}", created.down_sql);

    Ok(())
}
