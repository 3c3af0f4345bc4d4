//! Init command - set up a project directory

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use strata_core::adapters::{DirectorySource, EmbeddedSource};
use strata_core::config::{Config, CONFIG_FILE};
use strata_core::ports::MigrationSource;
use strata_core::services::AuthoringService;

pub fn run(dir: &Path, empty: bool, database: Option<String>) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create project directory: {:?}", dir))?;

    let existed = dir.join(CONFIG_FILE).exists();
    let mut config = Config::load(dir)?;
    if let Some(database) = database {
        config.database = dir.join(database);
    }
    config.save(dir)?;

    std::fs::create_dir_all(&config.migrations_dir).with_context(|| {
        format!(
            "Failed to create migrations directory: {:?}",
            config.migrations_dir
        )
    })?;

    let imported = if empty {
        Vec::new()
    } else {
        let embedded = EmbeddedSource::registrations();
        let target = Arc::new(DirectorySource::new(&config.migrations_dir));
        AuthoringService::new(target).import(&embedded.load()?)?
    };

    if existed {
        println!("Updated {}", dir.join(CONFIG_FILE).display());
    } else {
        println!("{} {}", "Created".green(), dir.join(CONFIG_FILE).display());
    }
    println!("  Database: {}", config.database.display());
    println!("  Migrations: {}", config.migrations_dir.display());
    for id in &imported {
        println!("  {} {}", "+".green(), id);
    }
    if !imported.is_empty() {
        println!();
        println!("Run {} to apply them.", "strata up".bold());
    }

    Ok(())
}
