//! Strata CLI - schema migrations for DuckDB

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{doctor, down, drift, explain, init, logs, new, resolve, status, up};

/// Strata - versioned schema migrations for DuckDB
#[derive(Parser)]
#[command(name = "strata", version, about, long_about = None)]
struct Cli {
    /// Project directory holding strata.json
    #[arg(long, short = 'C', global = true, env = "STRATA_DIR", default_value = ".")]
    dir: PathBuf,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create strata.json and the migrations directory
    Init {
        /// Do not copy the registrations history into the project
        #[arg(long)]
        empty: bool,
        /// Database file, relative to the project directory
        #[arg(long)]
        database: Option<String>,
    },

    /// Show applied and pending migrations
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply pending migrations
    Up {
        /// Stop after this migration id
        #[arg(long)]
        to: Option<String>,
        /// Record migrations whose objects already exist instead of failing
        #[arg(long)]
        adopt: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Roll back applied migrations using their down SQL
    Down {
        /// Number of migrations to roll back
        #[arg(long, default_value = "1")]
        steps: usize,
        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Mark migrations as applied without running them
    Resolve {
        /// Last migration id to mark as applied
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Author a new migration from schema operations
    New {
        /// Migration name, turned into the id suffix
        name: String,
        /// Table the operations apply to
        #[arg(long)]
        table: String,
        /// Create the table with this column (name:TYPE, name:TYPE! for NOT NULL)
        #[arg(long = "column")]
        create: Vec<String>,
        /// Add a column (name:TYPE, name:TYPE! for NOT NULL)
        #[arg(long = "add-column")]
        add_columns: Vec<String>,
        /// Drop a column
        #[arg(long = "drop-column")]
        drop_columns: Vec<String>,
        /// Create an index over comma-separated columns
        #[arg(long = "index")]
        indexes: Vec<String>,
        /// Create a unique index over comma-separated columns
        #[arg(long = "unique-index")]
        unique_indexes: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compare the live schema with what the applied migrations produce
    Drift {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run migration health checks
    Doctor {
        /// Show verbose output
        #[arg(long)]
        details: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show DuckDB's plan for a query
    Explain {
        /// SQL query to explain
        sql: Option<String>,
        /// Read SQL from file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// View and manage run events
    Logs {
        #[command(subcommand)]
        command: logs::LogsCommands,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    let result = run(cli);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let dir = cli.dir.as_path();
    match cli.command {
        Commands::Init { empty, database } => init::run(dir, empty, database),
        Commands::Status { json } => status::run(dir, json),
        Commands::Up { to, adopt, json } => up::run(dir, to.as_deref(), adopt, json),
        Commands::Down { steps, force, json } => down::run(dir, steps, force, json),
        Commands::Resolve { id, json } => resolve::run(dir, &id, json),
        Commands::New {
            name,
            table,
            create,
            add_columns,
            drop_columns,
            indexes,
            unique_indexes,
            json,
        } => new::run(
            dir,
            &name,
            new::NewOps {
                table,
                create,
                add_columns,
                drop_columns,
                indexes,
                unique_indexes,
            },
            json,
        ),
        Commands::Drift { json } => drift::run(dir, json),
        Commands::Doctor { details, json } => doctor::run(dir, details, json),
        Commands::Explain { sql, file, json } => {
            explain::run(dir, sql.as_deref(), file.as_deref(), json)
        }
        Commands::Logs { command } => logs::run(dir, command),
    }
}
