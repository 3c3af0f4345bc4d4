//! Strata Core - schema migrations for DuckDB
//!
//! This crate implements the migration engine following hexagonal architecture:
//!
//! - **domain**: Migrations, ledger records, schema snapshots, typed schema changes
//! - **ports**: Trait definitions for external dependencies (MigrationSource)
//! - **services**: Apply/rollback, drift checks, authoring, health checks, run events
//! - **adapters**: Concrete implementations (migration directories, DuckDB, file locks)
//!
//! The registrations schema history ships with the crate, see
//! [`adapters::EmbeddedSource::registrations`].

pub mod adapters;
pub mod config;
pub mod domain;
pub mod log_migrations;
pub mod migrations;
pub mod ports;
pub mod services;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use adapters::{DirectorySource, DuckDbTarget};
use config::Config;
use ports::MigrationSource;
use services::*;

// Re-export commonly used types at crate root
pub use domain::{
    ColumnDef, Drift, Migration, MigrationError, MigrationRecord, OperationResult, Result,
    SchemaChange, SchemaSnapshot,
};
pub use services::{EntryPoint, LoggingService, RunEvent};

/// Main context for Strata operations
///
/// This is the primary entry point for all migration work. It holds
/// the target database, configuration, and all services.
pub struct StrataContext {
    pub project_dir: PathBuf,
    pub config: Config,
    pub target: Arc<DuckDbTarget>,
    pub source: Arc<dyn MigrationSource>,
    pub logger: Option<Arc<LoggingService>>,
    pub migration_service: Arc<MigrationService>,
    pub drift_service: Arc<DriftService>,
    pub authoring_service: AuthoringService,
    pub doctor_service: DoctorService,
}

impl StrataContext {
    /// Create a context for the project in `project_dir`
    ///
    /// Migrations are read from the configured directory. A run event log
    /// that cannot be opened is reported and skipped.
    pub fn new(project_dir: &Path, entry_point: EntryPoint) -> Result<Self> {
        let config = Config::load(project_dir)?;
        let source: Arc<dyn MigrationSource> =
            Arc::new(DirectorySource::new(&config.migrations_dir));

        let logger = match LoggingService::new(
            &config.log_dir,
            entry_point,
            env!("CARGO_PKG_VERSION"),
        ) {
            Ok(logger) => Some(Arc::new(logger)),
            Err(e) => {
                log::warn!("Run events will not be recorded: {}", e);
                None
            }
        };

        Self::with_source(project_dir, config, source, logger)
    }

    /// Create a context with an explicit migration source and logger
    pub fn with_source(
        project_dir: &Path,
        config: Config,
        source: Arc<dyn MigrationSource>,
        logger: Option<Arc<LoggingService>>,
    ) -> Result<Self> {
        let target = Arc::new(DuckDbTarget::open(&config.database)?);

        let mut migration_service = MigrationService::new(
            Arc::clone(&target),
            Arc::clone(&source),
            MigrationOptions::from_config(&config),
        );
        if let Some(logger) = &logger {
            migration_service = migration_service.with_logger(Arc::clone(logger));
        }
        let migration_service = Arc::new(migration_service);

        let drift_service = Arc::new(DriftService::new(
            Arc::clone(&target),
            Arc::clone(&source),
            config.ledger_table.clone(),
        ));
        let authoring_service = AuthoringService::new(Arc::clone(&source));
        let doctor_service = DoctorService::new(
            Arc::clone(&target),
            Arc::clone(&migration_service),
            Arc::clone(&drift_service),
        );

        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            config,
            target,
            source,
            logger,
            migration_service,
            drift_service,
            authoring_service,
            doctor_service,
        })
    }
}
