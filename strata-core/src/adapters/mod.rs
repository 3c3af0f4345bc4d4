//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - Migration directories on disk for MigrationSource
//! - SQL compiled into the binary for MigrationSource
//! - DuckDB as the migration target
//! - Advisory file locks for run serialisation

pub mod directory;
pub mod duckdb;
pub mod embedded;
pub mod lock;

pub use directory::DirectorySource;
pub use self::duckdb::DuckDbTarget;
pub use embedded::{EmbeddedMigration, EmbeddedSource};
pub use lock::RunLock;
