//! Core domain entities
//!
//! Migrations, ledger records, schema snapshots and typed schema changes.
//! These are pure data structures with validation logic - no I/O.

pub mod change;
pub mod migration;
pub mod record;
pub mod result;
pub mod schema;

pub use change::{ColumnDef, SchemaChange, SchemaOp};
pub use migration::Migration;
pub use record::MigrationRecord;
pub use result::{MigrationError, OperationResult, Result};
pub use schema::{ColumnSchema, Drift, IndexSchema, SchemaSnapshot, TableSchema};
