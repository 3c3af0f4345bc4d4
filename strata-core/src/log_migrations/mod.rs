//! Run event log migrations - embedded SQL files
//!
//! The event log database is versioned by the same engine it records.

use crate::adapters::embedded::EmbeddedMigration;

/// All event log migrations, embedded at compile time, in id order.
pub const LOG_MIGRATIONS: &[EmbeddedMigration] = &[EmbeddedMigration {
    id: "20240101000000_create_run_events",
    up: include_str!("20240101000000_create_run_events/migration.sql"),
    down: None,
}];
