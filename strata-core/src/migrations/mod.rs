//! Registrations database migrations - embedded SQL files
//!
//! Migrations are compiled into the binary at build time using include_str!.
//! Each migration lives in its own `<timestamp>_<name>/` directory holding
//! `migration.sql` and `down.sql`, the same layout `DirectorySource` reads.

use crate::adapters::embedded::EmbeddedMigration;

/// All registrations migrations, embedded at compile time, in id order.
///
/// IMPORTANT: When adding a new migration:
/// 1. Create the directory: YYYYMMDDHHMMSS_description/
/// 2. Add migration.sql (and down.sql when reversible)
/// 3. Add an entry here in order
pub const MIGRATIONS: &[EmbeddedMigration] = &[
    EmbeddedMigration {
        id: "20240101000000_create_registrations",
        up: include_str!("20240101000000_create_registrations/migration.sql"),
        down: Some(include_str!("20240101000000_create_registrations/down.sql")),
    },
    EmbeddedMigration {
        id: "20240315120000_add_course_config_set_name",
        up: include_str!("20240315120000_add_course_config_set_name/migration.sql"),
        down: Some(include_str!("20240315120000_add_course_config_set_name/down.sql")),
    },
];
