//! Migration source port - where migrations come from

use crate::domain::{Migration, Result};

/// A provider of ordered migrations
///
/// Implementations (adapters) read migrations from a directory on disk or
/// from SQL compiled into the binary. `load` must return migrations sorted
/// by id with no duplicates.
pub trait MigrationSource: Send + Sync {
    /// Load every available migration, sorted by id
    fn load(&self) -> Result<Vec<Migration>>;

    /// Human-readable description for status output (e.g. a path)
    fn describe(&self) -> String;

    /// Directory new migrations are written to, if the source supports it
    fn writable_dir(&self) -> Option<&std::path::Path> {
        None
    }
}
