//! Embedded migration source - SQL compiled into the binary

use crate::domain::migration::sort_and_check;
use crate::domain::{Migration, Result};
use crate::ports::MigrationSource;

/// A migration embedded with `include_str!`
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedMigration {
    pub id: &'static str,
    pub up: &'static str,
    pub down: Option<&'static str>,
}

/// Serves a static table of migrations
pub struct EmbeddedSource {
    name: &'static str,
    migrations: &'static [EmbeddedMigration],
}

impl EmbeddedSource {
    pub fn new(name: &'static str, migrations: &'static [EmbeddedMigration]) -> Self {
        Self { name, migrations }
    }

    /// The registrations schema history shipped with this crate
    pub fn registrations() -> Self {
        Self::new("registrations", crate::migrations::MIGRATIONS)
    }
}

impl MigrationSource for EmbeddedSource {
    fn load(&self) -> Result<Vec<Migration>> {
        let migrations = self
            .migrations
            .iter()
            .map(|m| Migration::new(m.id, m.up, m.down.map(str::to_string)))
            .collect::<Result<Vec<_>>>()?;
        sort_and_check(migrations)
    }

    fn describe(&self) -> String {
        format!("embedded:{}", self.name)
    }
}
