//! Drift service - compares the live schema with what migrations produce
//!
//! The expected schema comes from a shadow database: a private in-memory
//! DuckDB with the applied migrations replayed in order.

use std::sync::Arc;

use serde::Serialize;

use crate::adapters::duckdb::{classify_error, introspect};
use crate::adapters::DuckDbTarget;
use crate::domain::{Drift, Migration, MigrationError, Result, SchemaSnapshot};
use crate::ports::MigrationSource;
use crate::services::ledger::Ledger;

/// Schema produced by replaying `migrations` on an empty database
pub fn shadow_snapshot(migrations: &[Migration]) -> Result<SchemaSnapshot> {
    let shadow = DuckDbTarget::open_in_memory()?;
    shadow.with_conn(|conn| {
        for migration in migrations {
            conn.execute_batch(&migration.up_sql)
                .map_err(|e| classify_error(&migration.id, &e.to_string()))?;
        }
        introspect(conn)
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    /// Migrations replayed into the shadow database
    pub applied: Vec<String>,
    pub drift: Vec<Drift>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.drift.is_empty()
    }
}

pub struct DriftService {
    target: Arc<DuckDbTarget>,
    source: Arc<dyn MigrationSource>,
    ledger_table: String,
}

impl DriftService {
    pub fn new(
        target: Arc<DuckDbTarget>,
        source: Arc<dyn MigrationSource>,
        ledger_table: impl Into<String>,
    ) -> Self {
        Self {
            target,
            source,
            ledger_table: ledger_table.into(),
        }
    }

    /// Expected schema after the given migrations
    pub fn shadow_snapshot(&self, migrations: &[Migration]) -> Result<SchemaSnapshot> {
        shadow_snapshot(migrations)
    }

    /// Live schema without the ledger table
    pub fn live_snapshot(&self) -> Result<SchemaSnapshot> {
        Ok(self
            .target
            .snapshot()?
            .without_tables(&[self.ledger_table.as_str()]))
    }

    /// Diff the live schema against the replay of every applied migration
    pub fn check(&self) -> Result<DriftReport> {
        let available = self.source.load()?;
        let applied = self
            .target
            .with_conn(|conn| Ledger::new(conn, &self.ledger_table).applied())?;

        let mut replay = Vec::with_capacity(applied.len());
        for record in &applied {
            let migration = available
                .iter()
                .find(|m| m.id == record.id)
                .ok_or_else(|| MigrationError::MissingMigration(record.id.clone()))?;
            replay.push(migration.clone());
        }

        let expected = shadow_snapshot(&replay)?;
        let live = self.live_snapshot()?;
        let drift = expected.diff(&live);

        if !drift.is_empty() {
            log::warn!(
                "{} schema difference(s) between {} and its migrations",
                drift.len(),
                self.target.describe()
            );
        }

        Ok(DriftReport {
            applied: replay.into_iter().map(|m| m.id).collect(),
            drift,
        })
    }
}
