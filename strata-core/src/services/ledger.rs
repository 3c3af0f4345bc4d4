//! Migration ledger - which migrations have been applied to a database
//!
//! The ledger lives in the target database itself so that a migration and
//! its ledger row commit in the same transaction.

use duckdb::{params, Connection};

use crate::adapters::duckdb::table_exists;
use crate::domain::change::quote_ident;
use crate::domain::record::parse_timestamp;
use crate::domain::{MigrationRecord, Result};

pub struct Ledger<'a> {
    conn: &'a Connection,
    table: &'a str,
}

impl<'a> Ledger<'a> {
    pub fn new(conn: &'a Connection, table: &'a str) -> Self {
        Self { conn, table }
    }

    pub fn table(&self) -> &str {
        self.table
    }

    pub fn exists(&self) -> Result<bool> {
        table_exists(self.conn, self.table)
    }

    /// Create the ledger table if needed
    pub fn ensure(&self) -> Result<()> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id VARCHAR PRIMARY KEY,
                checksum VARCHAR NOT NULL,
                applied_at VARCHAR NOT NULL,
                execution_ms BIGINT NOT NULL
            )",
            quote_ident(self.table)
        ))?;
        Ok(())
    }

    /// Applied migrations ordered by id; empty when the ledger does not exist yet
    pub fn applied(&self) -> Result<Vec<MigrationRecord>> {
        if !self.exists()? {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, checksum, applied_at, execution_ms FROM {} ORDER BY id",
            quote_ident(self.table)
        ))?;
        let rows = stmt.query_map([], |row| {
            let applied_at: String = row.get(2)?;
            Ok(MigrationRecord {
                id: row.get(0)?,
                checksum: row.get(1)?,
                applied_at: parse_timestamp(&applied_at),
                execution_ms: row.get(3)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn record(&self, record: &MigrationRecord) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO {} (id, checksum, applied_at, execution_ms) VALUES (?, ?, ?, ?)",
                quote_ident(self.table)
            ),
            params![
                &record.id,
                &record.checksum,
                record.applied_at.to_rfc3339(),
                record.execution_ms,
            ],
        )?;
        Ok(())
    }

    /// Remove a migration from the ledger, returning whether it was there
    pub fn remove(&self, id: &str) -> Result<bool> {
        let deleted = self.conn.execute(
            &format!("DELETE FROM {} WHERE id = ?", quote_ident(self.table)),
            [id],
        )?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_ledger_reads_empty() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = Ledger::new(&conn, "_strata_migrations");
        assert!(!ledger.exists().unwrap());
        assert!(ledger.applied().unwrap().is_empty());
    }

    #[test]
    fn test_record_and_remove() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = Ledger::new(&conn, "_strata_migrations");
        ledger.ensure().unwrap();
        ledger.ensure().unwrap();

        let second = MigrationRecord::new("20240315120000_add_course_config_set_name", "bbb", 7);
        let first = MigrationRecord::new("20240101000000_create_registrations", "aaa", 3);
        ledger.record(&second).unwrap();
        ledger.record(&first).unwrap();

        let applied = ledger.applied().unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].id, first.id);
        assert_eq!(applied[1].checksum, "bbb");
        assert_eq!(applied[1].execution_ms, 7);
        assert_eq!(applied[1].applied_at.timestamp(), second.applied_at.timestamp());

        assert!(ledger.remove(&second.id).unwrap());
        assert!(!ledger.remove(&second.id).unwrap());
        assert_eq!(ledger.applied().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_record_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = Ledger::new(&conn, "history");
        ledger.ensure().unwrap();

        let record = MigrationRecord::new("20240101000000_create_registrations", "aaa", 0);
        ledger.record(&record).unwrap();
        assert!(ledger.record(&record).is_err());
    }
}
