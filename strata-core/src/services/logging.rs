//! Logging service - structured run events in DuckDB
//!
//! Every migration run writes its events (run started, migration applied,
//! adopted, rolled back, failed) to `events.duckdb` in the log directory.
//! Only identifiers, timings and error messages are stored; never row data.
//!
//! The events database is versioned by the migration engine itself.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::adapters::{DuckDbTarget, EmbeddedSource};
use crate::domain::{MigrationError, Result};
use crate::log_migrations::LOG_MIGRATIONS;
use crate::services::migration::{MigrationOptions, MigrationService};

/// File name of the events database inside the log directory
pub const EVENTS_DB: &str = "events.duckdb";

/// Counter for generating unique IDs within the same millisecond
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique ID based on timestamp + counter
fn generate_id() -> u64 {
    let timestamp = now_ms() as u64;

    // Use lower 48 bits for timestamp (good for ~8900 years)
    // Use upper 16 bits for counter (65536 unique IDs per millisecond)
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed) & 0xFFFF;
    (timestamp << 16) | counter
}

/// Get current unix timestamp in milliseconds
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Detect the current platform
fn detect_platform() -> &'static str {
    if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "linux") {
        "linux"
    } else {
        "unknown"
    }
}

/// Who is driving the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryPoint {
    Cli,
    Library,
}

impl EntryPoint {
    fn as_str(&self) -> &'static str {
        match self {
            EntryPoint::Cli => "cli",
            EntryPoint::Library => "library",
        }
    }
}

/// A run event to be recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl RunEvent {
    /// Create a new run event with just an event name
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            run_id: None,
            target: None,
            migration_id: None,
            duration_ms: None,
            error_kind: None,
            error_message: None,
        }
    }

    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Set the database the run targets
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_migration(mut self, id: impl Into<String>) -> Self {
        self.migration_id = Some(id.into());
        self
    }

    pub fn with_duration(mut self, ms: i64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    /// Set error kind and message; the migration id is taken from the error
    /// when not already set
    pub fn with_error(mut self, err: &MigrationError) -> Self {
        self.error_kind = Some(err.kind().to_string());
        self.error_message = Some(err.to_string());
        if self.migration_id.is_none() {
            self.migration_id = err.migration_id().map(str::to_string);
        }
        self
    }
}

/// A run event as stored in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEventEntry {
    pub id: u64,
    pub timestamp: i64,
    pub entry_point: String,
    pub app_version: String,
    pub platform: String,
    pub event: String,
    pub run_id: Option<String>,
    pub target: Option<String>,
    pub migration_id: Option<String>,
    pub duration_ms: Option<i64>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogStats {
    pub total_entries: u64,
    pub error_count: u64,
    pub run_count: u64,
    pub database_path: PathBuf,
    pub database_size_bytes: u64,
}

const ENTRY_COLUMNS: &str = "id, timestamp, entry_point, app_version, platform, event, \
     run_id, target, migration_id, duration_ms, error_kind, error_message";

/// Service for structured run event logging
pub struct LoggingService {
    target: Arc<DuckDbTarget>,
    db_path: PathBuf,
    entry_point: EntryPoint,
    app_version: String,
    platform: &'static str,
}

impl LoggingService {
    /// Create a new logging service
    ///
    /// Opens or creates events.duckdb in `log_dir` and runs any pending
    /// event log migrations.
    pub fn new(
        log_dir: &Path,
        entry_point: EntryPoint,
        app_version: impl Into<String>,
    ) -> Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let db_path = log_dir.join(EVENTS_DB);
        let target = Arc::new(DuckDbTarget::open(&db_path)?);

        MigrationService::new(
            Arc::clone(&target),
            Arc::new(EmbeddedSource::new("events", LOG_MIGRATIONS)),
            MigrationOptions::default(),
        )
        .run_pending()?;

        Ok(Self {
            target,
            db_path,
            entry_point,
            app_version: app_version.into(),
            platform: detect_platform(),
        })
    }

    /// Record an event
    ///
    /// The entry_point, app_version, and platform are added from the service
    /// configuration.
    pub fn log(&self, event: RunEvent) -> Result<()> {
        self.target.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO sys_run_events ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    ENTRY_COLUMNS
                ),
                duckdb::params![
                    generate_id(),
                    now_ms(),
                    self.entry_point.as_str(),
                    &self.app_version,
                    self.platform,
                    &event.event,
                    &event.run_id,
                    &event.target,
                    &event.migration_id,
                    &event.duration_ms,
                    &event.error_kind,
                    &event.error_message,
                ],
            )?;
            Ok(())
        })
    }

    /// Log a simple event with just a name
    pub fn log_event(&self, event: &str) -> Result<()> {
        self.log(RunEvent::new(event))
    }

    /// Log a failure
    pub fn log_error(&self, event: &str, err: &MigrationError) -> Result<()> {
        self.log(RunEvent::new(event).with_error(err))
    }

    fn query(&self, filter: &str, params: &[&dyn duckdb::ToSql]) -> Result<Vec<RunEventEntry>> {
        self.target.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM sys_run_events {} ORDER BY timestamp DESC, id DESC LIMIT ?",
                ENTRY_COLUMNS, filter
            ))?;
            let rows = stmt.query_map(params, |row| {
                Ok(RunEventEntry {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    entry_point: row.get(2)?,
                    app_version: row.get(3)?,
                    platform: row.get(4)?,
                    event: row.get(5)?,
                    run_id: row.get(6)?,
                    target: row.get(7)?,
                    migration_id: row.get(8)?,
                    duration_ms: row.get(9)?,
                    error_kind: row.get(10)?,
                    error_message: row.get(11)?,
                })
            })?;

            let mut entries = Vec::new();
            for row in rows {
                entries.push(row?);
            }
            Ok(entries)
        })
    }

    /// Most recent entries, newest first
    pub fn get_recent(&self, limit: usize) -> Result<Vec<RunEventEntry>> {
        self.query("", &[&(limit as i64)])
    }

    /// Most recent failures, newest first
    pub fn get_errors(&self, limit: usize) -> Result<Vec<RunEventEntry>> {
        self.query("WHERE error_kind IS NOT NULL", &[&(limit as i64)])
    }

    /// All events of one run, newest first
    pub fn get_run(&self, run_id: &str, limit: usize) -> Result<Vec<RunEventEntry>> {
        self.query("WHERE run_id = ?", &[&run_id, &(limit as i64)])
    }

    /// Get the total number of entries
    pub fn count(&self) -> Result<u64> {
        self.target.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM sys_run_events", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    pub fn stats(&self) -> Result<LogStats> {
        let (total, errors, runs) = self.target.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*), COUNT(error_kind), COUNT(DISTINCT run_id) FROM sys_run_events",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?)),
            )?)
        })?;

        Ok(LogStats {
            total_entries: total as u64,
            error_count: errors as u64,
            run_count: runs as u64,
            database_path: self.db_path.clone(),
            database_size_bytes: std::fs::metadata(&self.db_path)
                .map(|m| m.len())
                .unwrap_or(0),
        })
    }

    /// Delete entries older than the specified timestamp (unix ms)
    pub fn delete_before(&self, timestamp_ms: i64) -> Result<u64> {
        self.target.with_conn(|conn| {
            let deleted =
                conn.execute("DELETE FROM sys_run_events WHERE timestamp < ?", [timestamp_ms])?;
            Ok(deleted as u64)
        })
    }

    /// Get the path to the events database
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_logging_service_creation() {
        let dir = tempdir().unwrap();
        let service = LoggingService::new(dir.path(), EntryPoint::Cli, "1.0.0").unwrap();

        assert!(service.db_path().exists());
        assert_eq!(service.count().unwrap(), 0);
    }

    #[test]
    fn test_reopen_does_not_rerun_migrations() {
        let dir = tempdir().unwrap();
        {
            let service = LoggingService::new(dir.path(), EntryPoint::Cli, "1.0.0").unwrap();
            service.log_event("run_started").unwrap();
        }
        let service = LoggingService::new(dir.path(), EntryPoint::Cli, "1.0.0").unwrap();
        assert_eq!(service.count().unwrap(), 1);
    }

    #[test]
    fn test_log_with_context() {
        let dir = tempdir().unwrap();
        let service = LoggingService::new(dir.path(), EntryPoint::Library, "2.0.0").unwrap();

        service
            .log(
                RunEvent::new("migration_applied")
                    .with_run("run-1")
                    .with_target("app.duckdb")
                    .with_migration("20240315120000_add_course_config_set_name")
                    .with_duration(12),
            )
            .unwrap();

        let entries = service.get_recent(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event, "migration_applied");
        assert_eq!(entries[0].entry_point, "library");
        assert_eq!(entries[0].run_id.as_deref(), Some("run-1"));
        assert_eq!(
            entries[0].migration_id.as_deref(),
            Some("20240315120000_add_course_config_set_name")
        );
        assert_eq!(entries[0].duration_ms, Some(12));
        assert!(entries[0].error_kind.is_none());
    }

    #[test]
    fn test_log_error() {
        let dir = tempdir().unwrap();
        let service = LoggingService::new(dir.path(), EntryPoint::Cli, "1.0.0").unwrap();

        let err = MigrationError::SchemaConflict {
            migration: "20240315120000_add_course_config_set_name".to_string(),
            message: "Column with name courseConfigSetName already exists!".to_string(),
        };
        service.log_error("migration_failed", &err).unwrap();
        service.log_event("run_started").unwrap();

        let errors = service.get_errors(10).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_kind.as_deref(), Some("schema_conflict"));
        assert_eq!(
            errors[0].migration_id.as_deref(),
            Some("20240315120000_add_course_config_set_name")
        );
    }

    #[test]
    fn test_get_run_and_stats() {
        let dir = tempdir().unwrap();
        let service = LoggingService::new(dir.path(), EntryPoint::Cli, "1.0.0").unwrap();

        service.log(RunEvent::new("run_started").with_run("a")).unwrap();
        service.log(RunEvent::new("run_completed").with_run("a")).unwrap();
        service.log(RunEvent::new("run_started").with_run("b")).unwrap();

        assert_eq!(service.get_run("a", 10).unwrap().len(), 2);

        let stats = service.stats().unwrap();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.error_count, 0);
        assert_eq!(stats.run_count, 2);
    }

    #[test]
    fn test_count_and_delete() {
        let dir = tempdir().unwrap();
        let service = LoggingService::new(dir.path(), EntryPoint::Cli, "1.0.0").unwrap();

        service.log_event("event1").unwrap();
        service.log_event("event2").unwrap();
        service.log_event("event3").unwrap();

        assert_eq!(service.count().unwrap(), 3);

        // Delete all entries (using future timestamp)
        let deleted = service.delete_before(now_ms() + 1000).unwrap();
        assert_eq!(deleted, 3);
        assert_eq!(service.count().unwrap(), 0);
    }
}
