//! Migration service - applies, rolls back and resolves schema migrations
//!
//! Each migration runs in its own transaction together with its ledger row,
//! strictly in id order. The first failure rolls that migration back and
//! stops the run; migrations after it are not attempted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use duckdb::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::adapters::duckdb::{
    classify_error, in_transaction, index_sql, introspect, split_index_drops,
    validate_sql_syntax,
};
use crate::adapters::{DuckDbTarget, RunLock};
use crate::config::{Config, ConflictPolicy, DEFAULT_LEDGER_TABLE};
use crate::domain::{Drift, Migration, MigrationError, MigrationRecord, Result};
use crate::ports::MigrationSource;
use crate::services::drift::shadow_snapshot;
use crate::services::ledger::Ledger;
use crate::services::logging::{LoggingService, RunEvent};
use crate::services::plan::{build_plan, MigrationPlan};

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub ledger_table: String,
    pub conflict_policy: ConflictPolicy,
    pub lock_timeout: Duration,
    /// Parse SQL with sqlparser before sending it to DuckDB
    pub validate_syntax: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            conflict_policy: ConflictPolicy::Fail,
            lock_timeout: Duration::from_secs(30),
            validate_syntax: true,
        }
    }
}

impl MigrationOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ledger_table: config.ledger_table.clone(),
            conflict_policy: config.conflict_policy,
            lock_timeout: config.lock_timeout,
            validate_syntax: config.validate_syntax,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppliedMigration {
    pub id: String,
    pub execution_ms: i64,
}

/// Result of an `up` run
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    pub run_id: String,
    /// Newly executed migrations, in order
    pub applied: Vec<AppliedMigration>,
    /// Migrations recorded without executing because the live schema
    /// already contained what they create
    pub adopted: Vec<String>,
    /// Migrations that were already in the ledger
    pub skipped: usize,
}

impl ApplyReport {
    fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            applied: Vec::new(),
            adopted: Vec::new(),
            skipped: 0,
        }
    }

    /// Applied plus adopted
    pub fn total(&self) -> usize {
        self.applied.len() + self.adopted.len()
    }
}

/// Result of a `down` run
#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    pub run_id: String,
    /// Reverted migrations, newest first
    pub rolled_back: Vec<AppliedMigration>,
}

enum Outcome {
    Applied(i64),
    Adopted,
}

/// Service for applying migrations from a source to a DuckDB target
pub struct MigrationService {
    target: Arc<DuckDbTarget>,
    source: Arc<dyn MigrationSource>,
    options: MigrationOptions,
    logger: Option<Arc<LoggingService>>,
}

impl MigrationService {
    pub fn new(
        target: Arc<DuckDbTarget>,
        source: Arc<dyn MigrationSource>,
        options: MigrationOptions,
    ) -> Self {
        Self {
            target,
            source,
            options,
            logger: None,
        }
    }

    /// Record run events through `logger`
    pub fn with_logger(mut self, logger: Arc<LoggingService>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn options(&self) -> &MigrationOptions {
        &self.options
    }

    pub fn source(&self) -> &dyn MigrationSource {
        self.source.as_ref()
    }

    /// Event logging must never break a run
    fn emit(&self, event: RunEvent) {
        if let Some(logger) = &self.logger {
            if let Err(e) = logger.log(event.with_target(self.target.describe())) {
                log::warn!("Failed to record run event: {}", e);
            }
        }
    }

    fn lock(&self) -> Result<Option<RunLock>> {
        match self.target.lock_path() {
            Some(path) => Ok(Some(RunLock::acquire(&path, self.options.lock_timeout)?)),
            None => Ok(None),
        }
    }

    /// Source migrations next to the ledger
    pub fn status(&self) -> Result<MigrationPlan> {
        let available = self.source.load()?;
        let applied = self
            .target
            .with_conn(|conn| Ledger::new(conn, &self.options.ledger_table).applied())?;
        Ok(build_plan(&available, &applied))
    }

    /// Apply every pending migration
    pub fn run_pending(&self) -> Result<ApplyReport> {
        self.run(None)
    }

    /// Apply pending migrations up to and including `id`
    pub fn apply_to(&self, id: &str) -> Result<ApplyReport> {
        self.run(Some(id))
    }

    fn run(&self, to: Option<&str>) -> Result<ApplyReport> {
        let _lock = self.lock()?;
        let run_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let available = self.source.load()?;

        self.emit(RunEvent::new("run_started").with_run(&run_id));
        log::info!(
            "Migrating {} from {}",
            self.target.describe(),
            self.source.describe()
        );

        let result = self.target.with_conn(|conn| {
            let ledger = Ledger::new(conn, &self.options.ledger_table);
            ledger.ensure()?;

            let plan = build_plan(&available, &ledger.applied()?);
            plan.check(&available)?;

            let mut pending = plan.pending.clone();
            if let Some(to) = to {
                if !available.iter().any(|m| m.id == to) {
                    return Err(MigrationError::not_found(format!("migration {}", to)));
                }
                pending.retain(|m| m.id.as_str() <= to);
            }

            let mut report = ApplyReport::new(&run_id);
            report.skipped = plan.applied().len();
            self.apply_each(conn, &ledger, &available, &pending, &mut report)?;
            Ok(report)
        });

        let elapsed = started.elapsed().as_millis() as i64;
        match &result {
            Ok(report) => {
                log::info!(
                    "Applied {} migration(s), adopted {}, {} already applied",
                    report.applied.len(),
                    report.adopted.len(),
                    report.skipped
                );
                self.emit(
                    RunEvent::new("run_completed")
                        .with_run(&run_id)
                        .with_duration(elapsed),
                );
            }
            Err(e) => self.emit(
                RunEvent::new("run_failed")
                    .with_run(&run_id)
                    .with_duration(elapsed)
                    .with_error(e),
            ),
        }
        result
    }

    /// Apply `pending` in id order, skipping migrations already in the
    /// ledger. Every migration must come from the source, and the ones not
    /// yet applied must be the oldest pending ones. Returns how many were
    /// applied or adopted.
    pub fn apply(&self, pending: &[Migration]) -> Result<usize> {
        let _lock = self.lock()?;
        let run_id = Uuid::new_v4().to_string();
        let history = self.source.load()?;

        let mut ordered = pending.to_vec();
        ordered.sort();
        ordered.dedup_by(|a, b| a.id == b.id);

        let report = self.target.with_conn(|conn| {
            let ledger = Ledger::new(conn, &self.options.ledger_table);
            ledger.ensure()?;

            let plan = build_plan(&history, &ledger.applied()?);
            plan.check(&history)?;
            check_next_pending(&history, &plan, &ordered)?;

            let mut report = ApplyReport::new(&run_id);
            self.apply_each(conn, &ledger, &history, &ordered, &mut report)?;
            Ok(report)
        })?;
        Ok(report.total())
    }

    fn apply_each(
        &self,
        conn: &Connection,
        ledger: &Ledger<'_>,
        history: &[Migration],
        migrations: &[Migration],
        report: &mut ApplyReport,
    ) -> Result<()> {
        let recorded: HashMap<String, MigrationRecord> = ledger
            .applied()?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        let mut last_applied = recorded.keys().max().cloned();

        for migration in migrations {
            if let Some(record) = recorded.get(&migration.id) {
                if record.checksum != migration.checksum {
                    return Err(MigrationError::ChecksumMismatch {
                        id: migration.id.clone(),
                        recorded: record.checksum.clone(),
                        current: migration.checksum.clone(),
                    });
                }
                log::debug!("{} already applied, skipping", migration.id);
                report.skipped += 1;
                continue;
            }

            if let Some(last) = &last_applied {
                if migration.id < *last {
                    return Err(MigrationError::OutOfOrder {
                        id: migration.id.clone(),
                        last_applied: last.clone(),
                    });
                }
            }

            match self.apply_one(conn, ledger, history, migration) {
                Ok(Outcome::Applied(ms)) => {
                    log::info!("Applied {} ({}ms)", migration.id, ms);
                    self.emit(
                        RunEvent::new("migration_applied")
                            .with_run(&report.run_id)
                            .with_migration(&migration.id)
                            .with_duration(ms),
                    );
                    report.applied.push(AppliedMigration {
                        id: migration.id.clone(),
                        execution_ms: ms,
                    });
                }
                Ok(Outcome::Adopted) => {
                    log::info!("Adopted {}: live schema already matches", migration.id);
                    self.emit(
                        RunEvent::new("migration_adopted")
                            .with_run(&report.run_id)
                            .with_migration(&migration.id),
                    );
                    report.adopted.push(migration.id.clone());
                }
                Err(e) => {
                    log::error!("{}", e);
                    self.emit(
                        RunEvent::new("migration_failed")
                            .with_run(&report.run_id)
                            .with_migration(&migration.id)
                            .with_error(&e),
                    );
                    return Err(e);
                }
            }
            last_applied = Some(migration.id.clone());
        }
        Ok(())
    }

    fn apply_one(
        &self,
        conn: &Connection,
        ledger: &Ledger<'_>,
        history: &[Migration],
        migration: &Migration,
    ) -> Result<Outcome> {
        if self.options.validate_syntax {
            validate_sql_syntax(&migration.id, &migration.up_sql)?;
        }

        let started = Instant::now();
        let result = in_transaction(conn, |conn| {
            conn.execute_batch(&migration.up_sql)
                .map_err(|e| classify_error(&migration.id, &e.to_string()))?;
            let ms = started.elapsed().as_millis() as i64;
            ledger.record(&MigrationRecord::new(&migration.id, &migration.checksum, ms))?;
            Ok(ms)
        });

        match result {
            Ok(ms) => Ok(Outcome::Applied(ms)),
            Err(conflict @ MigrationError::SchemaConflict { .. })
                if self.options.conflict_policy == ConflictPolicy::Adopt =>
            {
                self.adopt(conn, ledger, history, migration, conflict)
            }
            Err(e) => Err(e),
        }
    }

    /// Record `migration` without running it when the live schema already
    /// covers the schema its history produces; otherwise keep the conflict.
    fn adopt(
        &self,
        conn: &Connection,
        ledger: &Ledger<'_>,
        history: &[Migration],
        migration: &Migration,
        conflict: MigrationError,
    ) -> Result<Outcome> {
        let mut upto: Vec<Migration> = history
            .iter()
            .filter(|m| m.id < migration.id)
            .cloned()
            .collect();
        upto.push(migration.clone());

        let expected = shadow_snapshot(&upto)?;
        let live = introspect(conn)?.without_tables(&[ledger.table()]);
        if !live.covers(&expected) {
            let missing: Vec<String> = expected
                .diff(&live)
                .iter()
                .filter(|d| {
                    !matches!(
                        d,
                        Drift::UnexpectedTable { .. }
                            | Drift::UnexpectedColumn { .. }
                            | Drift::UnexpectedIndex { .. }
                            | Drift::ColumnOrder { .. }
                    )
                })
                .map(|d| d.to_string())
                .collect();
            log::warn!(
                "Cannot adopt {}: {}",
                migration.id,
                missing.join("; ")
            );
            return Err(conflict);
        }

        in_transaction(conn, |_| {
            ledger.record(&MigrationRecord::new(&migration.id, &migration.checksum, 0))
        })?;
        Ok(Outcome::Adopted)
    }

    /// Revert the newest `steps` applied migrations with their down SQL,
    /// newest first. Every one of them must be reversible before anything
    /// is executed.
    pub fn rollback(&self, steps: usize) -> Result<RollbackReport> {
        let _lock = self.lock()?;
        let run_id = Uuid::new_v4().to_string();
        let available = self.source.load()?;
        let by_id: HashMap<&str, &Migration> =
            available.iter().map(|m| (m.id.as_str(), m)).collect();

        self.emit(RunEvent::new("rollback_started").with_run(&run_id));

        let result = self.target.with_conn(|conn| {
            let ledger = Ledger::new(conn, &self.options.ledger_table);
            let applied = ledger.applied()?;

            let mut steps_to_run = Vec::new();
            for record in applied.iter().rev().take(steps) {
                let migration = by_id
                    .get(record.id.as_str())
                    .ok_or_else(|| MigrationError::MissingMigration(record.id.clone()))?;
                if migration.checksum != record.checksum {
                    return Err(MigrationError::ChecksumMismatch {
                        id: record.id.clone(),
                        recorded: record.checksum.clone(),
                        current: migration.checksum.clone(),
                    });
                }
                let down = migration
                    .down_sql
                    .as_deref()
                    .ok_or_else(|| MigrationError::NoRollback(record.id.clone()))?;
                if self.options.validate_syntax {
                    validate_sql_syntax(&migration.id, down)?;
                }
                steps_to_run.push((migration.id.as_str(), down));
            }

            let mut report = RollbackReport {
                run_id: run_id.clone(),
                rolled_back: Vec::new(),
            };
            for (id, down) in steps_to_run {
                let started = Instant::now();
                if let Err(e) = self.revert_one(conn, &ledger, id, down) {
                    log::error!("{}", e);
                    self.emit(
                        RunEvent::new("rollback_failed")
                            .with_run(&run_id)
                            .with_migration(id)
                            .with_error(&e),
                    );
                    return Err(e);
                }

                let ms = started.elapsed().as_millis() as i64;
                log::info!("Rolled back {} ({}ms)", id, ms);
                self.emit(
                    RunEvent::new("migration_rolled_back")
                        .with_run(&run_id)
                        .with_migration(id)
                        .with_duration(ms),
                );
                report.rolled_back.push(AppliedMigration {
                    id: id.to_string(),
                    execution_ms: ms,
                });
            }
            Ok(report)
        });

        if let Err(e) = &result {
            self.emit(RunEvent::new("run_failed").with_run(&run_id).with_error(e));
        }
        result
    }

    /// Run one migration's down SQL and drop its ledger row.
    ///
    /// Leading `DROP INDEX` statements commit in a transaction of their own
    /// before the rest, so this step is not atomic. If the rest fails the
    /// dropped indexes are recreated from their stored definitions.
    fn revert_one(
        &self,
        conn: &Connection,
        ledger: &Ledger<'_>,
        id: &str,
        down: &str,
    ) -> Result<()> {
        let Some(split) = split_index_drops(down) else {
            return in_transaction(conn, |conn| {
                conn.execute_batch(down)
                    .map_err(|e| classify_error(id, &e.to_string()))?;
                ledger.remove(id)?;
                Ok(())
            });
        };

        let mut definitions = Vec::new();
        for index in &split.indexes {
            if let Some(sql) = index_sql(conn, index)? {
                definitions.push(sql);
            }
        }

        in_transaction(conn, |conn| {
            for sql in &split.drops {
                conn.execute_batch(sql)
                    .map_err(|e| classify_error(id, &e.to_string()))?;
            }
            Ok(())
        })?;
        log::debug!("{}: dropped {} index(es)", id, split.indexes.len());

        let result = in_transaction(conn, |conn| {
            for sql in &split.rest {
                conn.execute_batch(sql)
                    .map_err(|e| classify_error(id, &e.to_string()))?;
            }
            ledger.remove(id)?;
            Ok(())
        });

        if result.is_err() {
            let restored = in_transaction(conn, |conn| {
                for sql in &definitions {
                    conn.execute_batch(sql)?;
                }
                Ok(())
            });
            if let Err(e) = restored {
                log::warn!("Failed to restore indexes dropped by {}: {}", id, e);
            }
        }
        result
    }

    /// Mark pending migrations up to and including `id` as applied without
    /// executing them, to baseline a database whose schema already exists.
    pub fn resolve(&self, id: &str) -> Result<Vec<MigrationRecord>> {
        let _lock = self.lock()?;
        let run_id = Uuid::new_v4().to_string();
        let available = self.source.load()?;

        if !available.iter().any(|m| m.id == id) {
            return Err(MigrationError::not_found(format!("migration {}", id)));
        }

        let records = self.target.with_conn(|conn| {
            let ledger = Ledger::new(conn, &self.options.ledger_table);
            ledger.ensure()?;

            let plan = build_plan(&available, &ledger.applied()?);
            plan.check(&available)?;
            if !plan.pending.iter().any(|m| m.id == id) {
                return Err(MigrationError::validation(format!(
                    "Migration {} is already applied",
                    id
                )));
            }

            let records: Vec<MigrationRecord> = plan
                .pending
                .iter()
                .filter(|m| m.id.as_str() <= id)
                .map(|m| MigrationRecord::new(&m.id, &m.checksum, 0))
                .collect();

            in_transaction(conn, |_| {
                for record in &records {
                    ledger.record(record)?;
                }
                Ok(())
            })?;
            Ok(records)
        })?;

        for record in &records {
            log::info!("Resolved {} without executing it", record.id);
            self.emit(
                RunEvent::new("migration_resolved")
                    .with_run(&run_id)
                    .with_migration(&record.id),
            );
        }
        Ok(records)
    }
}

/// The unapplied part of `migrations` must match the source and be exactly
/// the first pending migrations of `plan`, or the ledger would get a gap.
fn check_next_pending(
    history: &[Migration],
    plan: &MigrationPlan,
    migrations: &[Migration],
) -> Result<()> {
    let known: HashMap<&str, &Migration> = history.iter().map(|m| (m.id.as_str(), m)).collect();
    for migration in migrations {
        match known.get(migration.id.as_str()) {
            None => {
                return Err(MigrationError::not_found(format!(
                    "migration {}",
                    migration.id
                )));
            }
            Some(source) if source.checksum != migration.checksum => {
                return Err(MigrationError::validation(format!(
                    "Migration {} does not match its source: checksum {}, expected {}",
                    migration.id, migration.checksum, source.checksum
                )));
            }
            Some(_) => {}
        }
    }

    let applied: HashSet<&str> = plan.applied().iter().map(|r| r.id.as_str()).collect();
    let unapplied = migrations
        .iter()
        .filter(|m| !applied.contains(m.id.as_str()));
    for (migration, next) in unapplied.zip(&plan.pending) {
        if migration.id != next.id {
            return Err(MigrationError::OutOfOrder {
                id: next.id.clone(),
                last_applied: migration.id.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::EmbeddedSource;
    use crate::domain::SchemaSnapshot;

    struct StaticSource(Vec<Migration>);

    impl MigrationSource for StaticSource {
        fn load(&self) -> Result<Vec<Migration>> {
            Ok(self.0.clone())
        }

        fn describe(&self) -> String {
            "static".to_string()
        }
    }

    fn service(source: impl MigrationSource + 'static) -> (Arc<DuckDbTarget>, MigrationService) {
        let target = Arc::new(DuckDbTarget::open_in_memory().unwrap());
        let service = MigrationService::new(
            Arc::clone(&target),
            Arc::new(source),
            MigrationOptions::default(),
        );
        (target, service)
    }

    fn migration(id: &str, up: &str, down: Option<&str>) -> Migration {
        Migration::new(id, up, down.map(str::to_string)).unwrap()
    }

    fn user_tables(target: &DuckDbTarget) -> SchemaSnapshot {
        target
            .snapshot()
            .unwrap()
            .without_tables(&[DEFAULT_LEDGER_TABLE])
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let (target, service) = service(EmbeddedSource::registrations());

        let report = service.run_pending().unwrap();
        assert_eq!(report.applied.len(), 2);
        assert_eq!(report.skipped, 0);
        assert!(target
            .snapshot()
            .unwrap()
            .column("registrations", "courseConfigSetName")
            .is_some());

        // Running again should apply nothing
        let again = service.run_pending().unwrap();
        assert_eq!(again.total(), 0);
        assert_eq!(again.skipped, 2);
    }

    #[test]
    fn test_apply_to_stops_at_target() {
        let (target, service) = service(EmbeddedSource::registrations());

        let report = service
            .apply_to("20240101000000_create_registrations")
            .unwrap();
        assert_eq!(report.applied.len(), 1);
        assert!(target.table_exists("registrations").unwrap());
        assert!(user_tables(&target)
            .column("registrations", "courseConfigSetName")
            .is_none());

        assert_eq!(service.status().unwrap().pending_ids().len(), 1);
        assert!(matches!(
            service.apply_to("20990101000000_unknown"),
            Err(MigrationError::NotFound(_))
        ));
    }

    #[test]
    fn test_apply_skips_recorded_migrations() {
        let (_target, service) = service(EmbeddedSource::registrations());
        let all = EmbeddedSource::registrations().load().unwrap();

        assert_eq!(service.apply(&all[..1]).unwrap(), 1);
        assert_eq!(service.apply(&all).unwrap(), 1);
        assert_eq!(service.apply(&all).unwrap(), 0);
    }

    #[test]
    fn test_apply_refuses_to_skip_pending() {
        let source = StaticSource(vec![
            migration("20240101000000_a", "CREATE TABLE a (id INTEGER);", None),
            migration("20240102000000_b", "CREATE TABLE b (id INTEGER);", None),
        ]);
        let all = source.load().unwrap();
        let (target, service) = service(source);

        let err = service.apply(&all[1..]).unwrap_err();
        match err {
            MigrationError::OutOfOrder { id, last_applied } => {
                assert_eq!(id, "20240101000000_a");
                assert_eq!(last_applied, "20240102000000_b");
            }
            other => panic!("expected out of order, got {:?}", other),
        }
        assert!(!target.table_exists("b").unwrap());
        assert!(service.status().unwrap().applied().is_empty());

        // In order is fine, and the full run still works afterwards
        assert_eq!(service.apply(&all[..1]).unwrap(), 1);
        assert_eq!(service.run_pending().unwrap().applied.len(), 1);
        assert!(service.status().unwrap().is_consistent());
    }

    #[test]
    fn test_apply_rejects_unknown_migration() {
        let (target, service) = service(EmbeddedSource::registrations());
        let unknown = migration("20990101000000_x", "CREATE TABLE x (id INTEGER);", None);

        assert!(matches!(
            service.apply(&[unknown]),
            Err(MigrationError::NotFound(_))
        ));
        assert!(!target.table_exists("x").unwrap());
        let plan = service.status().unwrap();
        assert!(plan.applied().is_empty());
        assert!(plan.is_consistent());

        // Same id as the source but different SQL
        let all = EmbeddedSource::registrations().load().unwrap();
        let edited = migration(&all[0].id, "CREATE TABLE registrations (id TEXT);", None);
        assert!(matches!(
            service.apply(&[edited]),
            Err(MigrationError::Validation(_))
        ));
        assert!(!target.table_exists("registrations").unwrap());
    }

    #[test]
    fn test_failure_rolls_back_and_halts() {
        let source = StaticSource(vec![
            migration("20240101000000_first", "CREATE TABLE a (id INTEGER);", None),
            migration(
                "20240102000000_broken",
                "CREATE TABLE b (id INTEGER);\nINSERT INTO missing_table VALUES (1);",
                None,
            ),
            migration("20240103000000_third", "CREATE TABLE c (id INTEGER);", None),
        ]);
        let (target, service) = service(source);

        let err = service.run_pending().unwrap_err();
        assert_eq!(err.migration_id(), Some("20240102000000_broken"));
        assert!(target.table_exists("a").unwrap());
        assert!(!target.table_exists("b").unwrap());
        assert!(!target.table_exists("c").unwrap());

        let plan = service.status().unwrap();
        assert_eq!(
            plan.pending_ids(),
            vec!["20240102000000_broken", "20240103000000_third"]
        );
    }

    #[test]
    fn test_syntax_error_is_caught_before_execution() {
        let source = StaticSource(vec![migration(
            "20240101000000_typo",
            "CREATE TABLEE a (id INTEGER);",
            None,
        )]);
        let (_target, service) = service(source);

        assert!(matches!(
            service.run_pending(),
            Err(MigrationError::Syntax { .. })
        ));
    }

    #[test]
    fn test_conflict_fails_by_default() {
        let (target, service) = service(EmbeddedSource::registrations());
        target
            .execute_batch(include_str!(
                "../migrations/20240101000000_create_registrations/migration.sql"
            ))
            .unwrap();

        assert!(matches!(
            service.run_pending(),
            Err(MigrationError::SchemaConflict { .. })
        ));
        assert!(service.status().unwrap().applied().is_empty());
    }

    #[test]
    fn test_adopt_records_existing_schema() {
        let target = Arc::new(DuckDbTarget::open_in_memory().unwrap());
        target
            .execute_batch(include_str!(
                "../migrations/20240101000000_create_registrations/migration.sql"
            ))
            .unwrap();

        let service = MigrationService::new(
            Arc::clone(&target),
            Arc::new(EmbeddedSource::registrations()),
            MigrationOptions {
                conflict_policy: ConflictPolicy::Adopt,
                ..MigrationOptions::default()
            },
        );

        let report = service.run_pending().unwrap();
        assert_eq!(report.adopted, vec!["20240101000000_create_registrations"]);
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.applied[0].id, "20240315120000_add_course_config_set_name");
    }

    #[test]
    fn test_rollback_restores_previous_schema() {
        let (target, service) = service(EmbeddedSource::registrations());
        service
            .apply_to("20240101000000_create_registrations")
            .unwrap();
        let before = user_tables(&target);

        service.run_pending().unwrap();
        let report = service.rollback(1).unwrap();
        assert_eq!(
            report.rolled_back[0].id,
            "20240315120000_add_course_config_set_name"
        );
        assert_eq!(user_tables(&target), before);
        assert_eq!(service.status().unwrap().pending_ids().len(), 1);
    }

    #[test]
    fn test_rollback_drops_indexed_column() {
        let source = StaticSource(vec![
            migration("20240101000000_a", "CREATE TABLE a (id INTEGER);", Some("DROP TABLE a;")),
            migration(
                "20240102000000_a_tag",
                "ALTER TABLE a ADD COLUMN tag TEXT;\nCREATE INDEX a_tag_idx ON a(tag);",
                Some("DROP INDEX a_tag_idx;\nALTER TABLE a DROP COLUMN tag;"),
            ),
        ]);
        let (target, service) = service(source);
        service.run_pending().unwrap();
        target.execute_batch("INSERT INTO a VALUES (1, 'x');").unwrap();

        let report = service.rollback(1).unwrap();
        assert_eq!(report.rolled_back[0].id, "20240102000000_a_tag");

        let snapshot = user_tables(&target);
        assert!(snapshot.column("a", "tag").is_none());
        assert!(snapshot.index("a_tag_idx").is_none());
        assert_eq!(service.status().unwrap().pending_ids(), vec!["20240102000000_a_tag"]);
    }

    #[test]
    fn test_failed_rollback_restores_dropped_index() {
        let source = StaticSource(vec![migration(
            "20240101000000_a",
            "CREATE TABLE a (id INTEGER, tag TEXT);\nCREATE INDEX a_tag_idx ON a(tag);",
            Some("DROP INDEX a_tag_idx;\nALTER TABLE a DROP COLUMN missing;"),
        )]);
        let (target, service) = service(source);
        service.run_pending().unwrap();
        let before = user_tables(&target);

        let err = service.rollback(1).unwrap_err();
        assert_eq!(err.migration_id(), Some("20240101000000_a"));
        assert_eq!(user_tables(&target), before);
        assert_eq!(service.status().unwrap().applied().len(), 1);
    }

    #[test]
    fn test_rollback_requires_down_sql() {
        let source = StaticSource(vec![migration(
            "20240101000000_one_way",
            "CREATE TABLE a (id INTEGER);",
            None,
        )]);
        let (target, service) = service(source);
        service.run_pending().unwrap();

        assert!(matches!(
            service.rollback(1),
            Err(MigrationError::NoRollback(_))
        ));
        assert!(target.table_exists("a").unwrap());
    }

    #[test]
    fn test_resolve_records_without_executing() {
        let (target, service) = service(EmbeddedSource::registrations());

        let records = service
            .resolve("20240315120000_add_course_config_set_name")
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.execution_ms == 0));
        assert!(!target.table_exists("registrations").unwrap());
        assert!(service.status().unwrap().pending.is_empty());

        assert!(matches!(
            service.resolve("20240101000000_create_registrations"),
            Err(MigrationError::Validation(_))
        ));
    }
}
