//! DuckDB migration target

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use duckdb::Connection;
use sqlparser::ast::{ObjectType, Statement};
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;

use crate::adapters::lock::lock_path_for;
use crate::domain::{
    ColumnSchema, IndexSchema, MigrationError, Result, SchemaSnapshot, TableSchema,
};

/// Validate SQL syntax before execution to catch malformed migrations early.
pub fn validate_sql_syntax(migration_id: &str, sql: &str) -> Result<()> {
    let dialect = DuckDbDialect {};
    Parser::parse_sql(&dialect, sql).map_err(|e| {
        // Clean up the error message - remove redundant prefix
        let msg = e.to_string();
        MigrationError::Syntax {
            migration: migration_id.to_string(),
            message: msg.trim_start_matches("sql parser error: ").to_string(),
        }
    })?;
    Ok(())
}

/// Map a failed statement to the error kind callers act on.
///
/// DuckDB reports catalog collisions as "... already exists" and dependency
/// failures as "Dependency Error"; both mean the live schema disagrees with
/// what the migration expects.
pub fn classify_error(migration_id: &str, message: &str) -> MigrationError {
    let lower = message.to_lowercase();
    let migration = migration_id.to_string();
    let message = message.to_string();

    if lower.contains("already exists") || lower.contains("dependency error") {
        MigrationError::SchemaConflict { migration, message }
    } else if lower.contains("constraint error") {
        MigrationError::ConstraintViolation { migration, message }
    } else {
        MigrationError::Statement { migration, message }
    }
}

/// Run `f` inside BEGIN/COMMIT, rolling back if it fails.
pub fn in_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    conn.execute_batch("BEGIN TRANSACTION")?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                log::warn!("Rollback failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}

/// A batch that opens with `DROP INDEX` statements and continues with
/// statements that may touch the indexed columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDrops {
    /// Unquoted names of the dropped indexes
    pub indexes: Vec<String>,
    pub drops: Vec<String>,
    pub rest: Vec<String>,
}

/// Split the leading index drops off `sql`.
///
/// DuckDB keeps an index dropped earlier in the same transaction as a
/// dependent of its columns, so `DROP INDEX` followed by `DROP COLUMN` on an
/// indexed column only succeeds when the drops are committed first. `None`
/// when the batch does not parse or has nothing on one side of the split.
pub fn split_index_drops(sql: &str) -> Option<IndexDrops> {
    let statements = Parser::parse_sql(&DuckDbDialect {}, sql).ok()?;

    let mut split = IndexDrops {
        indexes: Vec::new(),
        drops: Vec::new(),
        rest: Vec::new(),
    };
    for statement in statements {
        match &statement {
            Statement::Drop {
                object_type: ObjectType::Index,
                names,
                ..
            } if split.rest.is_empty() => {
                for name in names {
                    let last = name.0.last()?.as_ident()?;
                    split.indexes.push(last.value.clone());
                }
                split.drops.push(statement.to_string());
            }
            _ => split.rest.push(statement.to_string()),
        }
    }

    if split.drops.is_empty() || split.rest.is_empty() {
        return None;
    }
    Some(split)
}

/// Stored `CREATE INDEX` statement of an index in the main schema
pub fn index_sql(conn: &Connection, index_name: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare(
        "SELECT sql FROM duckdb_indexes()
         WHERE database_name = current_database() AND schema_name = 'main' AND index_name = ?",
    )?;
    let mut rows = stmt.query([index_name])?;
    match rows.next()? {
        Some(row) => Ok(row.get::<_, Option<String>>(0)?),
        None => Ok(None),
    }
}

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400, 800ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

/// A DuckDB database that migrations are applied to
pub struct DuckDbTarget {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl DuckDbTarget {
    /// Open (or create) a database file.
    ///
    /// Retries with exponential backoff on file locking errors, which show up
    /// when another process holds the file open.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: Some(db_path.to_path_buf()),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        log::warn!(
                            "Database busy, retrying in {}ms (attempt {}/{}): {}",
                            delay.as_millis(),
                            attempt + 1,
                            MAX_RETRIES,
                            err_msg
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            MigrationError::database(format!(
                "Failed to open database after {} retries",
                MAX_RETRIES
            ))
        }))
    }

    /// Open a private in-memory database (shadow schemas, tests)
    pub fn open_in_memory() -> Result<Self> {
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_in_memory_with_flags(config)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    fn try_open_connection(db_path: &Path) -> Result<Connection> {
        // Extension autoloading stays off; JSON is linked statically via the
        // "json" feature.
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Ok(Connection::open_with_flags(db_path, config)?)
    }

    /// Database file, `None` for in-memory targets
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Lock file guarding migration runs, `None` for in-memory targets
    pub fn lock_path(&self) -> Option<PathBuf> {
        self.db_path.as_deref().map(lock_path_for)
    }

    /// Human-readable target name for logs
    pub fn describe(&self) -> String {
        match &self.db_path {
            Some(path) => path.display().to_string(),
            None => ":memory:".to_string(),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MigrationError::database("Connection mutex poisoned"))
    }

    /// Run `f` with the connection, outside any transaction
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn()?;
        f(&conn)
    }

    /// Run `f` in a single transaction
    pub fn transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn()?;
        in_transaction(&conn, f)
    }

    /// Execute a batch of statements outside the migration machinery
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    /// Check if a table exists in the main schema
    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        let conn = self.conn()?;
        table_exists(&conn, table_name)
    }

    /// Introspect tables, columns and indexes of the main schema
    pub fn snapshot(&self) -> Result<SchemaSnapshot> {
        let conn = self.conn()?;
        introspect(&conn)
    }

    /// Physical plan DuckDB chooses for `sql`, one line per entry
    pub fn explain(&self, sql: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let sql = sql.trim().trim_end_matches(';');
        let mut stmt = conn.prepare(&format!("EXPLAIN {}", sql))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;

        let mut lines = Vec::new();
        for row in rows {
            lines.extend(row?.lines().map(str::to_string));
        }
        Ok(lines)
    }
}

pub fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM duckdb_tables()
         WHERE database_name = current_database() AND schema_name = 'main' AND table_name = ?",
        [table_name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Build a `SchemaSnapshot` from DuckDB's catalog functions
pub fn introspect(conn: &Connection) -> Result<SchemaSnapshot> {
    let mut snapshot = SchemaSnapshot::new();

    let mut stmt = conn.prepare(
        "SELECT table_name FROM duckdb_tables()
         WHERE database_name = current_database() AND schema_name = 'main' AND NOT temporary
         ORDER BY table_name",
    )?;
    let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
    for name in names {
        let name = name?;
        snapshot.tables.insert(
            name.clone(),
            TableSchema {
                name,
                columns: Vec::new(),
            },
        );
    }

    let mut stmt = conn.prepare(
        "SELECT table_name, column_name, data_type, is_nullable, column_default
         FROM duckdb_columns()
         WHERE database_name = current_database() AND schema_name = 'main'
           AND table_oid IN (SELECT table_oid FROM duckdb_tables())
         ORDER BY table_name, column_index",
    )?;
    let columns = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            ColumnSchema {
                name: row.get(1)?,
                data_type: row.get(2)?,
                nullable: row.get(3)?,
                default: row.get::<_, Option<String>>(4)?,
            },
        ))
    })?;
    for column in columns {
        let (table, column) = column?;
        if let Some(t) = snapshot.tables.get_mut(&table) {
            t.columns.push(column);
        }
    }

    let mut stmt = conn.prepare(
        "SELECT index_name, table_name, is_unique, sql FROM duckdb_indexes()
         WHERE database_name = current_database() AND schema_name = 'main'
         ORDER BY index_name",
    )?;
    let indexes = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, bool>(2)?,
            row.get::<_, Option<String>>(3)?,
        ))
    })?;
    for index in indexes {
        let (name, table, unique, sql) = index?;
        let columns = sql.as_deref().map(index_columns).unwrap_or_default();
        snapshot.indexes.insert(
            name.clone(),
            IndexSchema {
                name,
                table,
                columns,
                unique,
            },
        );
    }

    Ok(snapshot)
}

/// Column list of a `CREATE INDEX` statement, left to right, unquoted
fn index_columns(sql: &str) -> Vec<String> {
    let dialect = DuckDbDialect {};
    if let Ok(statements) = Parser::parse_sql(&dialect, sql) {
        if let Some(Statement::CreateIndex(create)) = statements.first() {
            return create
                .columns
                .iter()
                .map(|c| unquote(&c.to_string()))
                .collect();
        }
    }

    // Parser did not understand the stored statement; take the last
    // parenthesised group.
    let Some(open) = sql.rfind('(') else {
        return Vec::new();
    };
    let rest = &sql[open + 1..];
    let close = rest.find(')').unwrap_or(rest.len());
    rest[..close]
        .split(',')
        .map(|c| unquote(c.trim()))
        .filter(|c| !c.is_empty())
        .collect()
}

fn unquote(ident: &str) -> String {
    let trimmed = ident.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].replace("\"\"", "\"")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn registrations(target: &DuckDbTarget) {
        target
            .execute_batch(
                r#"CREATE TABLE "registrations" ("id" TEXT NOT NULL, "name" TEXT NOT NULL, "course" TEXT NOT NULL);
ALTER TABLE "registrations" ADD COLUMN "courseConfigSetName" TEXT;
CREATE INDEX "registrations_courseConfigSetName_idx" ON "registrations"("courseConfigSetName");
CREATE INDEX "registrations_courseConfigSetName_name_course_idx" ON "registrations"("courseConfigSetName", "name", "course");"#,
            )
            .unwrap();
    }

    #[test]
    fn test_valid_sql() {
        assert!(validate_sql_syntax("m", "SELECT * FROM registrations").is_ok());
        assert!(validate_sql_syntax(
            "m",
            r#"ALTER TABLE "registrations" ADD COLUMN "courseConfigSetName" TEXT;"#
        )
        .is_ok());
        assert!(validate_sql_syntax(
            "m",
            r#"CREATE INDEX "i" ON "registrations"("a", "b");"#
        )
        .is_ok());
    }

    #[test]
    fn test_invalid_sql_is_syntax_error() {
        let err = validate_sql_syntax("20240101000000_bad", "ALTER TABLE ADD COLUMN").unwrap_err();
        match err {
            MigrationError::Syntax { migration, message } => {
                assert_eq!(migration, "20240101000000_bad");
                assert!(!message.starts_with("sql parser error"));
            }
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_error() {
        assert_eq!(
            classify_error(
                "m",
                "Catalog Error: Column with name courseConfigSetName already exists!"
            )
            .kind(),
            "schema_conflict"
        );
        assert_eq!(
            classify_error("m", "Constraint Error: NOT NULL constraint failed").kind(),
            "constraint_violation"
        );
        assert_eq!(
            classify_error("m", "Binder Error: Referenced column not found").kind(),
            "statement_failed"
        );
    }

    #[test]
    fn test_split_index_drops() {
        let split = split_index_drops(
            r#"DROP INDEX "registrations_courseConfigSetName_name_course_idx";
DROP INDEX "registrations_courseConfigSetName_idx";
ALTER TABLE "registrations" DROP COLUMN "courseConfigSetName";"#,
        )
        .unwrap();

        assert_eq!(
            split.indexes,
            vec![
                "registrations_courseConfigSetName_name_course_idx",
                "registrations_courseConfigSetName_idx"
            ]
        );
        assert_eq!(split.drops.len(), 2);
        assert_eq!(split.rest.len(), 1);
        assert!(split.rest[0].contains("DROP COLUMN"));

        // Nothing to split
        assert!(split_index_drops(r#"DROP INDEX "i";"#).is_none());
        assert!(split_index_drops("DROP TABLE a;").is_none());
        assert!(split_index_drops("DROP TABLE a; DROP INDEX i;").is_none());
        assert!(split_index_drops("DROP INDEX;;; nonsense").is_none());
    }

    #[test]
    fn test_index_sql_reads_catalog() {
        let target = DuckDbTarget::open_in_memory().unwrap();
        registrations(&target);

        target
            .with_conn(|conn| {
                let sql = index_sql(conn, "registrations_courseConfigSetName_idx")?.unwrap();
                assert!(sql.to_uppercase().starts_with("CREATE INDEX"));
                assert!(index_sql(conn, "no_such_idx")?.is_none());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_retryable_errors() {
        assert!(is_retryable_error("IO Error: Could not set lock on file: Resource temporarily unavailable"));
        assert!(!is_retryable_error("Catalog Error: Table does not exist"));
    }

    #[test]
    fn test_index_columns_from_sql() {
        assert_eq!(
            index_columns(r#"CREATE INDEX "i" ON "registrations"("courseConfigSetName", "name", "course");"#),
            vec!["courseConfigSetName", "name", "course"]
        );
        assert_eq!(
            index_columns("CREATE UNIQUE INDEX i ON t(a, b)"),
            vec!["a", "b"]
        );
    }

    #[test]
    fn test_snapshot_reads_columns_and_indexes() {
        let target = DuckDbTarget::open_in_memory().unwrap();
        registrations(&target);

        let snapshot = target.snapshot().unwrap();
        let table = snapshot.table("registrations").unwrap();
        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "course", "courseConfigSetName"]);

        let added = table.column("courseConfigSetName").unwrap();
        assert_eq!(added.data_type, "VARCHAR");
        assert!(added.nullable);
        assert!(!table.column("id").unwrap().nullable);

        let composite = snapshot
            .index("registrations_courseConfigSetName_name_course_idx")
            .unwrap();
        assert_eq!(composite.table, "registrations");
        assert_eq!(composite.columns, vec!["courseConfigSetName", "name", "course"]);
        assert!(!composite.unique);

        let single = snapshot.index("registrations_courseConfigSetName_idx").unwrap();
        assert_eq!(single.columns, vec!["courseConfigSetName"]);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let target = DuckDbTarget::open_in_memory().unwrap();
        let result: Result<()> = target.transaction(|conn| {
            conn.execute_batch("CREATE TABLE scratch (id INTEGER)")?;
            Err(MigrationError::validation("abort"))
        });
        assert!(result.is_err());
        assert!(!target.table_exists("scratch").unwrap());
    }

    #[test]
    fn test_explain_returns_plan() {
        let target = DuckDbTarget::open_in_memory().unwrap();
        registrations(&target);

        // An empty table plans as EMPTY_RESULT
        target
            .execute_batch(
                r#"INSERT INTO "registrations" VALUES
                    ('r1', 'Ada', 'compilers', 'spring'),
                    ('r2', 'Grace', 'compilers', 'spring'),
                    ('r3', 'Alan', 'logic', 'autumn');"#,
            )
            .unwrap();

        let plan = target
            .explain(r#"SELECT * FROM registrations WHERE "courseConfigSetName" = 'spring';"#)
            .unwrap();
        let text = plan.join("\n").to_uppercase();
        assert!(!text.contains("EMPTY_RESULT"));
        assert!(text.contains("SCAN"));
        assert!(text.contains("REGISTRATIONS"));

        let composite = target
            .explain(
                r#"SELECT id FROM registrations
                   WHERE "courseConfigSetName" = 'spring' AND name = 'Ada' AND course = 'compilers';"#,
            )
            .unwrap();
        let text = composite.join("\n").to_uppercase();
        assert!(!text.contains("EMPTY_RESULT"));
        assert!(text.contains("SCAN"));
        assert!(text.contains("REGISTRATIONS"));
    }

    #[test]
    fn test_open_file_and_lock_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("app.duckdb");
        let target = DuckDbTarget::open(&path).unwrap();

        assert_eq!(target.db_path(), Some(path.as_path()));
        assert_eq!(target.lock_path(), Some(dir.path().join("data").join("app.duckdb.lock")));
        assert!(path.exists());

        let memory = DuckDbTarget::open_in_memory().unwrap();
        assert!(memory.lock_path().is_none());
        assert_eq!(memory.describe(), ":memory:");
    }
}
