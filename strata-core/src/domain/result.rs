//! Result and error types for the core library

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core library error type
#[derive(Error, Debug)]
pub enum MigrationError {
    /// The object a migration creates already exists in the live schema
    #[error("Schema conflict in {migration}: {message}")]
    SchemaConflict { migration: String, message: String },

    #[error("Constraint violation in {migration}: {message}")]
    ConstraintViolation { migration: String, message: String },

    #[error("Migration {migration} failed: {message}")]
    Statement { migration: String, message: String },

    #[error("Syntax error in {migration}: {message}")]
    Syntax { migration: String, message: String },

    #[error("Checksum mismatch for {id}: recorded {recorded}, found {current}")]
    ChecksumMismatch {
        id: String,
        recorded: String,
        current: String,
    },

    /// Recorded in the ledger but absent from the migration source
    #[error("Migration {0} is recorded as applied but no longer exists")]
    MissingMigration(String),

    #[error("Migration {id} is older than the last applied migration {last_applied}")]
    OutOfOrder { id: String, last_applied: String },

    #[error("Duplicate migration id: {0}")]
    DuplicateMigration(String),

    #[error("Invalid schema change: {0}")]
    InvalidChange(String),

    #[error("Migration {0} has no down migration")]
    NoRollback(String),

    #[error("Timed out after {waited_ms}ms waiting for migration lock {path}")]
    LockTimeout { path: String, waited_ms: u64 },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrationError {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an invalid change error
    pub fn invalid_change(msg: impl Into<String>) -> Self {
        Self::InvalidChange(msg.into())
    }

    /// Stable machine-readable name of the error variant, used in run events
    /// and JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SchemaConflict { .. } => "schema_conflict",
            Self::ConstraintViolation { .. } => "constraint_violation",
            Self::Statement { .. } => "statement_failed",
            Self::Syntax { .. } => "syntax_error",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::MissingMigration(_) => "missing_migration",
            Self::OutOfOrder { .. } => "out_of_order",
            Self::DuplicateMigration(_) => "duplicate_migration",
            Self::InvalidChange(_) => "invalid_change",
            Self::NoRollback(_) => "no_rollback",
            Self::LockTimeout { .. } => "lock_timeout",
            Self::Database(_) => "database",
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }

    /// Migration id the error is attributed to, if any
    pub fn migration_id(&self) -> Option<&str> {
        match self {
            Self::SchemaConflict { migration, .. }
            | Self::ConstraintViolation { migration, .. }
            | Self::Statement { migration, .. }
            | Self::Syntax { migration, .. } => Some(migration.as_str()),
            Self::ChecksumMismatch { id, .. } | Self::OutOfOrder { id, .. } => Some(id.as_str()),
            Self::MissingMigration(id)
            | Self::DuplicateMigration(id)
            | Self::NoRollback(id) => Some(id.as_str()),
            _ => None,
        }
    }
}

impl From<duckdb::Error> for MigrationError {
    fn from(err: duckdb::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, MigrationError>;

/// Operation result with optional context (for JSON output)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub context: Option<HashMap<String, serde_json::Value>>,
}

impl<T> OperationResult<T> {
    /// Create a successful result
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            context: None,
        }
    }

    /// Create a failed result
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            context: None,
        }
    }

    /// Create a failed result with context
    pub fn fail_with_context(
        error: impl Into<String>,
        context: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            context: Some(context),
        }
    }
}

impl<T> From<Result<T>> for OperationResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => {
                let mut context = HashMap::new();
                context.insert("kind".to_string(), serde_json::json!(e.kind()));
                if let Some(id) = e.migration_id() {
                    context.insert("migration".to_string(), serde_json::json!(id));
                }
                Self::fail_with_context(e.to_string(), context)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_result_ok() {
        let result: OperationResult<i32> = OperationResult::ok(42);
        assert!(result.success);
        assert_eq!(result.data, Some(42));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_operation_result_fail() {
        let result: OperationResult<i32> = OperationResult::fail("Something went wrong");
        assert!(!result.success);
        assert!(result.data.is_none());
        assert_eq!(result.error, Some("Something went wrong".to_string()));
    }

    #[test]
    fn test_from_result_carries_kind_and_migration() {
        let err: Result<i32> = Err(MigrationError::SchemaConflict {
            migration: "20240315120000_add_course_config_set_name".to_string(),
            message: "Column already exists".to_string(),
        });
        let result: OperationResult<i32> = err.into();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Schema conflict"));

        let context = result.context.unwrap();
        assert_eq!(context["kind"], "schema_conflict");
        assert_eq!(
            context["migration"],
            "20240315120000_add_course_config_set_name"
        );
    }

    #[test]
    fn test_kind_for_plain_errors() {
        assert_eq!(MigrationError::validation("bad").kind(), "validation");
        assert!(MigrationError::validation("bad").migration_id().is_none());
        assert_eq!(
            MigrationError::NoRollback("x".to_string()).migration_id(),
            Some("x")
        );
    }
}
