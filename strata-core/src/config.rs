//! Configuration management
//!
//! Project settings live in `strata.json` next to the migrations:
//! ```json
//! {
//!   "database": "registrations.duckdb",
//!   "migrationsDir": "migrations",
//!   "ledgerTable": "_strata_migrations",
//!   "conflictPolicy": "fail",
//!   "lockTimeoutMs": 30000,
//!   "validateSyntax": true
//! }
//! ```
//! Keys this crate does not know about are preserved on save.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{MigrationError, Result};

/// File name of the project settings
pub const CONFIG_FILE: &str = "strata.json";

/// Default ledger table name
pub const DEFAULT_LEDGER_TABLE: &str = "_strata_migrations";

const DEFAULT_DATABASE: &str = "strata.duckdb";
const DEFAULT_MIGRATIONS_DIR: &str = "migrations";
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 30_000;

/// What to do when a migration collides with objects that already exist
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Abort the run
    #[default]
    Fail,
    /// Record the migration as applied when the live schema already matches
    /// what it would have produced
    Adopt,
}

impl FromStr for ConflictPolicy {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "adopt" => Ok(Self::Adopt),
            other => Err(MigrationError::Config(format!(
                "Unknown conflict policy '{}' (expected fail or adopt)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fail => write!(f, "fail"),
            Self::Adopt => write!(f, "adopt"),
        }
    }
}

/// Raw strata.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    migrations_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ledger_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conflict_policy: Option<ConflictPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lock_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    validate_syntax: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    log_dir: Option<String>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Strata configuration with defaults and environment overrides applied
#[derive(Debug, Clone)]
pub struct Config {
    /// Database file, resolved against the project directory
    pub database: PathBuf,
    pub migrations_dir: PathBuf,
    pub ledger_table: String,
    pub conflict_policy: ConflictPolicy,
    pub lock_timeout: Duration,
    pub validate_syntax: bool,
    /// Directory holding events.duckdb
    pub log_dir: PathBuf,
    // Keep the raw settings for preservation when saving
    _raw_settings: SettingsFile,
}

impl Config {
    /// Defaults for a project rooted at `project_dir`
    pub fn defaults(project_dir: &Path) -> Self {
        Self::from_raw(project_dir, SettingsFile::default())
    }

    fn from_raw(project_dir: &Path, raw: SettingsFile) -> Self {
        let resolve = |value: Option<&String>, default: &str| {
            let path = PathBuf::from(value.map(String::as_str).unwrap_or(default));
            if path.is_absolute() {
                path
            } else {
                project_dir.join(path)
            }
        };

        Self {
            database: resolve(raw.database.as_ref(), DEFAULT_DATABASE),
            migrations_dir: resolve(raw.migrations_dir.as_ref(), DEFAULT_MIGRATIONS_DIR),
            ledger_table: raw
                .ledger_table
                .clone()
                .unwrap_or_else(|| DEFAULT_LEDGER_TABLE.to_string()),
            conflict_policy: raw.conflict_policy.unwrap_or_default(),
            lock_timeout: Duration::from_millis(
                raw.lock_timeout_ms.unwrap_or(DEFAULT_LOCK_TIMEOUT_MS),
            ),
            validate_syntax: raw.validate_syntax.unwrap_or(true),
            log_dir: resolve(raw.log_dir.as_ref(), ".strata"),
            _raw_settings: raw,
        }
    }

    /// Load config from a project directory
    ///
    /// Database, migrations directory and conflict policy can be overridden
    /// with STRATA_DATABASE, STRATA_MIGRATIONS_DIR and STRATA_CONFLICT_POLICY.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let settings_path = project_dir.join(CONFIG_FILE);

        let mut raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str(&content).map_err(|e| {
                MigrationError::Config(format!("{}: {}", settings_path.display(), e))
            })?
        } else {
            SettingsFile::default()
        };

        if let Ok(database) = std::env::var("STRATA_DATABASE") {
            raw.database = Some(database);
        }
        if let Ok(dir) = std::env::var("STRATA_MIGRATIONS_DIR") {
            raw.migrations_dir = Some(dir);
        }
        if let Ok(policy) = std::env::var("STRATA_CONFLICT_POLICY") {
            raw.conflict_policy = Some(policy.parse()?);
        }

        let config = Self::from_raw(project_dir, raw);
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let valid_ident = !self.ledger_table.is_empty()
            && self
                .ledger_table
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && self
                .ledger_table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_ident {
            return Err(MigrationError::Config(format!(
                "ledgerTable '{}' must be a plain identifier",
                self.ledger_table
            )));
        }
        Ok(())
    }

    /// Save config to the project directory
    /// Preserves other settings that strata doesn't manage
    pub fn save(&self, project_dir: &Path) -> Result<()> {
        let settings_path = project_dir.join(CONFIG_FILE);

        // Load existing settings to preserve fields we don't manage
        let mut settings = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str::<SettingsFile>(&content).unwrap_or_default()
        } else {
            self._raw_settings.clone()
        };

        let relative = |path: &Path| {
            path.strip_prefix(project_dir)
                .unwrap_or(path)
                .display()
                .to_string()
        };

        settings.database = Some(relative(&self.database));
        settings.migrations_dir = Some(relative(&self.migrations_dir));
        settings.ledger_table = Some(self.ledger_table.clone());
        settings.conflict_policy = Some(self.conflict_policy);
        settings.lock_timeout_ms = Some(self.lock_timeout.as_millis() as u64);
        settings.validate_syntax = Some(self.validate_syntax);

        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&settings_path, content)?;
        Ok(())
    }
}
