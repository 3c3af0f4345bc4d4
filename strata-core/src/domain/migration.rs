//! Migration domain model

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::result::{MigrationError, Result};

/// Migration ids look like `20240315120000_add_course_config_set_name`:
/// a 14-digit UTC timestamp, an underscore, then a snake_case name.
fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{14})_([a-z0-9]+(?:_[a-z0-9]+)*)$").expect("static regex is valid")
    })
}

/// Split a migration id into its version and name parts
pub fn parse_id(id: &str) -> Result<(&str, &str)> {
    let caps = id_pattern().captures(id).ok_or_else(|| {
        MigrationError::validation(format!(
            "Invalid migration id '{}': expected <YYYYMMDDHHMMSS>_<snake_case_name>",
            id
        ))
    })?;
    // Both groups are mandatory in the pattern
    let version = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    let name = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
    Ok((version, name))
}

/// Turn free text ("Add course config set") into a migration name
/// ("add_course_config_set").
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_underscore = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            // camelCase boundaries become underscores
            if c.is_ascii_uppercase() && !last_underscore && !slug.is_empty() {
                slug.push('_');
            }
            slug.push(c.to_ascii_lowercase());
            last_underscore = false;
        } else if !last_underscore {
            slug.push('_');
            last_underscore = true;
        }
    }
    slug.trim_end_matches('_').to_string()
}

/// SHA-256 of the migration SQL, lowercase hex.
///
/// The text is hashed exactly as stored, so any edit (including whitespace)
/// to an applied migration is detected.
pub fn checksum(sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    hex::encode(hasher.finalize())
}

/// A single schema migration as loaded from a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Migration {
    pub id: String,
    pub name: String,
    pub up_sql: String,
    /// Reverse SQL; `None` when the migration cannot be rolled back
    pub down_sql: Option<String>,
    pub checksum: String,
}

impl Migration {
    /// Create a migration, validating the id and computing the checksum
    pub fn new(
        id: impl Into<String>,
        up_sql: impl Into<String>,
        down_sql: Option<String>,
    ) -> Result<Self> {
        let id = id.into();
        let up_sql = up_sql.into();
        let (_, name) = parse_id(&id)?;
        let name = name.to_string();

        if up_sql.trim().is_empty() {
            return Err(MigrationError::validation(format!(
                "Migration {} has an empty up migration",
                id
            )));
        }

        let down_sql = down_sql.filter(|sql| !sql.trim().is_empty());

        Ok(Self {
            checksum: checksum(&up_sql),
            id,
            name,
            up_sql,
            down_sql,
        })
    }

    /// Timestamp prefix of the id
    pub fn version(&self) -> &str {
        &self.id[..14]
    }

    pub fn is_reversible(&self) -> bool {
        self.down_sql.is_some()
    }
}

impl PartialOrd for Migration {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Migration {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

/// Sort migrations by id and reject duplicates
pub fn sort_and_check(mut migrations: Vec<Migration>) -> Result<Vec<Migration>> {
    migrations.sort();
    for pair in migrations.windows(2) {
        if pair[0].id == pair[1].id {
            return Err(MigrationError::DuplicateMigration(pair[0].id.clone()));
        }
    }
    Ok(migrations)
}
