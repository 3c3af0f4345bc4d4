//! Authoring service - writes new migrations from typed schema changes
//!
//! A change is checked against the schema all existing migrations produce
//! before anything is written, and its down SQL is derived automatically.
//! The migration directory appears atomically: files are written into a
//! temporary directory next to the target and renamed into place.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use serde::Serialize;

use crate::adapters::directory::{DOWN_FILE, UP_FILE};
use crate::domain::migration::slugify;
use crate::domain::{Migration, MigrationError, Result, SchemaChange};
use crate::ports::MigrationSource;
use crate::services::drift::shadow_snapshot;

const ID_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone, Serialize)]
pub struct CreatedMigration {
    pub id: String,
    pub dir: PathBuf,
    pub up_sql: String,
    pub down_sql: String,
}

pub struct AuthoringService {
    source: Arc<dyn MigrationSource>,
}

impl AuthoringService {
    pub fn new(source: Arc<dyn MigrationSource>) -> Self {
        Self { source }
    }

    /// Validate `change`, render it and write `<timestamp>_<name>/`
    pub fn create(&self, name: &str, change: &SchemaChange) -> Result<CreatedMigration> {
        let root = self.source.writable_dir().ok_or_else(|| {
            MigrationError::Config(format!(
                "Migration source {} is read-only",
                self.source.describe()
            ))
        })?;

        if change.is_empty() {
            return Err(MigrationError::invalid_change("no operations given"));
        }
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(MigrationError::validation(format!(
                "'{}' is not a usable migration name",
                name
            )));
        }

        let existing = self.source.load()?;
        let before = shadow_snapshot(&existing)?;
        change.apply_to(&before)?;
        let reverse = change.reverse(&before)?;

        let id = format!("{}_{}", next_version(Utc::now().naive_utc(), &existing), slug);
        let up_sql = change.to_sql();
        let down_sql = reverse.to_sql();
        // Reject anything the loader would not accept later
        Migration::new(&id, &up_sql, Some(down_sql.clone()))?;

        let dir = write_migration_dir(root, &id, &up_sql, Some(&down_sql))?;
        log::info!("Created migration {}", dir.display());

        Ok(CreatedMigration {
            id,
            dir,
            up_sql,
            down_sql,
        })
    }

    /// Copy migrations from another source (such as the embedded
    /// registrations history) into the writable directory, skipping ids
    /// that are already there. Returns the ids written.
    pub fn import(&self, migrations: &[Migration]) -> Result<Vec<String>> {
        let root = self.source.writable_dir().ok_or_else(|| {
            MigrationError::Config(format!(
                "Migration source {} is read-only",
                self.source.describe()
            ))
        })?;

        let existing = self.source.load()?;
        let mut written = Vec::new();
        for migration in migrations {
            match existing.iter().find(|m| m.id == migration.id) {
                Some(m) if m.checksum != migration.checksum => {
                    return Err(MigrationError::ChecksumMismatch {
                        id: migration.id.clone(),
                        recorded: m.checksum.clone(),
                        current: migration.checksum.clone(),
                    })
                }
                Some(_) => continue,
                None => {
                    write_migration_dir(
                        root,
                        &migration.id,
                        &migration.up_sql,
                        migration.down_sql.as_deref(),
                    )?;
                    written.push(migration.id.clone());
                }
            }
        }
        Ok(written)
    }
}

/// Write `<root>/<id>/` through a staging directory renamed into place
fn write_migration_dir(root: &Path, id: &str, up_sql: &str, down_sql: Option<&str>) -> Result<PathBuf> {
    fs::create_dir_all(root)?;
    let dir = root.join(id);
    if dir.exists() {
        return Err(MigrationError::validation(format!(
            "{} already exists",
            dir.display()
        )));
    }

    let staging = tempfile::Builder::new()
        .prefix(".strata-new-")
        .tempdir_in(root)?;
    fs::write(staging.path().join(UP_FILE), up_sql)?;
    if let Some(down_sql) = down_sql {
        fs::write(staging.path().join(DOWN_FILE), down_sql)?;
    }
    fs::rename(staging.path(), &dir)?;
    Ok(dir)
}

/// Timestamp prefix for a new migration, kept strictly after every
/// existing one so new migrations never land out of order.
fn next_version(now: NaiveDateTime, existing: &[Migration]) -> String {
    let candidate = now.format(ID_TIMESTAMP_FORMAT).to_string();
    match existing.iter().map(|m| m.version()).max() {
        Some(last) if candidate.as_str() <= last => {
            let bumped = NaiveDateTime::parse_from_str(last, ID_TIMESTAMP_FORMAT)
                .map(|t| t + chrono::Duration::seconds(1));
            match bumped {
                Ok(t) => t.format(ID_TIMESTAMP_FORMAT).to_string(),
                // Not a calendar timestamp; keep numeric order
                Err(_) => format!("{:014}", last.parse::<u64>().unwrap_or(0) + 1),
            }
        }
        _ => candidate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::DirectorySource;
    use crate::domain::ColumnDef;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    fn registrations_table() -> SchemaChange {
        SchemaChange::new().create_table(
            "registrations",
            vec![
                ColumnDef::text("id").not_null(),
                ColumnDef::text("name").not_null(),
                ColumnDef::text("course").not_null(),
            ],
        )
    }

    #[test]
    fn test_next_version_uses_clock() {
        assert_eq!(next_version(at(2024, 3, 15, 12, 0, 0), &[]), "20240315120000");
    }

    #[test]
    fn test_next_version_stays_after_existing() {
        let existing = vec![Migration::new("20240315120059_later", "SELECT 1;", None).unwrap()];
        assert_eq!(
            next_version(at(2024, 1, 1, 0, 0, 0), &existing),
            "20240315120100"
        );
    }

    #[test]
    fn test_create_writes_up_and_down() {
        let dir = tempdir().unwrap();
        let source = Arc::new(DirectorySource::new(dir.path().join("migrations")));
        let authoring = AuthoringService::new(source.clone());

        authoring
            .create("create registrations", &registrations_table())
            .unwrap();

        let change = SchemaChange::new()
            .add_column("registrations", ColumnDef::text("courseConfigSetName"))
            .create_index("registrations", &["courseConfigSetName"])
            .create_index("registrations", &["courseConfigSetName", "name", "course"]);
        let created = authoring
            .create("add course config set name", &change)
            .unwrap();

        assert!(created.id.ends_with("_add_course_config_set_name"));
        assert_eq!(
            fs::read_to_string(created.dir.join(UP_FILE)).unwrap(),
            change.to_sql()
        );
        assert_eq!(
            created.down_sql,
            "DROP INDEX \"registrations_courseConfigSetName_name_course_idx\";\n\
             DROP INDEX \"registrations_courseConfigSetName_idx\";\n\
             ALTER TABLE \"registrations\" DROP COLUMN \"courseConfigSetName\";\n"
        );

        let loaded = source.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].id, created.id);
        // No staging directories left behind
        assert_eq!(fs::read_dir(source.root()).unwrap().count(), 2);
    }

    #[test]
    fn test_create_rejects_invalid_change() {
        let dir = tempdir().unwrap();
        let source = Arc::new(DirectorySource::new(dir.path().join("migrations")));
        let authoring = AuthoringService::new(source.clone());

        let change = SchemaChange::new().create_index("registrations", &["courseConfigSetName"]);
        assert!(matches!(
            authoring.create("index before table", &change),
            Err(MigrationError::InvalidChange(_))
        ));
        assert!(source.load().unwrap().is_empty());
    }

    #[test]
    fn test_import_embedded_history() {
        let dir = tempdir().unwrap();
        let source = Arc::new(DirectorySource::new(dir.path().join("migrations")));
        let authoring = AuthoringService::new(source.clone());
        let embedded = crate::adapters::EmbeddedSource::registrations().load().unwrap();

        assert_eq!(authoring.import(&embedded).unwrap().len(), 2);
        assert!(authoring.import(&embedded).unwrap().is_empty());
        assert_eq!(source.load().unwrap(), embedded);
    }

    #[test]
    fn test_create_needs_writable_source() {
        let authoring = AuthoringService::new(Arc::new(crate::adapters::EmbeddedSource::registrations()));
        assert!(matches!(
            authoring.create("anything", &registrations_table()),
            Err(MigrationError::Config(_))
        ));
    }
}
