//! Directory migration source
//!
//! Layout:
//!
//! ```text
//! migrations/
//! ├── 20240101000000_create_registrations/
//! │   ├── migration.sql
//! │   └── down.sql          (optional)
//! └── 20240315120000_add_course_config_set_name/
//!     ├── migration.sql
//!     └── down.sql
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::migration::{parse_id, sort_and_check};
use crate::domain::{Migration, MigrationError, Result};
use crate::ports::MigrationSource;

/// File holding the forward SQL inside a migration directory
pub const UP_FILE: &str = "migration.sql";
/// File holding the reverse SQL inside a migration directory
pub const DOWN_FILE: &str = "down.sql";

/// Loads migrations from one sub-directory per migration
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn load_one(&self, dir: &Path, id: &str) -> Result<Migration> {
        let up_path = dir.join(UP_FILE);
        if !up_path.is_file() {
            return Err(MigrationError::validation(format!(
                "Migration directory {} has no {}",
                dir.display(),
                UP_FILE
            )));
        }
        let up_sql = fs::read_to_string(&up_path)?;

        let down_path = dir.join(DOWN_FILE);
        let down_sql = if down_path.is_file() {
            Some(fs::read_to_string(&down_path)?)
        } else {
            None
        };

        Migration::new(id, up_sql, down_sql)
    }
}

impl MigrationSource for DirectorySource {
    fn load(&self) -> Result<Vec<Migration>> {
        // A project without migrations yet is not an error
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut migrations = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            let file_name = entry.file_name();
            if !path.is_dir() || file_name.to_string_lossy().starts_with('.') {
                continue;
            }
            let name = file_name.to_str().ok_or_else(|| {
                MigrationError::validation(format!(
                    "Migration directory name {} is not valid UTF-8",
                    path.display()
                ))
            })?;
            parse_id(name)?;
            migrations.push(self.load_one(&path, name)?);
        }

        sort_and_check(migrations)
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn writable_dir(&self) -> Option<&Path> {
        Some(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_migration(root: &Path, id: &str, up: &str, down: Option<&str>) {
        let dir = root.join(id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(UP_FILE), up).unwrap();
        if let Some(down) = down {
            fs::write(dir.join(DOWN_FILE), down).unwrap();
        }
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = tempdir().unwrap();
        let source = DirectorySource::new(dir.path().join("migrations"));
        assert!(source.load().unwrap().is_empty());
    }

    #[test]
    fn test_loads_sorted_with_optional_down() {
        let dir = tempdir().unwrap();
        write_migration(dir.path(), "20240315120000_second", "SELECT 2;", None);
        write_migration(
            dir.path(),
            "20240101000000_first",
            "SELECT 1;",
            Some("SELECT -1;"),
        );
        // Ignored entries
        fs::write(dir.path().join("README.md"), "notes").unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();

        let migrations = DirectorySource::new(dir.path()).load().unwrap();
        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].id, "20240101000000_first");
        assert_eq!(migrations[0].down_sql.as_deref(), Some("SELECT -1;"));
        assert_eq!(migrations[1].id, "20240315120000_second");
        assert!(migrations[1].down_sql.is_none());
    }

    #[test]
    fn test_rejects_bad_directory_name() {
        let dir = tempdir().unwrap();
        write_migration(dir.path(), "add_stuff", "SELECT 1;", None);

        let err = DirectorySource::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, MigrationError::Validation(_)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_rejects_non_utf8_directory_name() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempdir().unwrap();
        write_migration(dir.path(), "20240101000000_first", "SELECT 1;", None);
        let bad = dir
            .path()
            .join(OsStr::from_bytes(b"20240102000000_caf\xe9"));
        fs::create_dir_all(&bad).unwrap();
        fs::write(bad.join(UP_FILE), "SELECT 2;").unwrap();

        let err = DirectorySource::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, MigrationError::Validation(_)));
        assert!(err.to_string().contains("UTF-8"));
    }

    #[test]
    fn test_rejects_directory_without_up_file() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("20240101000000_empty")).unwrap();

        let err = DirectorySource::new(dir.path()).load().unwrap_err();
        assert!(err.to_string().contains(UP_FILE));
    }
}
