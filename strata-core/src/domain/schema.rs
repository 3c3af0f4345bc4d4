//! Schema snapshot model
//!
//! A `SchemaSnapshot` is a catalog-level picture of a database: tables with
//! their ordered columns, plus secondary indexes. Snapshots are produced by
//! introspecting DuckDB (live or shadow) or by simulating a `SchemaChange`,
//! and compared to detect drift.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    pub table: String,
    /// Indexed columns, left to right
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub tables: BTreeMap<String, TableSchema>,
    pub indexes: BTreeMap<String, IndexSchema>,
}

/// One difference between an expected and an actual schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Drift {
    MissingTable { table: String },
    UnexpectedTable { table: String },
    MissingColumn { table: String, column: String },
    UnexpectedColumn { table: String, column: String },
    ColumnChanged {
        table: String,
        expected: ColumnSchema,
        actual: ColumnSchema,
    },
    /// Same column set, different left-to-right order
    ColumnOrder { table: String },
    MissingIndex { index: String },
    UnexpectedIndex { index: String },
    IndexChanged {
        index: String,
        expected: IndexSchema,
        actual: IndexSchema,
    },
}

impl std::fmt::Display for Drift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Drift::MissingTable { table } => write!(f, "table {} is missing", table),
            Drift::UnexpectedTable { table } => write!(f, "table {} is not in any migration", table),
            Drift::MissingColumn { table, column } => {
                write!(f, "column {}.{} is missing", table, column)
            }
            Drift::UnexpectedColumn { table, column } => {
                write!(f, "column {}.{} is not in any migration", table, column)
            }
            Drift::ColumnChanged {
                table,
                expected,
                actual,
            } => write!(
                f,
                "column {}.{} is {}{} but migrations define {}{}",
                table,
                actual.name,
                actual.data_type,
                if actual.nullable { "" } else { " NOT NULL" },
                expected.data_type,
                if expected.nullable { "" } else { " NOT NULL" },
            ),
            Drift::ColumnOrder { table } => write!(f, "columns of {} are in a different order", table),
            Drift::MissingIndex { index } => write!(f, "index {} is missing", index),
            Drift::UnexpectedIndex { index } => write!(f, "index {} is not in any migration", index),
            Drift::IndexChanged {
                index,
                expected,
                actual,
            } => write!(
                f,
                "index {} covers ({}) but migrations define ({})",
                index,
                actual.columns.join(", "),
                expected.columns.join(", ")
            ),
        }
    }
}

impl SchemaSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&ColumnSchema> {
        self.table(table).and_then(|t| t.column(column))
    }

    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.get(name)
    }

    /// Indexes defined on `table`, by name
    pub fn indexes_on<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a IndexSchema> + 'a {
        self.indexes.values().filter(move |i| i.table == table)
    }

    /// Drop tables (and their indexes) that should not take part in
    /// comparisons, such as the ledger itself.
    pub fn without_tables(mut self, names: &[&str]) -> Self {
        self.tables.retain(|name, _| !names.contains(&name.as_str()));
        self.indexes
            .retain(|_, index| !names.contains(&index.table.as_str()));
        self
    }

    /// Differences that turn `self` (expected) into `actual`.
    pub fn diff(&self, actual: &SchemaSnapshot) -> Vec<Drift> {
        let mut drift = Vec::new();

        for (name, expected_table) in &self.tables {
            let Some(actual_table) = actual.tables.get(name) else {
                drift.push(Drift::MissingTable {
                    table: name.clone(),
                });
                continue;
            };

            for expected_col in &expected_table.columns {
                match actual_table.column(&expected_col.name) {
                    None => drift.push(Drift::MissingColumn {
                        table: name.clone(),
                        column: expected_col.name.clone(),
                    }),
                    Some(actual_col) if actual_col != expected_col => {
                        drift.push(Drift::ColumnChanged {
                            table: name.clone(),
                            expected: expected_col.clone(),
                            actual: actual_col.clone(),
                        })
                    }
                    Some(_) => {}
                }
            }

            for actual_col in &actual_table.columns {
                if expected_table.column(&actual_col.name).is_none() {
                    drift.push(Drift::UnexpectedColumn {
                        table: name.clone(),
                        column: actual_col.name.clone(),
                    });
                }
            }

            let expected_names: Vec<&str> =
                expected_table.columns.iter().map(|c| c.name.as_str()).collect();
            let actual_names: Vec<&str> =
                actual_table.columns.iter().map(|c| c.name.as_str()).collect();
            let same_set = expected_names.len() == actual_names.len()
                && expected_names.iter().all(|n| actual_names.contains(n));
            if same_set && expected_names != actual_names {
                drift.push(Drift::ColumnOrder {
                    table: name.clone(),
                });
            }
        }

        for name in actual.tables.keys() {
            if !self.tables.contains_key(name) {
                drift.push(Drift::UnexpectedTable {
                    table: name.clone(),
                });
            }
        }

        for (name, expected_index) in &self.indexes {
            match actual.indexes.get(name) {
                None => drift.push(Drift::MissingIndex {
                    index: name.clone(),
                }),
                Some(actual_index) if actual_index != expected_index => {
                    drift.push(Drift::IndexChanged {
                        index: name.clone(),
                        expected: expected_index.clone(),
                        actual: actual_index.clone(),
                    })
                }
                Some(_) => {}
            }
        }

        for name in actual.indexes.keys() {
            if !self.indexes.contains_key(name) {
                drift.push(Drift::UnexpectedIndex {
                    index: name.clone(),
                });
            }
        }

        drift
    }

    /// True when every table, column and index of `expected` exists in
    /// `self` with the same definition. Extra objects in `self` are allowed.
    pub fn covers(&self, expected: &SchemaSnapshot) -> bool {
        expected.diff(self).iter().all(|d| {
            matches!(
                d,
                Drift::UnexpectedTable { .. }
                    | Drift::UnexpectedColumn { .. }
                    | Drift::UnexpectedIndex { .. }
                    | Drift::ColumnOrder { .. }
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, data_type: &str, nullable: bool) -> ColumnSchema {
        ColumnSchema {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable,
            default: None,
        }
    }

    fn registrations() -> SchemaSnapshot {
        let mut snapshot = SchemaSnapshot::new();
        snapshot.tables.insert(
            "registrations".to_string(),
            TableSchema {
                name: "registrations".to_string(),
                columns: vec![
                    col("id", "VARCHAR", false),
                    col("name", "VARCHAR", false),
                    col("course", "VARCHAR", false),
                ],
            },
        );
        snapshot
    }

    fn with_index(mut snapshot: SchemaSnapshot, name: &str, columns: &[&str]) -> SchemaSnapshot {
        snapshot.indexes.insert(
            name.to_string(),
            IndexSchema {
                name: name.to_string(),
                table: "registrations".to_string(),
                columns: columns.iter().map(|c| c.to_string()).collect(),
                unique: false,
            },
        );
        snapshot
    }

    #[test]
    fn test_identical_snapshots_have_no_drift() {
        let a = with_index(registrations(), "registrations_name_idx", &["name"]);
        assert!(a.diff(&a.clone()).is_empty());
        assert!(a.covers(&a));
    }

    #[test]
    fn test_missing_and_unexpected_columns() {
        let expected = registrations();
        let mut actual = registrations();
        let table = actual.tables.get_mut("registrations").unwrap();
        table.columns.retain(|c| c.name != "course");
        table.columns.push(col("courseConfigSetName", "VARCHAR", true));

        let drift = expected.diff(&actual);
        assert_eq!(
            drift,
            vec![
                Drift::MissingColumn {
                    table: "registrations".to_string(),
                    column: "course".to_string(),
                },
                Drift::UnexpectedColumn {
                    table: "registrations".to_string(),
                    column: "courseConfigSetName".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_index_column_order_matters() {
        let expected = with_index(registrations(), "idx", &["name", "course"]);
        let actual = with_index(registrations(), "idx", &["course", "name"]);

        let drift = expected.diff(&actual);
        assert_eq!(drift.len(), 1);
        assert!(matches!(drift[0], Drift::IndexChanged { .. }));
        assert!(!actual.covers(&expected));
    }

    #[test]
    fn test_covers_allows_extra_objects() {
        let expected = registrations();
        let actual = with_index(registrations(), "registrations_name_idx", &["name"]);
        assert!(actual.covers(&expected));
        assert!(!expected.covers(&actual));
    }

    #[test]
    fn test_without_tables_drops_indexes_too() {
        let snapshot = with_index(registrations(), "registrations_name_idx", &["name"])
            .without_tables(&["registrations"]);
        assert!(snapshot.tables.is_empty());
        assert!(snapshot.indexes.is_empty());
    }

    #[test]
    fn test_drift_display() {
        let drift = Drift::MissingIndex {
            index: "registrations_courseConfigSetName_idx".to_string(),
        };
        assert_eq!(
            drift.to_string(),
            "index registrations_courseConfigSetName_idx is missing"
        );
    }
}
