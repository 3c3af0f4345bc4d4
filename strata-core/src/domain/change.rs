//! Typed schema changes
//!
//! A `SchemaChange` is an ordered list of DDL operations. It renders to the
//! exact SQL text written into migration files, validates that every
//! operation makes sense given the schema produced by the operations before
//! it, and can derive its own reverse for `down.sql`.

use serde::{Deserialize, Serialize};

use super::result::{MigrationError, Result};
use super::schema::{ColumnSchema, IndexSchema, SchemaSnapshot, TableSchema};

/// Quote an identifier for DuckDB / PostgreSQL style SQL
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Index naming convention: `<table>_<column(s) joined by _>_idx`
pub fn index_name(table: &str, columns: &[String]) -> String {
    format!("{}_{}_idx", table, columns.join("_"))
}

/// Column definition used by `CreateTable` and `AddColumn`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    /// SQL type as written in the migration (e.g. `TEXT`)
    pub data_type: String,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ColumnDef {
    /// Nullable column of the given type with no default
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            default: None,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, "TEXT")
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_expr(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    /// Parse the CLI shorthand `name:TYPE` (optionally `name:TYPE!` for NOT NULL)
    pub fn parse(spec: &str) -> Result<Self> {
        let (name, data_type) = spec.split_once(':').ok_or_else(|| {
            MigrationError::validation(format!("Column '{}' must look like name:TYPE", spec))
        })?;
        let name = name.trim();
        let data_type = data_type.trim();
        if name.is_empty() || data_type.is_empty() {
            return Err(MigrationError::validation(format!(
                "Column '{}' must look like name:TYPE",
                spec
            )));
        }
        match data_type.strip_suffix('!') {
            Some(t) => Ok(Self::new(name, t.trim()).not_null()),
            None => Ok(Self::new(name, data_type)),
        }
    }

    fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.data_type);
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }

    fn to_schema(&self) -> ColumnSchema {
        ColumnSchema {
            name: self.name.clone(),
            data_type: self.data_type.clone(),
            nullable: self.nullable,
            default: self.default.clone(),
        }
    }

    fn from_schema(column: &ColumnSchema) -> Self {
        Self {
            name: column.name.clone(),
            data_type: column.data_type.clone(),
            nullable: column.nullable,
            default: column.default.clone(),
        }
    }
}

/// One atomic DDL operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaOp {
    CreateTable {
        table: String,
        columns: Vec<ColumnDef>,
    },
    DropTable {
        table: String,
    },
    AddColumn {
        table: String,
        column: ColumnDef,
    },
    DropColumn {
        table: String,
        column: String,
    },
    CreateIndex {
        name: String,
        table: String,
        columns: Vec<String>,
        unique: bool,
    },
    DropIndex {
        name: String,
    },
}

impl SchemaOp {
    /// Render the operation as a single SQL statement
    pub fn to_sql(&self) -> String {
        match self {
            SchemaOp::CreateTable { table, columns } => {
                let cols: Vec<String> = columns.iter().map(|c| format!("    {}", c.to_sql())).collect();
                format!("CREATE TABLE {} (\n{}\n);", quote_ident(table), cols.join(",\n"))
            }
            SchemaOp::DropTable { table } => format!("DROP TABLE {};", quote_ident(table)),
            SchemaOp::AddColumn { table, column } => format!(
                "ALTER TABLE {} ADD COLUMN {};",
                quote_ident(table),
                column.to_sql()
            ),
            SchemaOp::DropColumn { table, column } => format!(
                "ALTER TABLE {} DROP COLUMN {};",
                quote_ident(table),
                quote_ident(column)
            ),
            SchemaOp::CreateIndex {
                name,
                table,
                columns,
                unique,
            } => {
                let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
                format!(
                    "CREATE {}INDEX {} ON {}({});",
                    if *unique { "UNIQUE " } else { "" },
                    quote_ident(name),
                    quote_ident(table),
                    cols.join(", ")
                )
            }
            SchemaOp::DropIndex { name } => format!("DROP INDEX {};", quote_ident(name)),
        }
    }

    /// Apply the operation to `schema`, failing if it is not valid in that state
    pub fn apply(&self, schema: &mut SchemaSnapshot) -> Result<()> {
        match self {
            SchemaOp::CreateTable { table, columns } => {
                if schema.tables.contains_key(table) {
                    return Err(MigrationError::invalid_change(format!(
                        "table {} already exists",
                        table
                    )));
                }
                if columns.is_empty() {
                    return Err(MigrationError::invalid_change(format!(
                        "table {} has no columns",
                        table
                    )));
                }
                for (i, column) in columns.iter().enumerate() {
                    if columns[..i].iter().any(|c| c.name == column.name) {
                        return Err(MigrationError::invalid_change(format!(
                            "column {}.{} is defined twice",
                            table, column.name
                        )));
                    }
                }
                schema.tables.insert(
                    table.clone(),
                    TableSchema {
                        name: table.clone(),
                        columns: columns.iter().map(ColumnDef::to_schema).collect(),
                    },
                );
            }
            SchemaOp::DropTable { table } => {
                if schema.tables.remove(table).is_none() {
                    return Err(MigrationError::invalid_change(format!(
                        "table {} does not exist",
                        table
                    )));
                }
                schema.indexes.retain(|_, index| &index.table != table);
            }
            SchemaOp::AddColumn { table, column } => {
                let t = schema.tables.get_mut(table).ok_or_else(|| {
                    MigrationError::invalid_change(format!("table {} does not exist", table))
                })?;
                if t.column(&column.name).is_some() {
                    return Err(MigrationError::invalid_change(format!(
                        "column {}.{} already exists",
                        table, column.name
                    )));
                }
                // Existing rows would violate the constraint
                if !column.nullable && column.default.is_none() {
                    return Err(MigrationError::invalid_change(format!(
                        "column {}.{} is NOT NULL without a default",
                        table, column.name
                    )));
                }
                t.columns.push(column.to_schema());
            }
            SchemaOp::DropColumn { table, column } => {
                if let Some(index) = schema
                    .indexes_on(table)
                    .find(|i| i.columns.iter().any(|c| c == column))
                {
                    return Err(MigrationError::invalid_change(format!(
                        "column {}.{} is used by index {}",
                        table, column, index.name
                    )));
                }
                let t = schema.tables.get_mut(table).ok_or_else(|| {
                    MigrationError::invalid_change(format!("table {} does not exist", table))
                })?;
                let before = t.columns.len();
                t.columns.retain(|c| &c.name != column);
                if t.columns.len() == before {
                    return Err(MigrationError::invalid_change(format!(
                        "column {}.{} does not exist",
                        table, column
                    )));
                }
            }
            SchemaOp::CreateIndex {
                name,
                table,
                columns,
                unique,
            } => {
                if schema.indexes.contains_key(name) {
                    return Err(MigrationError::invalid_change(format!(
                        "index {} already exists",
                        name
                    )));
                }
                let t = schema.table(table).ok_or_else(|| {
                    MigrationError::invalid_change(format!("table {} does not exist", table))
                })?;
                if columns.is_empty() {
                    return Err(MigrationError::invalid_change(format!(
                        "index {} has no columns",
                        name
                    )));
                }
                for (i, column) in columns.iter().enumerate() {
                    if t.column(column).is_none() {
                        return Err(MigrationError::invalid_change(format!(
                            "index {} references missing column {}.{}",
                            name, table, column
                        )));
                    }
                    if columns[..i].contains(column) {
                        return Err(MigrationError::invalid_change(format!(
                            "index {} lists column {} twice",
                            name, column
                        )));
                    }
                }
                schema.indexes.insert(
                    name.clone(),
                    IndexSchema {
                        name: name.clone(),
                        table: table.clone(),
                        columns: columns.clone(),
                        unique: *unique,
                    },
                );
            }
            SchemaOp::DropIndex { name } => {
                if schema.indexes.remove(name).is_none() {
                    return Err(MigrationError::invalid_change(format!(
                        "index {} does not exist",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Operations that undo `self`, given the schema right before it ran
    fn reverse(&self, before: &SchemaSnapshot) -> Result<Vec<SchemaOp>> {
        let ops = match self {
            SchemaOp::CreateTable { table, .. } => vec![SchemaOp::DropTable {
                table: table.clone(),
            }],
            SchemaOp::DropTable { table } => {
                let t = before.table(table).ok_or_else(|| {
                    MigrationError::invalid_change(format!("table {} does not exist", table))
                })?;
                let mut ops = vec![SchemaOp::CreateTable {
                    table: table.clone(),
                    columns: t.columns.iter().map(ColumnDef::from_schema).collect(),
                }];
                ops.extend(before.indexes_on(table).map(|index| SchemaOp::CreateIndex {
                    name: index.name.clone(),
                    table: index.table.clone(),
                    columns: index.columns.clone(),
                    unique: index.unique,
                }));
                ops
            }
            SchemaOp::AddColumn { table, column } => vec![SchemaOp::DropColumn {
                table: table.clone(),
                column: column.name.clone(),
            }],
            SchemaOp::DropColumn { table, column } => {
                let c = before.column(table, column).ok_or_else(|| {
                    MigrationError::invalid_change(format!(
                        "column {}.{} does not exist",
                        table, column
                    ))
                })?;
                vec![SchemaOp::AddColumn {
                    table: table.clone(),
                    column: ColumnDef::from_schema(c),
                }]
            }
            SchemaOp::CreateIndex { name, .. } => vec![SchemaOp::DropIndex { name: name.clone() }],
            SchemaOp::DropIndex { name } => {
                let index = before.index(name).ok_or_else(|| {
                    MigrationError::invalid_change(format!("index {} does not exist", name))
                })?;
                vec![SchemaOp::CreateIndex {
                    name: index.name.clone(),
                    table: index.table.clone(),
                    columns: index.columns.clone(),
                    unique: index.unique,
                }]
            }
        };
        Ok(ops)
    }
}

/// Ordered sequence of DDL operations forming one migration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaChange {
    pub ops: Vec<SchemaOp>,
}

impl SchemaChange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn push(mut self, op: SchemaOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn create_table(self, table: &str, columns: Vec<ColumnDef>) -> Self {
        self.push(SchemaOp::CreateTable {
            table: table.to_string(),
            columns,
        })
    }

    pub fn drop_table(self, table: &str) -> Self {
        self.push(SchemaOp::DropTable {
            table: table.to_string(),
        })
    }

    pub fn add_column(self, table: &str, column: ColumnDef) -> Self {
        self.push(SchemaOp::AddColumn {
            table: table.to_string(),
            column,
        })
    }

    pub fn drop_column(self, table: &str, column: &str) -> Self {
        self.push(SchemaOp::DropColumn {
            table: table.to_string(),
            column: column.to_string(),
        })
    }

    /// Add a secondary index named by convention
    pub fn create_index(self, table: &str, columns: &[&str]) -> Self {
        self.index(table, columns, false)
    }

    pub fn create_unique_index(self, table: &str, columns: &[&str]) -> Self {
        self.index(table, columns, true)
    }

    fn index(self, table: &str, columns: &[&str], unique: bool) -> Self {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        self.push(SchemaOp::CreateIndex {
            name: index_name(table, &columns),
            table: table.to_string(),
            columns,
            unique,
        })
    }

    pub fn drop_index(self, name: &str) -> Self {
        self.push(SchemaOp::DropIndex {
            name: name.to_string(),
        })
    }

    /// SQL text, one statement per line, newline-terminated
    pub fn to_sql(&self) -> String {
        let mut sql = String::new();
        for op in &self.ops {
            sql.push_str(&op.to_sql());
            sql.push('\n');
        }
        sql
    }

    /// Simulate the change against `schema`, checking every operation in
    /// order, and return the resulting schema.
    pub fn apply_to(&self, schema: &SchemaSnapshot) -> Result<SchemaSnapshot> {
        let mut next = schema.clone();
        for op in &self.ops {
            op.apply(&mut next)?;
        }
        Ok(next)
    }

    /// Build the change that undoes `self` when applied to the schema
    /// `self` produces from `before`.
    pub fn reverse(&self, before: &SchemaSnapshot) -> Result<SchemaChange> {
        let mut state = before.clone();
        let mut steps: Vec<Vec<SchemaOp>> = Vec::with_capacity(self.ops.len());
        for op in &self.ops {
            steps.push(op.reverse(&state)?);
            op.apply(&mut state)?;
        }
        Ok(SchemaChange {
            ops: steps.into_iter().rev().flatten().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_schema() -> SchemaSnapshot {
        SchemaChange::new()
            .create_table(
                "registrations",
                vec![
                    ColumnDef::text("id").not_null(),
                    ColumnDef::text("name").not_null(),
                    ColumnDef::text("course").not_null(),
                ],
            )
            .apply_to(&SchemaSnapshot::new())
            .unwrap()
    }

    fn course_config_change() -> SchemaChange {
        SchemaChange::new()
            .add_column("registrations", ColumnDef::text("courseConfigSetName"))
            .create_index("registrations", &["courseConfigSetName"])
            .create_index("registrations", &["courseConfigSetName", "name", "course"])
    }

    #[test]
    fn test_renders_registrations_migration_exactly() {
        let expected = concat!(
            "ALTER TABLE \"registrations\" ADD COLUMN \"courseConfigSetName\" TEXT;\n",
            "CREATE INDEX \"registrations_courseConfigSetName_idx\" ON \"registrations\"(\"courseConfigSetName\");\n",
            "CREATE INDEX \"registrations_courseConfigSetName_name_course_idx\" ON \"registrations\"(\"courseConfigSetName\", \"name\", \"course\");\n",
        );
        assert_eq!(course_config_change().to_sql(), expected);
    }

    #[test]
    fn test_index_naming_convention() {
        let cols = vec!["courseConfigSetName".to_string(), "name".to_string()];
        assert_eq!(
            index_name("registrations", &cols),
            "registrations_courseConfigSetName_name_idx"
        );
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_apply_to_produces_column_and_indexes() {
        let after = course_config_change().apply_to(&base_schema()).unwrap();

        let column = after.column("registrations", "courseConfigSetName").unwrap();
        assert!(column.nullable);
        assert!(column.default.is_none());

        let composite = after
            .index("registrations_courseConfigSetName_name_course_idx")
            .unwrap();
        assert_eq!(composite.columns, vec!["courseConfigSetName", "name", "course"]);
    }

    #[test]
    fn test_index_before_column_violates_ordering() {
        let change = SchemaChange::new()
            .create_index("registrations", &["courseConfigSetName"])
            .add_column("registrations", ColumnDef::text("courseConfigSetName"));

        let err = change.apply_to(&base_schema()).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidChange(_)));
        assert!(err.to_string().contains("missing column"));
    }

    #[test]
    fn test_applying_twice_conflicts() {
        let after = course_config_change().apply_to(&base_schema()).unwrap();
        let err = course_config_change().apply_to(&after).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_not_null_without_default_rejected() {
        let change =
            SchemaChange::new().add_column("registrations", ColumnDef::text("x").not_null());
        assert!(change.apply_to(&base_schema()).is_err());

        let change = SchemaChange::new().add_column(
            "registrations",
            ColumnDef::text("x").not_null().default_expr("''"),
        );
        assert!(change.apply_to(&base_schema()).is_ok());
    }

    #[test]
    fn test_drop_indexed_column_rejected() {
        let after = course_config_change().apply_to(&base_schema()).unwrap();
        let change = SchemaChange::new().drop_column("registrations", "courseConfigSetName");
        let err = change.apply_to(&after).unwrap_err();
        assert!(err.to_string().contains("used by index"));
    }

    #[test]
    fn test_reverse_restores_prior_schema() {
        let before = base_schema();
        let change = course_config_change();
        let after = change.apply_to(&before).unwrap();

        let down = change.reverse(&before).unwrap();
        assert_eq!(
            down.to_sql(),
            concat!(
                "DROP INDEX \"registrations_courseConfigSetName_name_course_idx\";\n",
                "DROP INDEX \"registrations_courseConfigSetName_idx\";\n",
                "ALTER TABLE \"registrations\" DROP COLUMN \"courseConfigSetName\";\n",
            )
        );
        assert_eq!(down.apply_to(&after).unwrap(), before);
    }

    #[test]
    fn test_reverse_of_drop_table_recreates_indexes() {
        let before = course_config_change().apply_to(&base_schema()).unwrap();
        let change = SchemaChange::new().drop_table("registrations");
        let after = change.apply_to(&before).unwrap();
        assert!(after.tables.is_empty());
        assert!(after.indexes.is_empty());

        let down = change.reverse(&before).unwrap();
        assert_eq!(down.apply_to(&after).unwrap(), before);
    }

    #[test]
    fn test_column_def_parse() {
        let c = ColumnDef::parse("courseConfigSetName:TEXT").unwrap();
        assert_eq!(c, ColumnDef::text("courseConfigSetName"));

        let c = ColumnDef::parse("seats:INTEGER!").unwrap();
        assert!(!c.nullable);
        assert_eq!(c.data_type, "INTEGER");

        assert!(ColumnDef::parse("nocolon").is_err());
        assert!(ColumnDef::parse(":TEXT").is_err());
    }

    #[test]
    fn test_create_table_sql() {
        let change = SchemaChange::new().create_table(
            "courses",
            vec![ColumnDef::text("id").not_null(), ColumnDef::new("seats", "INTEGER")],
        );
        assert_eq!(
            change.to_sql(),
            "CREATE TABLE \"courses\" (\n    \"id\" TEXT NOT NULL,\n    \"seats\" INTEGER\n);\n"
        );
    }
}
