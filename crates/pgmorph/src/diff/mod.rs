//! Schema differ: computes the semantic delta between two schema models.
//!
//! `diff` is a pure function over immutable inputs. Given equal inputs it
//! produces an equal diff, including identical warning text and order, so
//! the generator downstream is deterministic end to end.

use crate::schema::{Column, Constraint, ConstraintKind, Index, Schema, Table};
use crate::typemap;
use serde::{Deserialize, Serialize};

/// The delta between a current and a desired schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diff {
    /// Tables present only in the desired schema.
    pub added_tables: Vec<Table>,

    /// Tables present only in the current schema.
    pub dropped_tables: Vec<Table>,

    /// Tables present in both but differing.
    pub modified_tables: Vec<TableDiff>,

    /// Human-readable findings about the delta.
    pub warnings: Vec<Warning>,
}

impl Diff {
    /// True when the two schemas are structurally identical.
    pub fn is_empty(&self) -> bool {
        self.added_tables.is_empty()
            && self.dropped_tables.is_empty()
            && self.modified_tables.is_empty()
    }

    /// Warnings that describe loss of schema or data.
    pub fn destructive_warnings(&self) -> impl Iterator<Item = &Warning> {
        self.warnings.iter().filter(|w| w.destructive)
    }

    /// One-line summary for migration headers and plan output.
    pub fn summary(&self) -> String {
        format!(
            "tables: {} added, {} dropped, {} modified; warnings: {}",
            self.added_tables.len(),
            self.dropped_tables.len(),
            self.modified_tables.len(),
            self.warnings.len()
        )
    }
}

/// Per-table delta for a table present in both schemas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDiff {
    pub name: String,
    pub added_columns: Vec<Column>,
    pub dropped_columns: Vec<Column>,
    pub modified_columns: Vec<ColumnChange>,
    pub added_indexes: Vec<Index>,
    pub dropped_indexes: Vec<Index>,
    pub added_constraints: Vec<Constraint>,
    pub dropped_constraints: Vec<Constraint>,
}

impl TableDiff {
    fn is_empty(&self) -> bool {
        self.added_columns.is_empty()
            && self.dropped_columns.is_empty()
            && self.modified_columns.is_empty()
            && self.added_indexes.is_empty()
            && self.dropped_indexes.is_empty()
            && self.added_constraints.is_empty()
            && self.dropped_constraints.is_empty()
    }
}

/// A column whose definition changed, carrying both sides so the generator
/// can emit the right `ALTER`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnChange {
    pub old: Column,
    pub new: Column,
}

/// A diff finding. Destructive warnings are upgraded to errors under the
/// data-loss policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub message: String,
    pub destructive: bool,

    /// Set for NULL -> NOT NULL tightening: the differ cannot know whether
    /// the table is empty, so it names the table and the command layer
    /// re-checks the live row count before upgrading to an error.
    pub null_tightening_table: Option<String>,
}

impl Warning {
    fn destructive(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            destructive: true,
            null_tightening_table: None,
        }
    }

    fn advisory(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            destructive: false,
            null_tightening_table: None,
        }
    }

    fn null_tightening(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            destructive: true,
            null_tightening_table: Some(table.into()),
        }
    }
}

/// Compute the delta that transforms `current` into `desired`.
pub fn diff(current: &Schema, desired: &Schema) -> Diff {
    let mut out = Diff::default();

    let current_tables = current.sorted_tables();
    let desired_tables = desired.sorted_tables();

    for table in &desired_tables {
        if current.table(&table.name).is_none() {
            out.added_tables.push((*table).clone());
        }
    }

    for table in &current_tables {
        if desired.table(&table.name).is_none() {
            out.warnings.push(Warning::destructive(format!(
                "table '{}' will be dropped",
                table.name
            )));
            out.dropped_tables.push((*table).clone());
        }
    }

    for table in &current_tables {
        if let Some(desired_table) = desired.table(&table.name) {
            let table_diff = diff_table(table, desired_table, &mut out.warnings);
            if !table_diff.is_empty() {
                out.modified_tables.push(table_diff);
            }
        }
    }

    // Vet foreign keys that point at columns with no uniqueness guarantee.
    let added_fks = out
        .added_tables
        .iter()
        .flat_map(|t| t.foreign_keys().map(move |c| (t.name.clone(), c)))
        .chain(out.modified_tables.iter().flat_map(|td| {
            td.added_constraints
                .iter()
                .filter(|c| c.kind == ConstraintKind::ForeignKey)
                .map(move |c| (td.name.clone(), c))
        }));
    let mut fk_warnings = Vec::new();
    for (table_name, fk) in added_fks {
        let Some(reference) = &fk.reference else {
            continue;
        };
        if reference.columns.is_empty() {
            continue;
        }
        let covered = desired
            .table(&reference.table)
            .map(|t| t.has_unique_coverage(&reference.columns))
            .unwrap_or(false);
        if !covered {
            fk_warnings.push(Warning::advisory(format!(
                "foreign key '{}' on '{}' references {}({}) which has no uniqueness guarantee",
                fk.name,
                table_name,
                reference.table,
                reference.columns.join(", ")
            )));
        }
    }
    out.warnings.extend(fk_warnings);

    out
}

fn diff_table(current: &Table, desired: &Table, warnings: &mut Vec<Warning>) -> TableDiff {
    let mut td = TableDiff {
        name: current.name.clone(),
        added_columns: Vec::new(),
        dropped_columns: Vec::new(),
        modified_columns: Vec::new(),
        added_indexes: Vec::new(),
        dropped_indexes: Vec::new(),
        added_constraints: Vec::new(),
        dropped_constraints: Vec::new(),
    };

    for col in &desired.columns {
        if current.column(&col.name).is_none() {
            td.added_columns.push(col.clone());
        }
    }

    for col in &current.columns {
        match desired.column(&col.name) {
            None => {
                warnings.push(Warning::destructive(format!(
                    "column '{}.{}' will be dropped",
                    current.name, col.name
                )));
                td.dropped_columns.push(col.clone());
            }
            Some(new_col) if column_changed(col, new_col) => {
                push_column_warnings(&current.name, col, new_col, warnings);
                td.modified_columns.push(ColumnChange {
                    old: col.clone(),
                    new: new_col.clone(),
                });
            }
            Some(_) => {}
        }
    }

    let mut desired_indexes: Vec<&Index> = desired.indexes.iter().collect();
    desired_indexes.sort_by(|a, b| a.name.cmp(&b.name));
    for index in desired_indexes {
        match current.indexes.iter().find(|i| i.name == index.name) {
            Some(existing) if existing == index => {}
            // A changed index is a drop-and-recreate.
            Some(existing) => {
                td.dropped_indexes.push(existing.clone());
                td.added_indexes.push(index.clone());
            }
            None => td.added_indexes.push(index.clone()),
        }
    }
    let mut current_indexes: Vec<&Index> = current.indexes.iter().collect();
    current_indexes.sort_by(|a, b| a.name.cmp(&b.name));
    for index in current_indexes {
        if desired.indexes.iter().all(|i| i.name != index.name) {
            td.dropped_indexes.push(index.clone());
        }
    }

    let mut desired_constraints: Vec<&Constraint> = desired.constraints.iter().collect();
    desired_constraints.sort_by(|a, b| a.name.cmp(&b.name));
    for constraint in desired_constraints {
        match current.constraints.iter().find(|c| c.name == constraint.name) {
            Some(existing) if existing == constraint => {}
            Some(existing) => {
                td.dropped_constraints.push(existing.clone());
                td.added_constraints.push(constraint.clone());
            }
            None => td.added_constraints.push(constraint.clone()),
        }
    }
    let mut current_constraints: Vec<&Constraint> = current.constraints.iter().collect();
    current_constraints.sort_by(|a, b| a.name.cmp(&b.name));
    for constraint in current_constraints {
        if desired.constraints.iter().all(|c| c.name != constraint.name) {
            td.dropped_constraints.push(constraint.clone());
        }
    }

    td
}

/// A column is modified iff type, nullability, default, or primary-key
/// participation differs. All fields are already normalized at model
/// construction time.
fn column_changed(old: &Column, new: &Column) -> bool {
    old.sql_type != new.sql_type
        || old.nullable != new.nullable
        || old.default != new.default
        || old.primary_key != new.primary_key
}

fn push_column_warnings(table: &str, old: &Column, new: &Column, warnings: &mut Vec<Warning>) {
    if old.sql_type != new.sql_type && !typemap::is_safe_widening(&old.sql_type, &new.sql_type) {
        warnings.push(Warning::destructive(format!(
            "column '{}.{}' changes type {} -> {} outside the safe-widening set",
            table, old.name, old.sql_type, new.sql_type
        )));
    }
    if old.nullable && !new.nullable {
        // Emptiness is unknowable here; the command layer re-checks.
        warnings.push(Warning::null_tightening(
            table,
            format!(
                "column '{}.{}' tightens NULL -> NOT NULL; fails if the table holds NULLs",
                table, old.name
            ),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn schema_of(ddl: &str) -> Schema {
        parser::parse(ddl, "test").unwrap().0
    }

    #[test]
    fn test_diff_identity_is_empty() {
        let ddl = "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL);
                   CREATE INDEX users_email_idx ON users (email);";
        let a = schema_of(ddl);
        let b = schema_of(ddl);
        let d = diff(&a, &b);
        assert!(d.is_empty());
        assert!(d.warnings.is_empty());
    }

    #[test]
    fn test_added_table() {
        let current = schema_of("");
        let desired = schema_of("CREATE TABLE users (id INTEGER PRIMARY KEY);");
        let d = diff(&current, &desired);
        assert_eq!(d.added_tables.len(), 1);
        assert_eq!(d.added_tables[0].name, "users");
        assert!(d.warnings.is_empty());
    }

    #[test]
    fn test_dropped_table_warns_destructive() {
        let current = schema_of("CREATE TABLE legacy (id INT);");
        let desired = schema_of("");
        let d = diff(&current, &desired);
        assert_eq!(d.dropped_tables.len(), 1);
        assert_eq!(d.warnings.len(), 1);
        assert!(d.warnings[0].destructive);
        assert!(d.warnings[0].message.contains("legacy"));
    }

    #[test]
    fn test_added_nullable_column_no_warning() {
        let current = schema_of("CREATE TABLE users (id INT PRIMARY KEY, email TEXT);");
        let desired =
            schema_of("CREATE TABLE users (id INT PRIMARY KEY, email TEXT, created_at TIMESTAMP);");
        let d = diff(&current, &desired);
        assert_eq!(d.modified_tables.len(), 1);
        assert_eq!(d.modified_tables[0].added_columns.len(), 1);
        assert_eq!(d.modified_tables[0].added_columns[0].name, "created_at");
        assert!(d.warnings.is_empty());
    }

    #[test]
    fn test_dropped_column_warns_destructive() {
        let current = schema_of("CREATE TABLE users (id INT PRIMARY KEY, email TEXT, legacy TEXT);");
        let desired = schema_of("CREATE TABLE users (id INT PRIMARY KEY, email TEXT);");
        let d = diff(&current, &desired);
        assert_eq!(d.modified_tables[0].dropped_columns.len(), 1);
        assert!(d
            .warnings
            .iter()
            .any(|w| w.destructive && w.message.contains("users.legacy")));
    }

    #[test]
    fn test_type_widening_no_warning() {
        let current = schema_of("CREATE TABLE t (name VARCHAR(50));");
        let desired = schema_of("CREATE TABLE t (name VARCHAR(200));");
        let d = diff(&current, &desired);
        assert_eq!(d.modified_tables[0].modified_columns.len(), 1);
        assert!(d.warnings.is_empty());
    }

    #[test]
    fn test_type_narrowing_warns_destructive() {
        let current = schema_of("CREATE TABLE t (name VARCHAR(200));");
        let desired = schema_of("CREATE TABLE t (name VARCHAR(50));");
        let d = diff(&current, &desired);
        assert!(d.warnings.iter().any(|w| w.destructive));
    }

    #[test]
    fn test_not_null_tightening_warns() {
        let current = schema_of("CREATE TABLE t (email TEXT);");
        let desired = schema_of("CREATE TABLE t (email TEXT NOT NULL);");
        let d = diff(&current, &desired);
        assert_eq!(d.modified_tables[0].modified_columns.len(), 1);
        assert!(d.warnings.iter().any(|w| w.destructive && w.message.contains("NOT NULL")));
    }

    #[test]
    fn test_fk_to_non_unique_column_warns() {
        let current = schema_of("");
        let desired = schema_of(
            "CREATE TABLE users (id INT PRIMARY KEY, nickname TEXT);
             CREATE TABLE posts (id INT PRIMARY KEY, author TEXT REFERENCES users(nickname));",
        );
        let d = diff(&current, &desired);
        let w = d
            .warnings
            .iter()
            .find(|w| w.message.contains("uniqueness"))
            .expect("expected FK warning");
        assert!(!w.destructive);
        assert!(w.message.contains("users"));
    }

    #[test]
    fn test_fk_to_primary_key_no_warning() {
        let current = schema_of("");
        let desired = schema_of(
            "CREATE TABLE users (id INT PRIMARY KEY);
             CREATE TABLE posts (id INT PRIMARY KEY, user_id INT REFERENCES users(id));",
        );
        let d = diff(&current, &desired);
        assert!(d.warnings.is_empty());
    }

    #[test]
    fn test_index_change_is_drop_and_add() {
        let current = schema_of("CREATE TABLE t (a INT, b INT); CREATE INDEX t_idx ON t (a);");
        let desired = schema_of("CREATE TABLE t (a INT, b INT); CREATE INDEX t_idx ON t (a, b);");
        let d = diff(&current, &desired);
        let td = &d.modified_tables[0];
        assert_eq!(td.dropped_indexes.len(), 1);
        assert_eq!(td.added_indexes.len(), 1);
        assert_eq!(td.added_indexes[0].columns, vec!["a", "b"]);
    }

    #[test]
    fn test_determinism() {
        let current = schema_of("CREATE TABLE b (x INT); CREATE TABLE a (y VARCHAR(10));");
        let desired = schema_of("CREATE TABLE a (y VARCHAR(5)); CREATE TABLE c (z INT);");
        let d1 = diff(&current, &desired);
        let d2 = diff(&current, &desired);
        assert_eq!(serde_json::to_string(&d1).unwrap(), serde_json::to_string(&d2).unwrap());
    }

    #[test]
    fn test_modification_carries_old_and_new() {
        let current = schema_of("CREATE TABLE t (n SMALLINT);");
        let desired = schema_of("CREATE TABLE t (n BIGINT);");
        let d = diff(&current, &desired);
        let change = &d.modified_tables[0].modified_columns[0];
        assert_eq!(change.old.sql_type, "SMALLINT");
        assert_eq!(change.new.sql_type, "BIGINT");
    }
}
