//! Canonical in-memory representation of a database schema.
//!
//! Both the DDL parser and the catalog introspector produce this model, so
//! every field is stored in its normalized form (see [`crate::typemap`]).
//! Equality is structural: table order and the capture timestamp are
//! irrelevant, which lets a parsed schema be compared directly against an
//! introspected one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A full schema snapshot: the unit the differ operates on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    /// Tables, in whatever order the producer emitted them.
    pub tables: Vec<Table>,

    /// Free-form tag describing where this snapshot came from
    /// (a file path for parsed schemas, an environment name for
    /// introspected ones).
    pub version_tag: String,

    /// When the snapshot was taken.
    pub captured_at: DateTime<Utc>,
}

impl Schema {
    /// Create an empty schema with the given tag.
    pub fn empty(version_tag: impl Into<String>) -> Self {
        Self {
            tables: Vec::new(),
            version_tag: version_tag.into(),
            captured_at: Utc::now(),
        }
    }

    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Tables sorted by name ascending, the deterministic emission order.
    pub fn sorted_tables(&self) -> Vec<&Table> {
        let mut tables: Vec<&Table> = self.tables.iter().collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        tables
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        // Table order and capture metadata do not participate in equality.
        let mine = self.sorted_tables();
        let theirs = other.sorted_tables();
        mine.len() == theirs.len() && mine.iter().zip(theirs.iter()).all(|(a, b)| a == b)
    }
}

impl Eq for Schema {}

/// A single table: ordered columns plus index and constraint sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    /// Table name, unique within the schema.
    pub name: String,

    /// Column definitions in declaration order.
    pub columns: Vec<Column>,

    /// Non-primary indexes. Primary-key backing indexes are expressed
    /// through the primary-key constraint instead.
    pub indexes: Vec<Index>,

    /// Table constraints, including the primary key.
    pub constraints: Vec<Constraint>,
}

impl Table {
    /// Create a table with no columns, indexes, or constraints.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Names of the primary-key columns, in key order.
    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.constraints
            .iter()
            .find(|c| c.kind == ConstraintKind::PrimaryKey)
            .map(|c| c.columns.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Foreign-key constraints on this table.
    pub fn foreign_keys(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints
            .iter()
            .filter(|c| c.kind == ConstraintKind::ForeignKey)
    }

    /// Whether `columns` is covered by a uniqueness guarantee: the primary
    /// key, a unique constraint, or a unique index over exactly those
    /// columns. Used by the differ to vet foreign-key targets.
    pub fn has_unique_coverage(&self, columns: &[String]) -> bool {
        let pk = self.primary_key_columns();
        if !pk.is_empty()
            && pk.len() == columns.len()
            && pk.iter().zip(columns.iter()).all(|(a, b)| *a == b.as_str())
        {
            return true;
        }
        let by_constraint = self
            .constraints
            .iter()
            .any(|c| c.kind == ConstraintKind::Unique && c.columns == columns);
        let by_index = self
            .indexes
            .iter()
            .any(|i| i.unique && i.columns == columns);
        by_constraint || by_index
    }

    fn sorted_indexes(&self) -> Vec<&Index> {
        let mut indexes: Vec<&Index> = self.indexes.iter().collect();
        indexes.sort_by(|a, b| a.name.cmp(&b.name));
        indexes
    }

    fn sorted_constraints(&self) -> Vec<&Constraint> {
        let mut constraints: Vec<&Constraint> = self.constraints.iter().collect();
        constraints.sort_by(|a, b| a.name.cmp(&b.name));
        constraints
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        // Columns compare in declaration order; indexes and constraints are
        // sets and compare by name.
        self.name == other.name
            && self.columns == other.columns
            && self.sorted_indexes() == other.sorted_indexes()
            && self.sorted_constraints() == other.sorted_constraints()
    }
}

impl Eq for Table {}

/// A column definition, fully normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name, unique within the table.
    pub name: String,

    /// Normalized uppercase SQL type, parameters preserved verbatim
    /// (`VARCHAR(255)`, `NUMERIC(10,2)`).
    pub sql_type: String,

    /// Whether the column allows NULL.
    pub nullable: bool,

    /// Whether the column participates in the primary key.
    pub primary_key: bool,

    /// Normalized default expression, if any. Identity and serial columns
    /// carry the canonical marker `nextval()`.
    pub default: Option<String>,
}

/// A non-primary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Index name.
    pub name: String,

    /// Indexed column names, in key order.
    pub columns: Vec<String>,

    /// Whether the index is unique.
    pub unique: bool,
}

/// Constraint kinds supported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey,
    ForeignKey,
    Unique,
    Check,
}

/// A table constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    /// Constraint name.
    pub name: String,

    /// Constraint kind.
    pub kind: ConstraintKind,

    /// Participating column names. Empty for table-level check constraints.
    pub columns: Vec<String>,

    /// Check expression, for `Check` constraints.
    pub check_expr: Option<String>,

    /// Reference target, for `ForeignKey` constraints.
    pub reference: Option<ForeignKeyRef>,
}

/// The target side of a foreign-key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    /// Referenced table name.
    pub table: String,

    /// Referenced column names.
    pub columns: Vec<String>,

    /// ON DELETE action, when one was supplied (`CASCADE`, `SET NULL`, ...).
    pub on_delete: Option<String>,

    /// ON UPDATE action, when one was supplied.
    pub on_update: Option<String>,
}
