//! SQL generator: turns a diff into an ordered DDL script.
//!
//! Statement ordering is the correctness contract here. Drops of dependent
//! objects come first, table drops respect foreign-key edges, new tables are
//! created without foreign keys, and all foreign keys are added in a final
//! pass. That last rule also makes mutually referencing new tables work
//! without any topological sort over the creation set.

use crate::diff::{ColumnChange, Diff};
use crate::schema::{Column, Constraint, ConstraintKind, Index, Table};
use crate::typemap::IDENTITY_DEFAULT;
use std::collections::HashSet;

/// Render a diff as an executable DDL script.
///
/// The output is deterministic: equal diffs produce byte-identical scripts.
pub fn generate(diff: &Diff) -> String {
    let mut statements: Vec<String> = Vec::new();
    let mut dropped_fks: HashSet<(String, String)> = HashSet::new();
    let mut dropped_index_names: HashSet<String> = HashSet::new();

    let dropped_table_names: HashSet<&str> =
        diff.dropped_tables.iter().map(|t| t.name.as_str()).collect();

    // 1. Drop foreign keys that reference tables or columns about to go.
    for td in &diff.modified_tables {
        let dropped_cols: HashSet<&str> =
            td.dropped_columns.iter().map(|c| c.name.as_str()).collect();
        for constraint in &td.dropped_constraints {
            if constraint.kind != ConstraintKind::ForeignKey {
                continue;
            }
            let references_doomed = constraint.reference.as_ref().is_some_and(|r| {
                dropped_table_names.contains(r.table.as_str())
            }) || constraint
                .columns
                .iter()
                .any(|c| dropped_cols.contains(c.as_str()));
            if references_doomed {
                statements.push(drop_constraint(&td.name, constraint));
                dropped_fks.insert((td.name.clone(), constraint.name.clone()));
            }
        }
    }

    // 2. Drop indexes on columns about to be dropped.
    for td in &diff.modified_tables {
        let dropped_cols: HashSet<&str> =
            td.dropped_columns.iter().map(|c| c.name.as_str()).collect();
        for index in &td.dropped_indexes {
            if index.columns.iter().any(|c| dropped_cols.contains(c.as_str())) {
                statements.push(format!("DROP INDEX {}", quote_ident(&index.name)));
                dropped_index_names.insert(index.name.clone());
            }
        }
    }

    // 3. Drop tables, referencing tables before their targets.
    for table in drop_order(&diff.dropped_tables) {
        statements.push(format!("DROP TABLE {}", quote_ident(&table.name)));
    }

    // 4. Create new tables, foreign keys deferred to step 6.
    for table in &diff.added_tables {
        statements.push(create_table(table));
        for index in sorted_indexes(&table.indexes) {
            statements.push(create_index(&table.name, index));
        }
    }

    // 5. Per modified table: add, alter, then drop.
    for td in &diff.modified_tables {
        for col in &td.added_columns {
            statements.push(format!(
                "ALTER TABLE {} ADD COLUMN {}",
                quote_ident(&td.name),
                column_def(col)
            ));
        }
        for change in &td.modified_columns {
            statements.extend(alter_column(&td.name, change));
        }
        for index in &td.added_indexes {
            statements.push(create_index(&td.name, index));
        }
        for constraint in &td.added_constraints {
            if constraint.kind != ConstraintKind::ForeignKey {
                statements.push(format!(
                    "ALTER TABLE {} ADD {}",
                    quote_ident(&td.name),
                    constraint_def(constraint)
                ));
            }
        }
        for constraint in &td.dropped_constraints {
            if dropped_fks.contains(&(td.name.clone(), constraint.name.clone())) {
                continue;
            }
            statements.push(drop_constraint(&td.name, constraint));
        }
        for index in &td.dropped_indexes {
            if dropped_index_names.contains(&index.name) {
                continue;
            }
            statements.push(format!("DROP INDEX {}", quote_ident(&index.name)));
        }
        for col in &td.dropped_columns {
            statements.push(format!(
                "ALTER TABLE {} DROP COLUMN {}",
                quote_ident(&td.name),
                quote_ident(&col.name)
            ));
        }
    }

    // 6. Add all new foreign keys now that every target exists.
    for table in &diff.added_tables {
        for constraint in sorted_constraints(&table.constraints) {
            if constraint.kind == ConstraintKind::ForeignKey {
                statements.push(format!(
                    "ALTER TABLE {} ADD {}",
                    quote_ident(&table.name),
                    constraint_def(constraint)
                ));
            }
        }
    }
    for td in &diff.modified_tables {
        for constraint in &td.added_constraints {
            if constraint.kind == ConstraintKind::ForeignKey {
                statements.push(format!(
                    "ALTER TABLE {} ADD {}",
                    quote_ident(&td.name),
                    constraint_def(constraint)
                ));
            }
        }
    }

    let mut out = String::new();
    out.push_str("-- pgmorph migration\n");
    out.push_str(&format!("-- {}\n", diff.summary()));
    for warning in &diff.warnings {
        out.push_str(&format!("-- warning: {}\n", warning.message));
    }
    for statement in statements {
        out.push_str(&statement);
        out.push_str(";\n");
    }
    out
}

/// Order dropped tables so that every referencing table drops before the
/// table it points at. Falls back to name order inside a cycle.
fn drop_order(dropped: &[Table]) -> Vec<&Table> {
    let names: HashSet<&str> = dropped.iter().map(|t| t.name.as_str()).collect();
    let mut remaining: Vec<&Table> = dropped.iter().collect();
    remaining.sort_by(|a, b| a.name.cmp(&b.name));
    let mut ordered = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        // A table is safe to drop when no other remaining table references it.
        let idx = remaining.iter().position(|candidate| {
            !remaining.iter().any(|other| {
                other.name != candidate.name
                    && other.foreign_keys().any(|fk| {
                        fk.reference
                            .as_ref()
                            .is_some_and(|r| r.table == candidate.name && names.contains(r.table.as_str()))
                    })
            })
        });
        let idx = idx.unwrap_or(0);
        ordered.push(remaining.remove(idx));
    }
    ordered
}

fn create_table(table: &Table) -> String {
    let mut items: Vec<String> = table.columns.iter().map(column_def).collect();
    for constraint in sorted_constraints(&table.constraints) {
        if constraint.kind != ConstraintKind::ForeignKey {
            items.push(constraint_def(constraint));
        }
    }
    format!(
        "CREATE TABLE {} (\n    {}\n)",
        quote_ident(&table.name),
        items.join(",\n    ")
    )
}

fn create_index(table: &str, index: &Index) -> String {
    let unique = if index.unique { "UNIQUE " } else { "" };
    let columns: Vec<String> = index.columns.iter().map(|c| quote_ident(c)).collect();
    format!(
        "CREATE {}INDEX {} ON {} ({})",
        unique,
        quote_ident(&index.name),
        quote_ident(table),
        columns.join(", ")
    )
}

fn column_def(col: &Column) -> String {
    let mut def = format!("{} {}", quote_ident(&col.name), render_type(col));
    if !col.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = &col.default {
        if default != IDENTITY_DEFAULT {
            def.push_str(&format!(" DEFAULT {}", default));
        }
    }
    def
}

/// Identity-backed columns render as their serial pseudo-type so the
/// database creates the sequence; everything else renders verbatim.
fn render_type(col: &Column) -> String {
    if col.default.as_deref() == Some(IDENTITY_DEFAULT) {
        match col.sql_type.as_str() {
            "SMALLINT" => return "SMALLSERIAL".to_string(),
            "INTEGER" => return "SERIAL".to_string(),
            "BIGINT" => return "BIGSERIAL".to_string(),
            _ => {}
        }
    }
    col.sql_type.clone()
}

fn constraint_def(constraint: &Constraint) -> String {
    let columns: Vec<String> = constraint.columns.iter().map(|c| quote_ident(c)).collect();
    let body = match constraint.kind {
        ConstraintKind::PrimaryKey => format!("PRIMARY KEY ({})", columns.join(", ")),
        ConstraintKind::Unique => format!("UNIQUE ({})", columns.join(", ")),
        ConstraintKind::Check => format!(
            "CHECK ({})",
            constraint.check_expr.as_deref().unwrap_or("")
        ),
        ConstraintKind::ForeignKey => {
            let r = constraint
                .reference
                .as_ref()
                .expect("foreign key constraint without reference");
            let ref_columns: Vec<String> = r.columns.iter().map(|c| quote_ident(c)).collect();
            let mut body = format!(
                "FOREIGN KEY ({}) REFERENCES {}",
                columns.join(", "),
                quote_ident(&r.table)
            );
            if !ref_columns.is_empty() {
                body.push_str(&format!(" ({})", ref_columns.join(", ")));
            }
            if let Some(action) = &r.on_delete {
                body.push_str(&format!(" ON DELETE {}", action));
            }
            if let Some(action) = &r.on_update {
                body.push_str(&format!(" ON UPDATE {}", action));
            }
            body
        }
    };
    format!("CONSTRAINT {} {}", quote_ident(&constraint.name), body)
}

fn drop_constraint(table: &str, constraint: &Constraint) -> String {
    format!(
        "ALTER TABLE {} DROP CONSTRAINT {}",
        quote_ident(table),
        quote_ident(&constraint.name)
    )
}

/// Type, then default, then nullability: each change is its own statement.
fn alter_column(table: &str, change: &ColumnChange) -> Vec<String> {
    let mut statements = Vec::new();
    let prefix = format!(
        "ALTER TABLE {} ALTER COLUMN {}",
        quote_ident(table),
        quote_ident(&change.new.name)
    );

    if change.old.sql_type != change.new.sql_type {
        statements.push(format!("{} TYPE {}", prefix, change.new.sql_type));
    }
    if change.old.default != change.new.default {
        match &change.new.default {
            Some(default) if default != IDENTITY_DEFAULT => {
                statements.push(format!("{} SET DEFAULT {}", prefix, default));
            }
            _ => statements.push(format!("{} DROP DEFAULT", prefix)),
        }
    }
    if change.old.nullable != change.new.nullable {
        if change.new.nullable {
            statements.push(format!("{} DROP NOT NULL", prefix));
        } else {
            statements.push(format!("{} SET NOT NULL", prefix));
        }
    }
    statements
}

fn sorted_indexes(indexes: &[Index]) -> Vec<&Index> {
    let mut out: Vec<&Index> = indexes.iter().collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

fn sorted_constraints(constraints: &[Constraint]) -> Vec<&Constraint> {
    let mut out: Vec<&Constraint> = constraints.iter().collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::parser;
    use crate::schema::Schema;

    fn schema_of(ddl: &str) -> Schema {
        parser::parse(ddl, "test").unwrap().0
    }

    fn generate_between(current: &str, desired: &str) -> String {
        generate(&diff(&schema_of(current), &schema_of(desired)))
    }

    #[test]
    fn test_empty_to_one_table() {
        let sql = generate_between(
            "",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL);",
        );
        assert!(sql.contains("CREATE TABLE \"users\""));
        assert!(sql.contains("\"id\" INTEGER NOT NULL"));
        assert!(sql.contains("\"email\" TEXT NOT NULL"));
        assert!(sql.contains("CONSTRAINT \"users_pkey\" PRIMARY KEY (\"id\")"));
        assert_eq!(sql.matches("CREATE TABLE").count(), 1);
        assert!(!sql.contains("-- warning"));
        assert!(sql.ends_with(";\n"));
    }

    #[test]
    fn test_add_nullable_column() {
        let sql = generate_between(
            "CREATE TABLE users (id INT PRIMARY KEY, email TEXT);",
            "CREATE TABLE users (id INT PRIMARY KEY, email TEXT, created_at TIMESTAMP);",
        );
        assert!(sql.contains("ALTER TABLE \"users\" ADD COLUMN \"created_at\" TIMESTAMP;"));
    }

    #[test]
    fn test_type_widening_alter() {
        let sql = generate_between(
            "CREATE TABLE t (name VARCHAR(50));",
            "CREATE TABLE t (name VARCHAR(200));",
        );
        assert!(sql.contains("ALTER TABLE \"t\" ALTER COLUMN \"name\" TYPE VARCHAR(200);"));
    }

    #[test]
    fn test_drop_column_after_index_drop() {
        let sql = generate_between(
            "CREATE TABLE t (a INT, legacy TEXT); CREATE INDEX t_legacy_idx ON t (legacy);",
            "CREATE TABLE t (a INT);",
        );
        let drop_idx = sql.find("DROP INDEX \"t_legacy_idx\"").expect("index drop");
        let drop_col = sql.find("DROP COLUMN \"legacy\"").expect("column drop");
        assert!(drop_idx < drop_col);
        assert_eq!(sql.matches("DROP INDEX").count(), 1);
    }

    #[test]
    fn test_new_tables_defer_foreign_keys() {
        let sql = generate_between(
            "",
            "CREATE TABLE users (id INT PRIMARY KEY);
             CREATE TABLE posts (id INT PRIMARY KEY, user_id INT REFERENCES users(id));",
        );
        let create_posts = sql.find("CREATE TABLE \"posts\"").unwrap();
        let create_users = sql.find("CREATE TABLE \"users\"").unwrap();
        let add_fk = sql.find("ADD CONSTRAINT \"posts_user_id_fkey\" FOREIGN KEY").unwrap();
        assert!(add_fk > create_posts && add_fk > create_users);
        // The create statements themselves carry no FK clause.
        let posts_stmt = &sql[create_posts..sql[create_posts..].find(';').unwrap() + create_posts];
        assert!(!posts_stmt.contains("FOREIGN KEY"));
    }

    #[test]
    fn test_mutual_foreign_keys_do_not_deadlock_creation() {
        let sql = generate_between(
            "",
            "CREATE TABLE a (id INT PRIMARY KEY, b_id INT REFERENCES b(id));
             CREATE TABLE b (id INT PRIMARY KEY, a_id INT REFERENCES a(id));",
        );
        let last_create = sql.rfind("CREATE TABLE").unwrap();
        let first_fk = sql.find("FOREIGN KEY").unwrap();
        assert!(first_fk > last_create);
        assert_eq!(sql.matches("FOREIGN KEY").count(), 2);
    }

    #[test]
    fn test_dropped_tables_respect_fk_order() {
        let sql = generate_between(
            "CREATE TABLE users (id INT PRIMARY KEY);
             CREATE TABLE posts (id INT PRIMARY KEY, user_id INT REFERENCES users(id));",
            "",
        );
        let drop_posts = sql.find("DROP TABLE \"posts\"").unwrap();
        let drop_users = sql.find("DROP TABLE \"users\"").unwrap();
        assert!(drop_posts < drop_users);
    }

    #[test]
    fn test_fk_to_dropped_table_dropped_first() {
        let sql = generate_between(
            "CREATE TABLE users (id INT PRIMARY KEY);
             CREATE TABLE posts (id INT PRIMARY KEY, user_id INT REFERENCES users(id));",
            "CREATE TABLE posts (id INT PRIMARY KEY, user_id INT);",
        );
        let drop_fk = sql
            .find("ALTER TABLE \"posts\" DROP CONSTRAINT \"posts_user_id_fkey\"")
            .expect("fk drop");
        let drop_users = sql.find("DROP TABLE \"users\"").unwrap();
        assert!(drop_fk < drop_users);
    }

    #[test]
    fn test_serial_renders_as_serial() {
        let sql = generate_between("", "CREATE TABLE t (id SERIAL PRIMARY KEY);");
        assert!(sql.contains("\"id\" SERIAL NOT NULL"));
        assert!(!sql.contains("DEFAULT nextval"));
    }

    #[test]
    fn test_default_change_statements() {
        let sql = generate_between(
            "CREATE TABLE t (status TEXT DEFAULT 'a', x INT DEFAULT 1);",
            "CREATE TABLE t (status TEXT DEFAULT 'b', x INT);",
        );
        assert!(sql.contains("ALTER TABLE \"t\" ALTER COLUMN \"status\" SET DEFAULT 'b';"));
        assert!(sql.contains("ALTER TABLE \"t\" ALTER COLUMN \"x\" DROP DEFAULT;"));
    }

    #[test]
    fn test_not_null_change_statements() {
        let sql = generate_between(
            "CREATE TABLE t (a TEXT, b TEXT NOT NULL);",
            "CREATE TABLE t (a TEXT NOT NULL, b TEXT);",
        );
        assert!(sql.contains("ALTER TABLE \"t\" ALTER COLUMN \"a\" SET NOT NULL;"));
        assert!(sql.contains("ALTER TABLE \"t\" ALTER COLUMN \"b\" DROP NOT NULL;"));
    }

    #[test]
    fn test_header_carries_summary_and_warnings() {
        let sql = generate_between("CREATE TABLE legacy (id INT);", "");
        assert!(sql.starts_with("-- pgmorph migration\n"));
        assert!(sql.contains("-- tables: 0 added, 1 dropped, 0 modified"));
        assert!(sql.contains("-- warning: table 'legacy' will be dropped"));
    }

    #[test]
    fn test_determinism_byte_identical() {
        let current = "CREATE TABLE b (x INT); CREATE TABLE a (y VARCHAR(10));";
        let desired = "CREATE TABLE a (y VARCHAR(20)); CREATE TABLE c (z INT REFERENCES a(y));";
        let one = generate_between(current, desired);
        let two = generate_between(current, desired);
        assert_eq!(one, two);
    }

    #[test]
    fn test_generated_script_reparses_to_desired_model() {
        let desired_ddl = "CREATE TABLE users (
            id SERIAL PRIMARY KEY,
            email VARCHAR(255) NOT NULL,
            created_at TIMESTAMP DEFAULT now()
        );
        CREATE UNIQUE INDEX users_email_idx ON users (email);";
        let desired = schema_of(desired_ddl);
        let sql = generate(&diff(&schema_of(""), &desired));
        let reparsed = schema_of(&sql);
        assert_eq!(reparsed, desired);
    }

    #[test]
    fn test_round_trip_preserves_foreign_keys() {
        let desired = schema_of(
            "CREATE TABLE users (id INT PRIMARY KEY);
             CREATE TABLE posts (
                 id INT PRIMARY KEY,
                 user_id INT REFERENCES users(id) ON DELETE CASCADE
             );",
        );
        let sql = generate(&diff(&schema_of(""), &desired));
        let reparsed = schema_of(&sql);
        assert_eq!(reparsed, desired);
    }
}
