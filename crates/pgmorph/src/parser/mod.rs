//! DDL parser: turns an authored schema file into the canonical model.
//!
//! The parser understands the declarative subset of PostgreSQL DDL:
//! `CREATE TABLE` (with inline and table-level constraints) and
//! `CREATE [UNIQUE] INDEX`. It is deliberately forgiving: statements it
//! does not recognize are skipped with a warning rather than rejected,
//! since its job is to understand the authored schema file, not to
//! validate arbitrary SQL.
//!
//! Each recognizer is keyed by the statement's leading keyword sequence, so
//! extending the grammar means adding a recognizer, not growing a monolith.

pub mod splitter;

pub use splitter::{split_statements, split_top_level_commas, RawStatement};

use crate::error::{MorphError, Result};
use crate::schema::{Column, Constraint, ConstraintKind, ForeignKeyRef, Index, Schema, Table};
use crate::typemap;
use chrono::Utc;

/// Keywords that begin a table-level constraint item inside a
/// `CREATE TABLE` body.
const CONSTRAINT_KEYWORDS: &[&str] = &["PRIMARY", "FOREIGN", "UNIQUE", "CHECK", "CONSTRAINT"];

/// Keywords that terminate a column's type token sequence.
const COLUMN_MODIFIER_KEYWORDS: &[&str] = &[
    "NOT",
    "NULL",
    "PRIMARY",
    "UNIQUE",
    "DEFAULT",
    "REFERENCES",
    "CHECK",
    "CONSTRAINT",
];

/// Parse a DDL text into a schema model plus a warnings stream.
///
/// `version_tag` labels the resulting snapshot (normally the file path).
pub fn parse(input: &str, version_tag: &str) -> Result<(Schema, Vec<String>)> {
    let statements = split_statements(input);
    let mut tables: Vec<Table> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();
    let mut loose_indexes: Vec<(String, Index)> = Vec::new();
    let mut loose_constraints: Vec<(String, Constraint)> = Vec::new();

    for (idx, stmt) in statements.iter().enumerate() {
        let tokens = tokenize(&stmt.text);
        if is_kw(&tokens, 0, "CREATE") && is_kw(&tokens, 1, "TABLE") {
            let table = parse_create_table(stmt, idx, &tokens, &mut warnings)?;
            if tables.iter().any(|t| t.name == table.name) {
                return Err(MorphError::parse(
                    idx,
                    stmt.offset,
                    format!("duplicate table definition '{}'", table.name),
                ));
            }
            tables.push(table);
        } else if is_kw(&tokens, 0, "CREATE")
            && (is_kw(&tokens, 1, "INDEX")
                || (is_kw(&tokens, 1, "UNIQUE") && is_kw(&tokens, 2, "INDEX")))
        {
            let (table_name, index) = parse_create_index(stmt, idx, &tokens)?;
            loose_indexes.push((table_name, index));
        } else if is_kw(&tokens, 0, "ALTER")
            && is_kw(&tokens, 1, "TABLE")
            && is_kw(&tokens, 3, "ADD")
            && tokens.get(4).is_some_and(|t| {
                CONSTRAINT_KEYWORDS
                    .iter()
                    .any(|kw| t.text.eq_ignore_ascii_case(kw))
            })
        {
            // ALTER TABLE <t> ADD <constraint>: the form the generator uses
            // for foreign keys, so authored files may use it too.
            let table_name = unquote_ident(&tokens[2].text);
            let constraint =
                parse_table_constraint(stmt, idx, &table_name, &stmt.text, &tokens[4..])?;
            loose_constraints.push((table_name, constraint));
        } else {
            let head: Vec<&str> = tokens.iter().take(3).map(|t| t.text.as_str()).collect();
            warnings.push(format!(
                "unsupported statement skipped: {} ...",
                head.join(" ")
            ));
        }
    }

    // Second pass: attach standalone indexes to their tables.
    for (table_name, index) in loose_indexes {
        match tables.iter_mut().find(|t| t.name == table_name) {
            Some(table) => {
                if table.indexes.iter().any(|i| i.name == index.name) {
                    warnings.push(format!(
                        "duplicate index '{}' on table '{}' ignored",
                        index.name, table_name
                    ));
                } else {
                    table.indexes.push(index);
                }
            }
            None => warnings.push(format!(
                "index '{}' targets undefined table '{}' and was dropped",
                index.name, table_name
            )),
        }
    }

    // Attach ALTER TABLE ... ADD constraints the same way.
    for (table_name, constraint) in loose_constraints {
        match tables.iter_mut().find(|t| t.name == table_name) {
            Some(table) => {
                if constraint.kind == ConstraintKind::PrimaryKey {
                    for col_name in &constraint.columns {
                        if let Some(col) = table.columns.iter_mut().find(|c| &c.name == col_name) {
                            col.primary_key = true;
                            col.nullable = false;
                        }
                    }
                }
                table.constraints.push(constraint);
            }
            None => warnings.push(format!(
                "constraint '{}' targets undefined table '{}' and was dropped",
                constraint.name, table_name
            )),
        }
    }

    let schema = Schema {
        tables,
        version_tag: version_tag.to_string(),
        captured_at: Utc::now(),
    };
    Ok((schema, warnings))
}

fn parse_create_table(
    stmt: &RawStatement,
    stmt_idx: usize,
    tokens: &[Token],
    warnings: &mut Vec<String>,
) -> Result<Table> {
    // CREATE TABLE [IF NOT EXISTS] <name> ( <body> )
    let mut pos = 2;
    if is_kw(tokens, pos, "IF") && is_kw(tokens, pos + 1, "NOT") && is_kw(tokens, pos + 2, "EXISTS")
    {
        pos += 3;
    }

    let name_token = tokens
        .get(pos)
        .filter(|t| !t.is_group)
        .ok_or_else(|| MorphError::parse(stmt_idx, stmt.offset, "missing table name"))?;
    let table_name = unquote_ident(&name_token.text);
    pos += 1;

    let body_token = tokens
        .get(pos)
        .filter(|t| t.is_group)
        .ok_or_else(|| {
            MorphError::parse(
                stmt_idx,
                stmt.offset,
                format!("table '{}' has no parenthesized body", table_name),
            )
        })?;
    let body = inner(&body_token.text);

    let mut table = Table::new(table_name.clone());
    let mut inline_pk: Vec<String> = Vec::new();
    let mut explicit_pk: Option<Constraint> = None;

    for item in split_top_level_commas(body) {
        let item_tokens = tokenize(&item);
        let Some(first) = item_tokens.first() else {
            continue;
        };

        if CONSTRAINT_KEYWORDS
            .iter()
            .any(|kw| first.text.eq_ignore_ascii_case(kw))
        {
            let constraint =
                parse_table_constraint(stmt, stmt_idx, &table_name, &item, &item_tokens)?;
            if constraint.kind == ConstraintKind::PrimaryKey {
                explicit_pk = Some(constraint);
            } else {
                table.constraints.push(constraint);
            }
        } else {
            let (column, extras, is_pk) =
                parse_column_item(stmt, stmt_idx, &table_name, &item, &item_tokens)?;
            if table.columns.iter().any(|c| c.name == column.name) {
                return Err(MorphError::parse(
                    stmt_idx,
                    stmt.offset,
                    format!("duplicate column '{}' in table '{}'", column.name, table_name),
                ));
            }
            if is_pk {
                inline_pk.push(column.name.clone());
            }
            table.columns.push(column);
            table.constraints.extend(extras);
        }
    }

    // Resolve the primary key: an explicit table constraint wins over
    // inline flags.
    let pk = match explicit_pk {
        Some(c) => Some(c),
        None if !inline_pk.is_empty() => Some(Constraint {
            name: format!("{}_pkey", table_name),
            kind: ConstraintKind::PrimaryKey,
            columns: inline_pk,
            check_expr: None,
            reference: None,
        }),
        None => None,
    };
    if let Some(pk) = pk {
        for col_name in &pk.columns {
            match table.columns.iter_mut().find(|c| &c.name == col_name) {
                Some(col) => {
                    col.primary_key = true;
                    col.nullable = false;
                }
                None => warnings.push(format!(
                    "primary key of '{}' names unknown column '{}'",
                    table_name, col_name
                )),
            }
        }
        table.constraints.push(pk);
    }

    Ok(table)
}

/// Parse one column item; returns the column, any constraints implied by
/// inline modifiers, and whether the column was flagged `PRIMARY KEY`.
fn parse_column_item(
    stmt: &RawStatement,
    stmt_idx: usize,
    table_name: &str,
    item: &str,
    tokens: &[Token],
) -> Result<(Column, Vec<Constraint>, bool)> {
    let col_name = unquote_ident(&tokens[0].text);

    // The type runs from the second token up to the first modifier keyword.
    let mut type_end = 1;
    while type_end < tokens.len() {
        let t = &tokens[type_end];
        if !t.is_group
            && COLUMN_MODIFIER_KEYWORDS
                .iter()
                .any(|kw| t.text.eq_ignore_ascii_case(kw))
        {
            break;
        }
        type_end += 1;
    }
    if type_end == 1 {
        return Err(MorphError::parse(
            stmt_idx,
            stmt.offset,
            format!("column '{}' has no type", col_name),
        ));
    }
    let raw_type = item[tokens[1].start..tokens[type_end - 1].end].trim();
    let serial = typemap::is_serial(&tokens[1].text);

    let mut column = Column {
        name: col_name.clone(),
        sql_type: typemap::normalize_type(raw_type),
        nullable: !serial,
        primary_key: false,
        default: serial.then(|| typemap::IDENTITY_DEFAULT.to_string()),
    };
    let mut extras: Vec<Constraint> = Vec::new();
    let mut is_pk = false;

    let mut pos = type_end;
    while pos < tokens.len() {
        let t = &tokens[pos];
        if t.is_group {
            pos += 1;
            continue;
        }
        if t.text.eq_ignore_ascii_case("NOT") && is_kw(tokens, pos + 1, "NULL") {
            column.nullable = false;
            pos += 2;
        } else if t.text.eq_ignore_ascii_case("NULL") {
            column.nullable = true;
            pos += 1;
        } else if t.text.eq_ignore_ascii_case("PRIMARY") {
            is_pk = true;
            pos += if is_kw(tokens, pos + 1, "KEY") { 2 } else { 1 };
        } else if t.text.eq_ignore_ascii_case("UNIQUE") {
            extras.push(Constraint {
                name: format!("{}_{}_key", table_name, col_name),
                kind: ConstraintKind::Unique,
                columns: vec![col_name.clone()],
                check_expr: None,
                reference: None,
            });
            pos += 1;
        } else if t.text.eq_ignore_ascii_case("DEFAULT") {
            let expr_start = pos + 1;
            let mut expr_end = expr_start + 1; // at least one token
            while expr_end < tokens.len() {
                let t = &tokens[expr_end];
                if !t.is_group
                    && ["NOT", "PRIMARY", "UNIQUE", "REFERENCES", "CHECK", "CONSTRAINT"]
                        .iter()
                        .any(|kw| t.text.eq_ignore_ascii_case(kw))
                {
                    break;
                }
                expr_end += 1;
            }
            if expr_start >= tokens.len() {
                return Err(MorphError::parse(
                    stmt_idx,
                    stmt.offset,
                    format!("column '{}' has DEFAULT with no expression", col_name),
                ));
            }
            let raw = item[tokens[expr_start].start..tokens[expr_end - 1].end].trim();
            column.default = Some(typemap::normalize_default(raw));
            pos = expr_end;
        } else if t.text.eq_ignore_ascii_case("REFERENCES") {
            let (constraint, next) =
                parse_inline_reference(stmt, stmt_idx, table_name, &col_name, tokens, pos + 1)?;
            extras.push(constraint);
            pos = next;
        } else if t.text.eq_ignore_ascii_case("CHECK") {
            let group = tokens.get(pos + 1).filter(|t| t.is_group).ok_or_else(|| {
                MorphError::parse(
                    stmt_idx,
                    stmt.offset,
                    format!("CHECK on column '{}' has no expression", col_name),
                )
            })?;
            // Check constraints compare by expression only; see the differ.
            extras.push(Constraint {
                name: format!("{}_{}_check", table_name, col_name),
                kind: ConstraintKind::Check,
                columns: Vec::new(),
                check_expr: Some(typemap::normalize_check_expr(inner(&group.text))),
                reference: None,
            });
            pos += 2;
        } else {
            // Unknown modifier (COLLATE, GENERATED, ...): skip forgivingly.
            pos += 1;
        }
    }

    Ok((column, extras, is_pk))
}

/// Parse `REFERENCES <table> [(<cols>)] [ON DELETE <action>] [ON UPDATE
/// <action>]` starting at `pos`; returns the constraint and the index of
/// the first unconsumed token.
fn parse_inline_reference(
    stmt: &RawStatement,
    stmt_idx: usize,
    table_name: &str,
    col_name: &str,
    tokens: &[Token],
    pos: usize,
) -> Result<(Constraint, usize)> {
    let target = tokens.get(pos).filter(|t| !t.is_group).ok_or_else(|| {
        MorphError::parse(
            stmt_idx,
            stmt.offset,
            format!("REFERENCES on column '{}' has no target table", col_name),
        )
    })?;
    let mut next = pos + 1;

    let ref_columns = match tokens.get(next) {
        Some(t) if t.is_group => {
            next += 1;
            split_top_level_commas(inner(&t.text))
                .iter()
                .map(|c| unquote_ident(c))
                .collect()
        }
        _ => Vec::new(),
    };

    let mut reference = ForeignKeyRef {
        table: unquote_ident(&target.text),
        columns: ref_columns,
        on_delete: None,
        on_update: None,
    };
    next = parse_referential_actions(tokens, next, &mut reference);

    Ok((
        Constraint {
            name: format!("{}_{}_fkey", table_name, col_name),
            kind: ConstraintKind::ForeignKey,
            columns: vec![col_name.to_string()],
            check_expr: None,
            reference: Some(reference),
        },
        next,
    ))
}

/// Consume any `ON DELETE ...` / `ON UPDATE ...` clauses at `pos`.
fn parse_referential_actions(tokens: &[Token], mut pos: usize, fk: &mut ForeignKeyRef) -> usize {
    while is_kw(tokens, pos, "ON") {
        let is_delete = is_kw(tokens, pos + 1, "DELETE");
        let is_update = is_kw(tokens, pos + 1, "UPDATE");
        if !is_delete && !is_update {
            break;
        }
        let (action, consumed) = match tokens.get(pos + 2) {
            Some(t) if t.text.eq_ignore_ascii_case("CASCADE") => ("CASCADE".to_string(), 1),
            Some(t) if t.text.eq_ignore_ascii_case("RESTRICT") => ("RESTRICT".to_string(), 1),
            Some(t) if t.text.eq_ignore_ascii_case("SET") => {
                let word = tokens
                    .get(pos + 3)
                    .map(|t| t.text.to_uppercase())
                    .unwrap_or_default();
                (format!("SET {}", word), 2)
            }
            Some(t) if t.text.eq_ignore_ascii_case("NO") => ("NO ACTION".to_string(), 2),
            _ => break,
        };
        // NO ACTION is the default; folding it to absence keeps parsed and
        // introspected models comparable.
        let action = (action != "NO ACTION").then_some(action);
        if is_delete {
            fk.on_delete = action;
        } else if is_update {
            fk.on_update = action;
        }
        pos += 2 + consumed;
    }
    pos
}

fn parse_table_constraint(
    stmt: &RawStatement,
    stmt_idx: usize,
    table_name: &str,
    _item: &str,
    tokens: &[Token],
) -> Result<Constraint> {
    let mut pos = 0;
    let mut name: Option<String> = None;

    if is_kw(tokens, pos, "CONSTRAINT") {
        let name_token = tokens.get(pos + 1).ok_or_else(|| {
            MorphError::parse(stmt_idx, stmt.offset, "CONSTRAINT with no name")
        })?;
        name = Some(unquote_ident(&name_token.text));
        pos += 2;
    }

    let group_columns = |pos: usize| -> Result<(Vec<String>, usize)> {
        let group = tokens.get(pos).filter(|t| t.is_group).ok_or_else(|| {
            MorphError::parse(stmt_idx, stmt.offset, "constraint has no column list")
        })?;
        let cols = split_top_level_commas(inner(&group.text))
            .iter()
            .map(|c| unquote_ident(c))
            .collect();
        Ok((cols, pos + 1))
    };

    if is_kw(tokens, pos, "PRIMARY") {
        let skip = if is_kw(tokens, pos + 1, "KEY") { 2 } else { 1 };
        let (columns, _) = group_columns(pos + skip)?;
        return Ok(Constraint {
            name: name.unwrap_or_else(|| format!("{}_pkey", table_name)),
            kind: ConstraintKind::PrimaryKey,
            columns,
            check_expr: None,
            reference: None,
        });
    }

    if is_kw(tokens, pos, "UNIQUE") {
        let (columns, _) = group_columns(pos + 1)?;
        return Ok(Constraint {
            name: name.unwrap_or_else(|| format!("{}_{}_key", table_name, columns.join("_"))),
            kind: ConstraintKind::Unique,
            columns,
            check_expr: None,
            reference: None,
        });
    }

    if is_kw(tokens, pos, "CHECK") {
        let group = tokens.get(pos + 1).filter(|t| t.is_group).ok_or_else(|| {
            MorphError::parse(stmt_idx, stmt.offset, "CHECK constraint has no expression")
        })?;
        return Ok(Constraint {
            name: name.unwrap_or_else(|| format!("{}_check", table_name)),
            kind: ConstraintKind::Check,
            columns: Vec::new(),
            check_expr: Some(typemap::normalize_check_expr(inner(&group.text))),
            reference: None,
        });
    }

    if is_kw(tokens, pos, "FOREIGN") {
        let skip = if is_kw(tokens, pos + 1, "KEY") { 2 } else { 1 };
        let (columns, after_cols) = group_columns(pos + skip)?;
        if !is_kw(tokens, after_cols, "REFERENCES") {
            return Err(MorphError::parse(
                stmt_idx,
                stmt.offset,
                "FOREIGN KEY without REFERENCES clause",
            ));
        }
        let target = tokens.get(after_cols + 1).filter(|t| !t.is_group).ok_or_else(|| {
            MorphError::parse(stmt_idx, stmt.offset, "REFERENCES has no target table")
        })?;
        let mut next = after_cols + 2;
        let ref_columns = match tokens.get(next) {
            Some(t) if t.is_group => {
                next += 1;
                split_top_level_commas(inner(&t.text))
                    .iter()
                    .map(|c| unquote_ident(c))
                    .collect()
            }
            _ => Vec::new(),
        };
        let mut reference = ForeignKeyRef {
            table: unquote_ident(&target.text),
            columns: ref_columns,
            on_delete: None,
            on_update: None,
        };
        parse_referential_actions(tokens, next, &mut reference);
        let first_col = columns.first().cloned().unwrap_or_default();
        return Ok(Constraint {
            name: name.unwrap_or_else(|| format!("{}_{}_fkey", table_name, first_col)),
            kind: ConstraintKind::ForeignKey,
            columns,
            check_expr: None,
            reference: Some(reference),
        });
    }

    Err(MorphError::parse(
        stmt_idx,
        stmt.offset,
        format!(
            "unrecognized constraint item starting with '{}'",
            tokens.get(pos).map(|t| t.text.as_str()).unwrap_or("")
        ),
    ))
}

fn parse_create_index(
    stmt: &RawStatement,
    stmt_idx: usize,
    tokens: &[Token],
) -> Result<(String, Index)> {
    // CREATE [UNIQUE] INDEX [IF NOT EXISTS] <name> ON <table> [USING m] (cols)
    let unique = is_kw(tokens, 1, "UNIQUE");
    let mut pos = if unique { 3 } else { 2 };

    if is_kw(tokens, pos, "IF") && is_kw(tokens, pos + 1, "NOT") && is_kw(tokens, pos + 2, "EXISTS")
    {
        pos += 3;
    }

    let name_token = tokens
        .get(pos)
        .filter(|t| !t.is_group)
        .ok_or_else(|| MorphError::parse(stmt_idx, stmt.offset, "index has no name"))?;
    pos += 1;

    if !is_kw(tokens, pos, "ON") {
        return Err(MorphError::parse(
            stmt_idx,
            stmt.offset,
            "CREATE INDEX without ON clause",
        ));
    }
    pos += 1;

    let table_token = tokens
        .get(pos)
        .filter(|t| !t.is_group)
        .ok_or_else(|| MorphError::parse(stmt_idx, stmt.offset, "CREATE INDEX has no table"))?;
    pos += 1;

    if is_kw(tokens, pos, "USING") {
        pos += 2;
    }

    let group = tokens.get(pos).filter(|t| t.is_group).ok_or_else(|| {
        MorphError::parse(stmt_idx, stmt.offset, "CREATE INDEX has no column list")
    })?;
    let columns = split_top_level_commas(inner(&group.text))
        .iter()
        .map(|c| unquote_ident(c))
        .collect();

    Ok((
        unquote_ident(&table_token.text),
        Index {
            name: unquote_ident(&name_token.text),
            columns,
            unique,
        },
    ))
}

// === Tokenizer ===

/// One lexical token with its byte span in the source item.
#[derive(Debug, Clone)]
struct Token {
    text: String,
    start: usize,
    end: usize,
    /// True for a balanced `( ... )` group captured as a single token.
    is_group: bool,
}

fn tokenize(s: &str) -> Vec<Token> {
    let chars: Vec<(usize, char)> = s.char_indices().collect();
    let end_of = |i: usize| chars.get(i).map(|(p, _)| *p).unwrap_or(s.len());
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, ch) = chars[i];

        if ch.is_whitespace() || ch == ',' {
            i += 1;
            continue;
        }

        // Quoted identifier or string literal: one token, quotes kept.
        if ch == '"' || ch == '\'' {
            let quote = ch;
            let start = pos;
            let mut text = String::new();
            text.push(ch);
            i += 1;
            while i < chars.len() {
                let c = chars[i].1;
                text.push(c);
                i += 1;
                if c == quote {
                    if matches!(chars.get(i), Some((_, n)) if *n == quote) {
                        text.push(quote);
                        i += 1;
                        continue;
                    }
                    break;
                }
            }
            tokens.push(Token {
                text,
                start,
                end: end_of(i),
                is_group: false,
            });
            continue;
        }

        // Balanced parenthesis group: one token including the parens.
        if ch == '(' {
            let start = pos;
            let mut text = String::new();
            let mut depth = 0;
            while i < chars.len() {
                let c = chars[i].1;
                text.push(c);
                i += 1;
                match c {
                    '\'' | '"' => {
                        let quote = c;
                        while i < chars.len() {
                            let q = chars[i].1;
                            text.push(q);
                            i += 1;
                            if q == quote {
                                break;
                            }
                        }
                    }
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
            }
            tokens.push(Token {
                text,
                start,
                end: end_of(i),
                is_group: true,
            });
            continue;
        }

        // Word: identifier, keyword, number, or qualified name.
        if ch.is_alphanumeric() || ch == '_' || ch == '$' {
            let start = pos;
            let mut text = String::new();
            while i < chars.len() {
                let c = chars[i].1;
                if c.is_alphanumeric() || c == '_' || c == '$' || c == '.' {
                    text.push(c);
                    i += 1;
                } else {
                    break;
                }
            }
            tokens.push(Token {
                text,
                start,
                end: end_of(i),
                is_group: false,
            });
            continue;
        }

        // Any other punctuation is a single-character token.
        tokens.push(Token {
            text: ch.to_string(),
            start: pos,
            end: end_of(i + 1),
            is_group: false,
        });
        i += 1;
    }

    tokens
}

fn is_kw(tokens: &[Token], pos: usize, kw: &str) -> bool {
    tokens
        .get(pos)
        .map(|t| !t.is_group && t.text.eq_ignore_ascii_case(kw))
        .unwrap_or(false)
}

/// Strip the outer parentheses from a group token's text.
fn inner(group: &str) -> &str {
    let g = group.trim();
    g.strip_prefix('(')
        .and_then(|g| g.strip_suffix(')'))
        .unwrap_or(g)
}

/// Unquote an identifier: `"Some Name"` keeps its case, a bare identifier
/// folds to lowercase the way PostgreSQL does.
fn unquote_ident(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(stripped) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        stripped.replace("\"\"", "\"")
    } else {
        raw.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(input: &str) -> (Schema, Vec<String>) {
        parse(input, "test.sql").expect("parse failed")
    }

    #[test]
    fn test_simple_table() {
        let (schema, warnings) = parse_one(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL);",
        );
        assert!(warnings.is_empty());
        assert_eq!(schema.tables.len(), 1);

        let users = schema.table("users").unwrap();
        assert_eq!(users.columns.len(), 2);

        let id = users.column("id").unwrap();
        assert_eq!(id.sql_type, "INTEGER");
        assert!(id.primary_key);
        assert!(!id.nullable);

        let email = users.column("email").unwrap();
        assert_eq!(email.sql_type, "TEXT");
        assert!(!email.nullable);
        assert!(!email.primary_key);

        assert_eq!(users.primary_key_columns(), vec!["id"]);
    }

    #[test]
    fn test_if_not_exists_and_quoted_name() {
        let (schema, _) = parse_one("CREATE TABLE IF NOT EXISTS \"Order Items\" (id INT);");
        assert!(schema.table("Order Items").is_some());
    }

    #[test]
    fn test_unquoted_names_fold_to_lowercase() {
        let (schema, _) = parse_one("CREATE TABLE Users (Id INT);");
        let t = schema.table("users").unwrap();
        assert!(t.column("id").is_some());
    }

    #[test]
    fn test_types_with_parameters() {
        let (schema, _) = parse_one(
            "CREATE TABLE p (name VARCHAR(255), price NUMERIC(10,2), w DOUBLE PRECISION);",
        );
        let t = schema.table("p").unwrap();
        assert_eq!(t.column("name").unwrap().sql_type, "VARCHAR(255)");
        assert_eq!(t.column("price").unwrap().sql_type, "NUMERIC(10,2)");
        assert_eq!(t.column("w").unwrap().sql_type, "DOUBLE PRECISION");
    }

    #[test]
    fn test_serial_becomes_integer_with_identity_default() {
        let (schema, _) = parse_one("CREATE TABLE t (id SERIAL PRIMARY KEY);");
        let id = schema.table("t").unwrap().column("id").unwrap();
        assert_eq!(id.sql_type, "INTEGER");
        assert_eq!(id.default.as_deref(), Some(typemap::IDENTITY_DEFAULT));
        assert!(!id.nullable);
    }

    #[test]
    fn test_default_expressions() {
        let (schema, _) = parse_one(
            "CREATE TABLE t (status TEXT DEFAULT 'active' NOT NULL, created TIMESTAMP DEFAULT NOW());",
        );
        let t = schema.table("t").unwrap();
        assert_eq!(t.column("status").unwrap().default.as_deref(), Some("'active'"));
        assert!(!t.column("status").unwrap().nullable);
        assert_eq!(t.column("created").unwrap().default.as_deref(), Some("now()"));
    }

    #[test]
    fn test_default_with_commas_inside_parens() {
        let (schema, _) = parse_one("CREATE TABLE t (v NUMERIC(6,2) DEFAULT ROUND(1.005, 2));");
        let v = schema.table("t").unwrap().column("v").unwrap();
        assert_eq!(v.default.as_deref(), Some("ROUND(1.005, 2)"));
    }

    #[test]
    fn test_inline_unique_and_check() {
        let (schema, _) = parse_one(
            "CREATE TABLE t (email TEXT UNIQUE, age INT CHECK (age >= 0));",
        );
        let t = schema.table("t").unwrap();
        let uniq = t
            .constraints
            .iter()
            .find(|c| c.kind == ConstraintKind::Unique)
            .unwrap();
        assert_eq!(uniq.name, "t_email_key");
        assert_eq!(uniq.columns, vec!["email"]);

        let chk = t
            .constraints
            .iter()
            .find(|c| c.kind == ConstraintKind::Check)
            .unwrap();
        assert_eq!(chk.check_expr.as_deref(), Some("age >= 0"));
    }

    #[test]
    fn test_inline_references_with_actions() {
        let (schema, _) = parse_one(
            "CREATE TABLE posts (id INT PRIMARY KEY, \
             user_id INTEGER REFERENCES users(id) ON DELETE CASCADE ON UPDATE SET NULL);",
        );
        let posts = schema.table("posts").unwrap();
        let fk = posts.foreign_keys().next().unwrap();
        assert_eq!(fk.name, "posts_user_id_fkey");
        assert_eq!(fk.columns, vec!["user_id"]);
        let r = fk.reference.as_ref().unwrap();
        assert_eq!(r.table, "users");
        assert_eq!(r.columns, vec!["id"]);
        assert_eq!(r.on_delete.as_deref(), Some("CASCADE"));
        assert_eq!(r.on_update.as_deref(), Some("SET NULL"));
    }

    #[test]
    fn test_table_level_constraints() {
        let (schema, _) = parse_one(
            "CREATE TABLE memberships (
                user_id INT,
                team_id INT,
                PRIMARY KEY (user_id, team_id),
                CONSTRAINT memberships_team_fk FOREIGN KEY (team_id) REFERENCES teams (id),
                UNIQUE (user_id),
                CHECK (user_id > 0)
            );",
        );
        let t = schema.table("memberships").unwrap();
        assert_eq!(t.primary_key_columns(), vec!["user_id", "team_id"]);
        assert!(t.column("user_id").unwrap().primary_key);
        assert!(!t.column("user_id").unwrap().nullable);

        let fk = t.foreign_keys().next().unwrap();
        assert_eq!(fk.name, "memberships_team_fk");
        assert_eq!(fk.reference.as_ref().unwrap().table, "teams");

        assert!(t
            .constraints
            .iter()
            .any(|c| c.kind == ConstraintKind::Unique && c.name == "memberships_user_id_key"));
        assert!(t
            .constraints
            .iter()
            .any(|c| c.kind == ConstraintKind::Check && c.name == "memberships_check"));
    }

    #[test]
    fn test_standalone_index_attached() {
        let (schema, warnings) = parse_one(
            "CREATE TABLE t (a INT, b INT);
             CREATE INDEX t_a_idx ON t (a);
             CREATE UNIQUE INDEX t_b_idx ON t (b, a);",
        );
        assert!(warnings.is_empty());
        let t = schema.table("t").unwrap();
        assert_eq!(t.indexes.len(), 2);
        let uniq = t.indexes.iter().find(|i| i.name == "t_b_idx").unwrap();
        assert!(uniq.unique);
        assert_eq!(uniq.columns, vec!["b", "a"]);
    }

    #[test]
    fn test_orphan_index_warns_and_drops() {
        let (schema, warnings) = parse_one("CREATE INDEX x_idx ON missing (a);");
        assert!(schema.tables.is_empty());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("missing"));
    }

    #[test]
    fn test_alter_table_add_constraint_attached() {
        let (schema, warnings) = parse_one(
            "CREATE TABLE users (id INT PRIMARY KEY);
             CREATE TABLE posts (id INT PRIMARY KEY, user_id INT);
             ALTER TABLE posts ADD CONSTRAINT posts_user_id_fkey \
              FOREIGN KEY (user_id) REFERENCES users (id);",
        );
        assert!(warnings.is_empty());
        let fk = schema.table("posts").unwrap().foreign_keys().next().unwrap();
        assert_eq!(fk.name, "posts_user_id_fkey");
        assert_eq!(fk.reference.as_ref().unwrap().table, "users");
    }

    #[test]
    fn test_alter_table_other_forms_warn() {
        let (_, warnings) = parse_one(
            "CREATE TABLE t (x INT); ALTER TABLE t DROP COLUMN x;",
        );
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("unsupported statement"));
    }

    #[test]
    fn test_unsupported_statement_warns() {
        let (schema, warnings) =
            parse_one("CREATE TYPE mood AS ENUM ('sad'); CREATE TABLE t (x INT);");
        assert_eq!(schema.tables.len(), 1);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("unsupported statement"));
    }

    #[test]
    fn test_duplicate_table_is_error() {
        let err = parse("CREATE TABLE t (x INT); CREATE TABLE t (y INT);", "f").unwrap_err();
        assert!(matches!(err, MorphError::Parse { statement: 1, .. }));
    }

    #[test]
    fn test_duplicate_column_is_error() {
        let err = parse("CREATE TABLE t (x INT, x TEXT);", "f").unwrap_err();
        assert!(err.to_string().contains("duplicate column"));
    }

    #[test]
    fn test_missing_body_is_error_with_offset() {
        let err = parse("\n\nCREATE TABLE t;", "f").unwrap_err();
        match err {
            MorphError::Parse { statement, offset, .. } => {
                assert_eq!(statement, 0);
                assert_eq!(offset, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_comments_ignored() {
        let (schema, warnings) = parse_one(
            "-- users table\nCREATE TABLE t (\n  x INT, -- the x\n  /* y is text */ y TEXT\n);",
        );
        assert!(warnings.is_empty());
        let t = schema.table("t").unwrap();
        assert_eq!(t.columns.len(), 2);
    }
}
