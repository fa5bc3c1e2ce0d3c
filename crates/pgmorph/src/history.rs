//! Database-resident history of applied migrations.
//!
//! One table, bootstrapped idempotently on every entry point, outside any
//! user transaction. Its exact shape is part of the external contract:
//! `(name text primary key, checksum text not null, applied_at timestamptz
//! not null default now())`.

use crate::error::Result;
use chrono::{DateTime, Utc};
use tokio_postgres::GenericClient;

/// Name of the history table.
pub const HISTORY_TABLE: &str = "_pgmorph_history";

/// One applied-migration record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRow {
    /// Migration name; primary key.
    pub name: String,

    /// Checksum of the migration file at apply time. Immutable.
    pub checksum: String,

    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
}

/// Idempotently create the history table.
pub async fn ensure_history_table<C: GenericClient>(client: &C) -> Result<()> {
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (
            name TEXT PRIMARY KEY,
            checksum TEXT NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
        HISTORY_TABLE
    );
    client.execute(&sql, &[]).await?;
    Ok(())
}

/// Load all history rows, oldest first.
pub async fn load_rows<C: GenericClient>(client: &C) -> Result<Vec<HistoryRow>> {
    let sql = format!(
        "SELECT name, checksum, applied_at FROM {} ORDER BY applied_at ASC, name ASC",
        HISTORY_TABLE
    );
    let rows = client.query(&sql, &[]).await?;
    Ok(rows
        .iter()
        .map(|row| HistoryRow {
            name: row.get(0),
            checksum: row.get(1),
            applied_at: row.get(2),
        })
        .collect())
}

/// Record an applied migration. Runs inside the migration's transaction so
/// the ledger and the DDL commit together.
pub async fn insert_row<C: GenericClient>(client: &C, name: &str, checksum: &str) -> Result<()> {
    let sql = format!(
        "INSERT INTO {} (name, checksum) VALUES ($1, $2)",
        HISTORY_TABLE
    );
    client.execute(&sql, &[&name, &checksum]).await?;
    Ok(())
}

/// Remove a migration from the ledger (rollback path).
pub async fn delete_row<C: GenericClient>(client: &C, name: &str) -> Result<()> {
    let sql = format!("DELETE FROM {} WHERE name = $1", HISTORY_TABLE);
    client.execute(&sql, &[&name]).await?;
    Ok(())
}
