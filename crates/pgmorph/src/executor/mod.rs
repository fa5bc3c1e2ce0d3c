//! Migration executor: applies and rewinds migrations under transactional
//! and safety guarantees.
//!
//! One advisory lock serializes writers across processes; one transaction
//! wraps each migration so it lands all-or-nothing; drift between disk and
//! the history ledger is fatal unless explicitly forced. Read-only entry
//! points (`status`, `plan`) take no lock.

use crate::error::{MorphError, Result};
use crate::history::{self, HistoryRow};
use crate::parser::split_statements;
use crate::store::{Migration, MigrationStore};
use deadpool_postgres::Pool;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Fixed advisory lock key shared by every invocation ("pgmorph" in hex).
const ADVISORY_LOCK_KEY: i64 = 0x0070_676d_6f72_7068;

/// Default time to wait for the advisory lock.
const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(30);

/// Poll interval while waiting for the lock.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Result of a `migrate` run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrateOutcome {
    /// Names of migrations applied by this run, in order.
    pub applied: Vec<String>,

    /// Migrations that were pending at the start of the run. On a dry run
    /// nothing is executed and this is the whole plan.
    pub pending: Vec<PendingMigration>,

    /// Non-fatal findings (forced drift downgrades, skipped files).
    pub warnings: Vec<String>,

    /// Error that stopped the batch, if any. Migrations applied before the
    /// failure stay committed.
    pub error: Option<String>,

    /// Wall-clock duration in seconds.
    pub duration_seconds: f64,

    /// True when every pending migration was applied (or previewed).
    pub success: bool,
}

/// One pending migration, with its DDL for preview output.
#[derive(Debug, Clone, Serialize)]
pub struct PendingMigration {
    pub version: u64,
    pub name: String,
    pub sql: String,
}

/// Result of a `rollback` run.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackOutcome {
    /// Names rolled back, newest first.
    pub rolled_back: Vec<String>,

    pub warnings: Vec<String>,

    pub duration_seconds: f64,

    pub success: bool,
}

/// Per-migration state tag reported by `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationState {
    Applied,
    Pending,
    MissingFile,
    ChecksumMismatch,
}

/// One row of `status` output.
#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    /// Version from the file name; absent for history rows with no file.
    pub version: Option<u64>,
    pub name: String,
    pub state: MigrationState,
}

/// The migration executor for one environment.
pub struct Executor {
    pool: Pool,
    store: MigrationStore,
    lock_wait: Duration,
}

impl Executor {
    /// Create an executor over a pool and a migration store.
    pub fn new(pool: Pool, store: MigrationStore) -> Self {
        Self {
            pool,
            store,
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    /// Override the advisory-lock wait.
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Apply all pending migrations in version order.
    ///
    /// With `dry_run` the pending set and its DDL are returned without
    /// executing anything. With `force`, drift findings downgrade from
    /// errors to warnings.
    pub async fn apply(&self, dry_run: bool, force: bool) -> Result<MigrateOutcome> {
        let started = Instant::now();
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| MorphError::pool(e, "getting connection for apply"))?;

        {
            let pg: &tokio_postgres::Client = &conn;
            // Bootstrap runs outside any user transaction.
            history::ensure_history_table(pg).await?;
            self.acquire_lock(pg).await?;
        }

        let result = self.apply_locked(&mut conn, dry_run, force, started).await;
        let pg: &tokio_postgres::Client = &conn;
        self.release_lock(pg).await;
        result
    }

    async fn apply_locked(
        &self,
        conn: &mut deadpool_postgres::Object,
        dry_run: bool,
        force: bool,
        started: Instant,
    ) -> Result<MigrateOutcome> {
        let (disk, mut warnings) = self.store.load_all()?;
        let applied_rows = {
            let pg: &tokio_postgres::Client = &*conn;
            history::load_rows(pg).await?
        };

        for (name, detail) in drift_findings(&disk, &applied_rows) {
            if force {
                warn!("drift (forced): {}: {}", name, detail);
                warnings.push(format!("drift (forced): {}: {}", name, detail));
            } else {
                return Err(MorphError::drift(name, detail));
            }
        }

        let pending: Vec<PendingMigration> = pending_of(&disk, &applied_rows)
            .into_iter()
            .map(|m| PendingMigration {
                version: m.version,
                name: m.name.clone(),
                sql: m.sql.clone(),
            })
            .collect();

        if dry_run {
            info!("dry run: {} migrations pending", pending.len());
            return Ok(MigrateOutcome {
                applied: Vec::new(),
                pending,
                warnings,
                error: None,
                duration_seconds: started.elapsed().as_secs_f64(),
                success: true,
            });
        }

        let mut applied = Vec::new();
        let mut error = None;
        let by_name: HashMap<&str, &Migration> =
            disk.iter().map(|m| (m.name.as_str(), m)).collect();

        for entry in &pending {
            let migration = by_name[entry.name.as_str()];
            match self.apply_one(conn, migration).await {
                Ok(()) => {
                    info!("applied migration {} ({})", migration.version, migration.name);
                    applied.push(migration.name.clone());
                }
                Err(e) => {
                    // Later migrations are not attempted.
                    error = Some(e.to_string());
                    break;
                }
            }
        }

        let success = error.is_none();
        Ok(MigrateOutcome {
            applied,
            pending,
            warnings,
            error,
            duration_seconds: started.elapsed().as_secs_f64(),
            success,
        })
    }

    /// Apply one migration inside its own transaction.
    async fn apply_one(
        &self,
        conn: &mut deadpool_postgres::Object,
        migration: &Migration,
    ) -> Result<()> {
        let tx = conn.transaction().await?;

        self.validate_sql(&tx, migration).await?;

        tx.batch_execute(&migration.sql)
            .await
            .map_err(|e| MorphError::Execution {
                name: migration.name.clone(),
                message: e.to_string(),
            })?;

        {
            let pg: &tokio_postgres::Transaction<'_> = &tx;
            history::insert_row(pg, &migration.name, &migration.checksum).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Validate a migration by preparing each statement that PostgreSQL can
    /// prepare. Utility and DDL statements fall outside `PREPARE`; for
    /// those, execution itself is the check and its failure is the error
    /// that gets reported.
    async fn validate_sql(
        &self,
        tx: &deadpool_postgres::Transaction<'_>,
        migration: &Migration,
    ) -> Result<()> {
        for (i, stmt) in split_statements(&migration.sql).iter().enumerate() {
            if !is_preparable(&stmt.text) {
                continue;
            }
            let id = format!("pgmorph_validate_{}", i);
            tx.batch_execute(&format!("PREPARE {} AS {}", id, stmt.text))
                .await
                .map_err(|e| MorphError::Validation {
                    name: migration.name.clone(),
                    message: format!("statement {}: {}", i, e),
                })?;
            tx.batch_execute(&format!("DEALLOCATE {}", id)).await?;
        }
        Ok(())
    }

    /// Roll back the last `n` applied migrations, newest first.
    ///
    /// Strict mode (default) refuses any migration without a down file.
    /// Under `force`, such migrations are removed from the ledger without
    /// executing DDL.
    pub async fn rollback(&self, n: usize, force: bool) -> Result<RollbackOutcome> {
        let started = Instant::now();
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| MorphError::pool(e, "getting connection for rollback"))?;

        {
            let pg: &tokio_postgres::Client = &conn;
            history::ensure_history_table(pg).await?;
            self.acquire_lock(pg).await?;
        }

        let result = self.rollback_locked(&mut conn, n, force, started).await;
        let pg: &tokio_postgres::Client = &conn;
        self.release_lock(pg).await;
        result
    }

    async fn rollback_locked(
        &self,
        conn: &mut deadpool_postgres::Object,
        n: usize,
        force: bool,
        started: Instant,
    ) -> Result<RollbackOutcome> {
        let (disk, _) = self.store.load_all()?;
        let by_name: HashMap<&str, &Migration> =
            disk.iter().map(|m| (m.name.as_str(), m)).collect();

        let rows = {
            let pg: &tokio_postgres::Client = &*conn;
            history::load_rows(pg).await?
        };
        let victims: Vec<&HistoryRow> = rows.iter().rev().take(n).collect();

        let mut rolled_back = Vec::new();
        let mut warnings = Vec::new();

        for row in victims {
            let down = match by_name.get(row.name.as_str()) {
                Some(migration) => self.store.load_down(migration)?,
                None => None,
            };

            match down {
                Some(down_sql) => {
                    let tx = conn.transaction().await?;
                    tx.batch_execute(&down_sql)
                        .await
                        .map_err(|e| MorphError::Execution {
                            name: row.name.clone(),
                            message: e.to_string(),
                        })?;
                    {
                        let pg: &tokio_postgres::Transaction<'_> = &tx;
                        history::delete_row(pg, &row.name).await?;
                    }
                    tx.commit().await?;
                    info!("rolled back migration {}", row.name);
                }
                None if force => {
                    // Soft rollback: ledger only, no DDL.
                    warn!("no down migration for '{}'; removing ledger row only", row.name);
                    warnings.push(format!(
                        "no down migration for '{}'; removed ledger row without executing DDL",
                        row.name
                    ));
                    let pg: &tokio_postgres::Client = &*conn;
                    history::delete_row(pg, &row.name).await?;
                }
                None => return Err(MorphError::MissingDownMigration(row.name.clone())),
            }
            rolled_back.push(row.name.clone());
        }

        Ok(RollbackOutcome {
            rolled_back,
            warnings,
            duration_seconds: started.elapsed().as_secs_f64(),
            success: true,
        })
    }

    /// Read-only join of disk state and history. Takes no lock.
    pub async fn status(&self) -> Result<Vec<StatusEntry>> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| MorphError::pool(e, "getting connection for status"))?;
        let pg: &tokio_postgres::Client = &conn;

        history::ensure_history_table(pg).await?;

        let (disk, _) = self.store.load_all()?;
        let rows = history::load_rows(pg).await?;
        Ok(status_join(&disk, &rows))
    }

    /// Read-only preview of what `apply` would do. Takes no lock; drift is
    /// reported as warnings rather than errors.
    pub async fn plan(&self) -> Result<MigrateOutcome> {
        let started = Instant::now();
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| MorphError::pool(e, "getting connection for plan"))?;
        let pg: &tokio_postgres::Client = &conn;

        history::ensure_history_table(pg).await?;

        let (disk, mut warnings) = self.store.load_all()?;
        let rows = history::load_rows(pg).await?;

        for (name, detail) in drift_findings(&disk, &rows) {
            warnings.push(format!("drift: {}: {}", name, detail));
        }

        let pending = pending_of(&disk, &rows)
            .into_iter()
            .map(|m| PendingMigration {
                version: m.version,
                name: m.name.clone(),
                sql: m.sql.clone(),
            })
            .collect();

        Ok(MigrateOutcome {
            applied: Vec::new(),
            pending,
            warnings,
            error: None,
            duration_seconds: started.elapsed().as_secs_f64(),
            success: true,
        })
    }

    async fn acquire_lock(&self, pg: &tokio_postgres::Client) -> Result<()> {
        let deadline = Instant::now() + self.lock_wait;
        loop {
            let row = pg
                .query_one("SELECT pg_try_advisory_lock($1)", &[&ADVISORY_LOCK_KEY])
                .await?;
            if row.get::<_, bool>(0) {
                debug!("acquired migration lock {:#x}", ADVISORY_LOCK_KEY);
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(MorphError::LockBusy {
                    waited_secs: self.lock_wait.as_secs(),
                });
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    async fn release_lock(&self, pg: &tokio_postgres::Client) {
        // Best effort: connection teardown releases the lock anyway.
        if let Err(e) = pg
            .query("SELECT pg_advisory_unlock($1)", &[&ADVISORY_LOCK_KEY])
            .await
        {
            warn!("failed to release migration lock: {}", e);
        }
    }
}

/// Drift findings between disk and history: missing files, edited files,
/// and out-of-order pending versions. Pure and deterministic.
fn drift_findings(disk: &[Migration], history: &[HistoryRow]) -> Vec<(String, String)> {
    let mut findings = Vec::new();
    let by_name: HashMap<&str, &Migration> = disk.iter().map(|m| (m.name.as_str(), m)).collect();
    let applied: HashSet<&str> = history.iter().map(|r| r.name.as_str()).collect();

    let mut sorted_history: Vec<&HistoryRow> = history.iter().collect();
    sorted_history.sort_by(|a, b| a.name.cmp(&b.name));
    for row in sorted_history {
        match by_name.get(row.name.as_str()) {
            None => findings.push((
                row.name.clone(),
                "history row has no migration file on disk".to_string(),
            )),
            Some(migration) if migration.checksum != row.checksum => findings.push((
                row.name.clone(),
                format!(
                    "file checksum {} does not match recorded {}",
                    migration.checksum, row.checksum
                ),
            )),
            Some(_) => {}
        }
    }

    // A pending migration below the high-water mark was created out of
    // order; gaps among already-applied versions are tolerated.
    let max_applied = disk
        .iter()
        .filter(|m| applied.contains(m.name.as_str()))
        .map(|m| m.version)
        .max()
        .unwrap_or(0);
    for migration in disk {
        if !applied.contains(migration.name.as_str()) && migration.version <= max_applied {
            findings.push((
                migration.name.clone(),
                format!(
                    "out-of-order: version {} is not above the highest applied version {}",
                    migration.version, max_applied
                ),
            ));
        }
    }

    findings
}

/// Pending = disk minus history, in ascending version order.
fn pending_of<'a>(disk: &'a [Migration], history: &[HistoryRow]) -> Vec<&'a Migration> {
    let applied: HashSet<&str> = history.iter().map(|r| r.name.as_str()).collect();
    disk.iter()
        .filter(|m| !applied.contains(m.name.as_str()))
        .collect()
}

/// Join disk and history into per-migration state tags.
fn status_join(disk: &[Migration], history: &[HistoryRow]) -> Vec<StatusEntry> {
    let by_name: HashMap<&str, &HistoryRow> =
        history.iter().map(|r| (r.name.as_str(), r)).collect();

    let mut entries: Vec<StatusEntry> = disk
        .iter()
        .map(|migration| {
            let state = match by_name.get(migration.name.as_str()) {
                Some(row) if row.checksum == migration.checksum => MigrationState::Applied,
                Some(_) => MigrationState::ChecksumMismatch,
                None => MigrationState::Pending,
            };
            StatusEntry {
                version: Some(migration.version),
                name: migration.name.clone(),
                state,
            }
        })
        .collect();

    let on_disk: HashSet<&str> = disk.iter().map(|m| m.name.as_str()).collect();
    let mut missing: Vec<&HistoryRow> = history
        .iter()
        .filter(|r| !on_disk.contains(r.name.as_str()))
        .collect();
    missing.sort_by(|a, b| a.name.cmp(&b.name));
    for row in missing {
        entries.push(StatusEntry {
            version: None,
            name: row.name.clone(),
            state: MigrationState::MissingFile,
        });
    }

    entries
}

/// Whether `PREPARE` accepts this statement. Everything else (utility and
/// DDL statements) is validated by execution itself.
fn is_preparable(sql: &str) -> bool {
    let first = sql
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_uppercase();
    matches!(
        first.as_str(),
        "SELECT" | "INSERT" | "UPDATE" | "DELETE" | "MERGE" | "VALUES" | "TABLE"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::checksum;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;

    fn make_migration(version: u64, name: &str, sql: &str) -> Migration {
        Migration {
            version,
            name: name.to_string(),
            sql: sql.to_string(),
            checksum: checksum(sql),
            path: PathBuf::from(format!("{}_{}.sql", version, name)),
        }
    }

    fn make_row(name: &str, checksum: &str, minute: u32) -> HistoryRow {
        HistoryRow {
            name: name.to_string(),
            checksum: checksum.to_string(),
            applied_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, minute, 0).unwrap(),
        }
    }

    fn applied_row(migration: &Migration, minute: u32) -> HistoryRow {
        make_row(&migration.name, &migration.checksum, minute)
    }

    #[test]
    fn test_no_drift_on_clean_state() {
        let disk = vec![
            make_migration(1, "init", "CREATE TABLE a (x INT);"),
            make_migration(2, "more", "CREATE TABLE b (y INT);"),
        ];
        let history = vec![applied_row(&disk[0], 0)];
        assert!(drift_findings(&disk, &history).is_empty());
    }

    #[test]
    fn test_drift_missing_file() {
        let disk = vec![make_migration(1, "init", "SELECT 1;")];
        let history = vec![applied_row(&disk[0], 0), make_row("ghost", "abc", 1)];
        let findings = drift_findings(&disk, &history);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].0, "ghost");
        assert!(findings[0].1.contains("no migration file"));
    }

    #[test]
    fn test_drift_checksum_mismatch() {
        let disk = vec![make_migration(1, "init", "CREATE TABLE a (x INT, y INT);")];
        let history = vec![make_row("init", "stale-checksum", 0)];
        let findings = drift_findings(&disk, &history);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].1.contains("does not match"));
    }

    #[test]
    fn test_drift_out_of_order() {
        // Applied = {1, 2, 3}; a new file appears with version 2's slot.
        let m1 = make_migration(1, "one", "SELECT 1;");
        let m2 = make_migration(2, "two_fix", "SELECT 2;");
        let m3 = make_migration(3, "three", "SELECT 3;");
        let applied1 = make_migration(1, "one", "SELECT 1;");
        let history = vec![
            applied_row(&applied1, 0),
            applied_row(&m3, 2),
        ];
        let disk = vec![m1, m2, m3];
        let findings = drift_findings(&disk, &history);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].0, "two_fix");
        assert!(findings[0].1.contains("out-of-order"));
    }

    #[test]
    fn test_gaps_below_applied_are_tolerated() {
        // Versions 1 and 5 applied; no pending files below 5.
        let m1 = make_migration(1, "one", "SELECT 1;");
        let m5 = make_migration(5, "five", "SELECT 5;");
        let history = vec![applied_row(&m1, 0), applied_row(&m5, 1)];
        let disk = vec![m1, m5];
        assert!(drift_findings(&disk, &history).is_empty());
    }

    #[test]
    fn test_pending_sorted_by_version() {
        let m1 = make_migration(1, "one", "SELECT 1;");
        let m2 = make_migration(2, "two", "SELECT 2;");
        let m3 = make_migration(3, "three", "SELECT 3;");
        let history = vec![applied_row(&m1, 0)];
        let disk = vec![m1.clone(), m2, m3];
        let pending = pending_of(&disk, &history);
        let names: Vec<&str> = pending.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["two", "three"]);
    }

    #[test]
    fn test_pending_empty_when_all_applied() {
        let m1 = make_migration(1, "one", "SELECT 1;");
        let history = vec![applied_row(&m1, 0)];
        let disk = vec![m1];
        assert!(pending_of(&disk, &history).is_empty());
    }

    #[test]
    fn test_status_join_tags() {
        let applied = make_migration(1, "init", "CREATE TABLE a (x INT);");
        let edited = make_migration(2, "edited", "CREATE TABLE b (y INT);");
        let fresh = make_migration(3, "fresh", "CREATE TABLE c (z INT);");
        let history = vec![
            applied_row(&applied, 0),
            make_row("edited", "old-checksum", 1),
            make_row("vanished", "gone", 2),
        ];
        let disk = vec![applied, edited, fresh];

        let entries = status_join(&disk, &history);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].state, MigrationState::Applied);
        assert_eq!(entries[1].state, MigrationState::ChecksumMismatch);
        assert_eq!(entries[2].state, MigrationState::Pending);
        assert_eq!(entries[3].state, MigrationState::MissingFile);
        assert_eq!(entries[3].name, "vanished");
        assert_eq!(entries[3].version, None);
    }

    #[test]
    fn test_is_preparable() {
        assert!(is_preparable("SELECT 1"));
        assert!(is_preparable("  insert into t values (1)"));
        assert!(!is_preparable("CREATE TABLE t (x INT)"));
        assert!(!is_preparable("ALTER TABLE t ADD COLUMN y INT"));
        assert!(!is_preparable("DROP INDEX idx"));
        assert!(!is_preparable(""));
    }
}
