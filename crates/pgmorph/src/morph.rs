//! Command layer: the operations the tool exposes to its embedding surface.
//!
//! `Morph` owns the configuration and wires the pipeline together per
//! environment: introspect, diff, generate, store, execute. Every command
//! returns structured results; nothing here writes to standard streams.

use crate::config::Config;
use crate::db;
use crate::diff;
use crate::error::{MorphError, Result};
use crate::executor::{Executor, MigrateOutcome, RollbackOutcome, StatusEntry};
use crate::generator;
use crate::introspect::Introspector;
use crate::parser;
use crate::store::MigrationStore;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Connections kept per environment. One writer plus a little headroom for
/// read-only commands.
const POOL_SIZE: usize = 4;

/// Default name for generated migrations when the caller supplies none.
const DEFAULT_MIGRATION_NAME: &str = "schema_sync";

/// Result of a `gen` run.
#[derive(Debug, Clone, Serialize)]
pub struct GenOutcome {
    /// Path of the new migration file; `None` when the schemas already
    /// matched and nothing was written.
    pub path: Option<PathBuf>,

    /// Version of the new migration.
    pub version: Option<u64>,

    /// One-line diff summary.
    pub summary: String,

    /// Parser and differ warnings.
    pub warnings: Vec<String>,
}

/// The schema migration engine, bound to a configuration.
pub struct Morph {
    config: Config,
}

impl Morph {
    /// Create the engine from a validated configuration.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Read-only preview: pending migrations for an environment, with
    /// drift reported as warnings.
    pub async fn plan(&self, env: &str) -> Result<MigrateOutcome> {
        self.executor_for(env).await?.plan().await
    }

    /// Introspect `env`, parse the schema file, and emit a migration that
    /// transforms the former into the latter.
    ///
    /// Destructive changes are refused while `check_for_data_loss` is set,
    /// except NOT NULL tightening on tables that are empty at introspection
    /// time.
    pub async fn gen(
        &self,
        env: &str,
        schema_path: &Path,
        name: Option<&str>,
    ) -> Result<GenOutcome> {
        let env_config = self.config.env(env)?;

        let ddl = std::fs::read_to_string(schema_path)?;
        let (desired, mut warnings) = parser::parse(&ddl, &schema_path.display().to_string())?;

        let pool = db::build_pool(&env_config.database, POOL_SIZE).await?;
        let introspector = Introspector::new(pool, env_config.database.schema.clone());
        let current = introspector.snapshot(env).await.map_err(|e| match e {
            MorphError::Database(inner) => MorphError::Introspection(inner.to_string()),
            other => other,
        })?;

        let delta = diff::diff(&current, &desired);
        warnings.extend(delta.warnings.iter().map(|w| w.message.clone()));

        if delta.is_empty() {
            info!("environment '{}' already matches {}", env, schema_path.display());
            return Ok(GenOutcome {
                path: None,
                version: None,
                summary: delta.summary(),
                warnings,
            });
        }

        if self.config.check_for_data_loss {
            for warning in delta.destructive_warnings() {
                if let Some(table) = &warning.null_tightening_table {
                    if introspector.approximate_row_count(table).await? == 0 {
                        continue;
                    }
                }
                return Err(MorphError::DestructiveChange(warning.message.clone()));
            }
        }

        let sql = generator::generate(&delta);
        let store = MigrationStore::new(&env_config.migrations_dir);
        let migration = store.create(name.unwrap_or(DEFAULT_MIGRATION_NAME), &sql)?;

        info!(
            "generated migration {} for environment '{}'",
            migration.path.display(),
            env
        );
        Ok(GenOutcome {
            path: Some(migration.path),
            version: Some(migration.version),
            summary: delta.summary(),
            warnings,
        })
    }

    /// Apply pending migrations to an environment.
    pub async fn migrate(&self, env: &str, dry_run: bool, force: bool) -> Result<MigrateOutcome> {
        self.executor_for(env).await?.apply(dry_run, force).await
    }

    /// Roll back the last `n` applied migrations.
    pub async fn rollback(&self, env: &str, n: usize, force: bool) -> Result<RollbackOutcome> {
        self.executor_for(env).await?.rollback(n, force).await
    }

    /// Per-migration state tags for an environment.
    pub async fn status(&self, env: &str) -> Result<Vec<StatusEntry>> {
        self.executor_for(env).await?.status().await
    }

    async fn executor_for(&self, env: &str) -> Result<Executor> {
        let env_config = self.config.env(env)?;
        let pool = db::build_pool(&env_config.database, POOL_SIZE).await?;
        let store = MigrationStore::new(&env_config.migrations_dir);
        Ok(Executor::new(pool, store))
    }
}
