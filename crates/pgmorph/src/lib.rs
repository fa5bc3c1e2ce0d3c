//! # pgmorph
//!
//! Schema-as-code migration engine for PostgreSQL.
//!
//! Given a declarative SQL schema file (the desired state) and a live
//! database (the current state), pgmorph derives the minimal ordered DDL
//! that transforms the latter into the former, persists it as a versioned,
//! checksummed migration file, and applies, rewinds, or previews migrations
//! against named environments with transactional safety and drift
//! detection.
//!
//! The pipeline is a closed loop: introspect → diff → generate → store →
//! execute, where the next introspection sees the applied change.
//!
//! ## Example
//!
//! ```rust,no_run
//! use pgmorph::{Config, Morph};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pgmorph::MorphError> {
//!     let config = Config::load("pgmorph.yaml")?;
//!     let morph = Morph::new(config);
//!
//!     let gen = morph.gen("dev", Path::new("schema.sql"), None).await?;
//!     if let Some(path) = gen.path {
//!         println!("new migration: {}", path.display());
//!     }
//!
//!     let outcome = morph.migrate("dev", false, false).await?;
//!     println!("applied {} migrations", outcome.applied.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod diff;
pub mod error;
pub mod executor;
pub mod generator;
pub mod history;
pub mod introspect;
pub mod morph;
pub mod parser;
pub mod schema;
pub mod store;
pub mod typemap;

// Re-exports for convenient access
pub use config::{Config, DatabaseConfig, EnvConfig};
pub use diff::{diff, ColumnChange, Diff, TableDiff, Warning};
pub use error::{FailureClass, MorphError, Result};
pub use executor::{
    Executor, MigrateOutcome, MigrationState, PendingMigration, RollbackOutcome, StatusEntry,
};
pub use generator::generate;
pub use history::{HistoryRow, HISTORY_TABLE};
pub use introspect::Introspector;
pub use morph::{GenOutcome, Morph};
pub use parser::parse;
pub use schema::{Column, Constraint, ConstraintKind, ForeignKeyRef, Index, Schema, Table};
pub use store::{Migration, MigrationStore};
