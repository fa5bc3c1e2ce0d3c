//! Error types for the schema migration engine.

use thiserror::Error;

/// Broad failure classes the embedding layer maps to process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The user can fix the input (schema file, config, migration names).
    UserFixable,
    /// Disk state and database history disagree.
    Drift,
    /// The database rejected a connection or a statement.
    Database,
    /// Another invocation holds the migration lock.
    LockBusy,
}

/// Main error type for schema migration operations.
#[derive(Error, Debug)]
pub enum MorphError {
    /// Configuration error (invalid YAML/JSON, missing fields, bad values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown environment name.
    #[error("Unknown environment '{0}'")]
    UnknownEnvironment(String),

    /// Schema file could not be parsed.
    #[error("Parse error in statement {statement} at byte {offset}: {message}")]
    Parse {
        statement: usize,
        offset: usize,
        message: String,
    },

    /// Catalog introspection failed.
    #[error("Introspection failed: {0}")]
    Introspection(String),

    /// Disk state and database history disagree.
    #[error("Drift detected for '{name}': {detail}")]
    Drift { name: String, detail: String },

    /// A destructive change was refused under the data-loss policy.
    #[error("Destructive change refused: {0}")]
    DestructiveChange(String),

    /// Migration DDL failed the pre-flight validation step.
    #[error("Validation failed for migration '{name}': {message}")]
    Validation { name: String, message: String },

    /// Migration DDL failed during execution.
    #[error("Execution failed for migration '{name}': {message}")]
    Execution { name: String, message: String },

    /// Rollback refused because no down migration exists on disk.
    #[error("Rollback refused for '{0}': no down migration on disk")]
    MissingDownMigration(String),

    /// The cross-process migration lock was not granted in time.
    #[error("Migration lock busy: another invocation holds it (waited {waited_secs}s)")]
    LockBusy { waited_secs: u64 },

    /// Migration store error (bad file names, duplicate versions, etc.)
    #[error("Migration store error: {0}")]
    Store(String),

    /// Database connection or query error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Connection pool error with context.
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// IO error (file operations).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MorphError {
    /// Create a Pool error with context about where it occurred.
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MorphError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a parse error pinned to a statement index and byte offset.
    pub fn parse(statement: usize, offset: usize, message: impl Into<String>) -> Self {
        MorphError::Parse {
            statement,
            offset,
            message: message.into(),
        }
    }

    /// Create a drift error naming the offending migration.
    pub fn drift(name: impl Into<String>, detail: impl Into<String>) -> Self {
        MorphError::Drift {
            name: name.into(),
            detail: detail.into(),
        }
    }

    /// Classify this error for exit-code mapping.
    pub fn class(&self) -> FailureClass {
        match self {
            MorphError::Drift { .. } => FailureClass::Drift,
            MorphError::LockBusy { .. } => FailureClass::LockBusy,
            MorphError::Database(_) | MorphError::Pool { .. } | MorphError::Introspection(_) => {
                FailureClass::Database
            }
            _ => FailureClass::UserFixable,
        }
    }

    /// Format error with full details including the error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for schema migration operations.
pub type Result<T> = std::result::Result<T, MorphError>;
