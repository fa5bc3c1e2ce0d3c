//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Root configuration: named environments plus global safety options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Environments by name (`dev`, `staging`, `prod`, ...).
    pub environments: BTreeMap<String, EnvConfig>,

    /// Convert destructive diff warnings into errors (default: true).
    #[serde(default = "default_true")]
    pub check_for_data_loss: bool,

    /// Reserved for the CLI layer's interactive confirmation.
    #[serde(default)]
    pub require_approval: bool,
}

/// One target environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Database connection descriptor.
    pub database: DatabaseConfig,

    /// Directory holding this environment's migration files.
    pub migrations_dir: PathBuf,
}

/// Database connection descriptor.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Namespace to introspect and migrate (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

fn default_true() -> bool {
    true
}

fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_require() -> String {
    "require".to_string()
}
