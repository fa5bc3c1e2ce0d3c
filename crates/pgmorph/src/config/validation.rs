//! Configuration validation.

use crate::config::Config;
use crate::error::{MorphError, Result};

/// Validate a loaded configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.environments.is_empty() {
        return Err(MorphError::Config(
            "at least one environment must be configured".to_string(),
        ));
    }

    for (name, env) in &config.environments {
        let db = &env.database;
        if db.host.is_empty() {
            return Err(MorphError::Config(format!(
                "environment '{}': database host must not be empty",
                name
            )));
        }
        if db.port == 0 {
            return Err(MorphError::Config(format!(
                "environment '{}': database port must not be 0",
                name
            )));
        }
        if db.database.is_empty() {
            return Err(MorphError::Config(format!(
                "environment '{}': database name must not be empty",
                name
            )));
        }
        if db.user.is_empty() {
            return Err(MorphError::Config(format!(
                "environment '{}': database user must not be empty",
                name
            )));
        }
        if env.migrations_dir.as_os_str().is_empty() {
            return Err(MorphError::Config(format!(
                "environment '{}': migrations_dir must not be empty",
                name
            )));
        }
    }

    Ok(())
}
