//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{MorphError, Result};
use std::ffi::OsStr;
use std::path::Path;

/// On-disk serialization formats the configuration file may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    /// JSON when the path ends in `.json` (any case), YAML for everything
    /// else.
    fn for_path(path: &Path) -> Self {
        let is_json = path
            .extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::Json
        } else {
            Self::Yaml
        }
    }
}

impl Config {
    /// Read and parse a configuration file, picking the format from the
    /// file name.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match ConfigFormat::for_path(path) {
            ConfigFormat::Json => Self::from_json(&text),
            ConfigFormat::Yaml => Self::from_yaml(&text),
        }
    }

    /// Parse and validate a YAML configuration.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text)
            .map_err(|e| MorphError::Config(format!("invalid JSON configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Look up an environment by name.
    pub fn env(&self, name: &str) -> Result<&EnvConfig> {
        self.environments
            .get(name)
            .ok_or_else(|| MorphError::UnknownEnvironment(name.to_string()))
    }
}
