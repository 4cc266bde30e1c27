//! Configuration for modprog
//!
//! Read from `config.toml` in the data directory. A missing file means
//! defaults; a missing section or key falls back to its default too.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ProgressionError, Result};

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub evaluator: EvaluatorSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorSettings {
    /// Evaluate independent modules of one layer in parallel
    pub parallel: bool,
    /// Deepest prerequisite chain followed before giving up on it.
    /// Defaults to the number of modules in the evaluation.
    pub max_prerequisite_depth: Option<usize>,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            parallel: true,
            max_prerequisite_depth: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Database file, relative to the data directory unless absolute
    pub database: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database: "progress.sqlite".to_string(),
        }
    }
}

impl Config {
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, config_path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        let database = Path::new(&self.storage.database);
        if database.is_absolute() {
            database.to_path_buf()
        } else {
            data_dir.join(database)
        }
    }
}

/// Resolve the data directory: an explicit override, then `.modprog` in the
/// current directory if present, then `~/.modprog`.
pub fn data_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }

    let cwd = std::env::current_dir()?;
    let project_dir = cwd.join(".modprog");
    if project_dir.exists() {
        return Ok(project_dir);
    }

    let home = dirs::home_dir().ok_or_else(|| ProgressionError::Config("could not find home directory".into()))?;
    Ok(home.join(".modprog"))
}
