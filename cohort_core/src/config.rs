//! Configuration file support for cohortctl.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/cohort/config.toml`.

use crate::types::UserRef;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub audit: AuditConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_store_file")]
    pub store_file: String,

    #[serde(default = "default_journal_file")]
    pub journal_file: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            store_file: default_store_file(),
            journal_file: default_journal_file(),
        }
    }
}

impl DataConfig {
    pub fn store_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.store_file)
    }

    pub fn journal_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.journal_file)
    }
}

/// Audit defaults for void/unvoid actions
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Recorded as `voided_by` when no user is given explicitly
    #[serde(default = "default_actor")]
    pub default_actor: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            default_actor: default_actor(),
        }
    }
}

impl AuditConfig {
    pub fn actor(&self) -> UserRef {
        UserRef::new(self.default_actor.clone())
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("cohort")
}

fn default_store_file() -> String {
    "store.json".into()
}

fn default_journal_file() -> String {
    "patient_events.jsonl".into()
}

fn default_actor() -> String {
    "admin".into()
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Reject settings that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.audit.default_actor.trim().is_empty() {
            return Err(Error::Config("audit.default_actor must not be empty".into()));
        }
        if self.data.store_file.trim().is_empty() || self.data.journal_file.trim().is_empty() {
            return Err(Error::Config("data file names must not be empty".into()));
        }
        if self.data.store_file == self.data.journal_file {
            return Err(Error::Config(
                "data.store_file and data.journal_file must differ".into(),
            ));
        }
        Ok(())
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("cohort").join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}
