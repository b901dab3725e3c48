use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::job::BackupJob;
use crate::{BackplanError, Result};

const DEFAULT_INTERVAL_MINUTES: u32 = 60;
const DEFAULT_RETENTION_DAYS: u32 = 7;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Job values as they come from the user, before validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobConfig {
    #[serde(default)]
    pub source_path: PathBuf,
    #[serde(default)]
    pub destination_path: PathBuf,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::new(),
            destination_path: PathBuf::new(),
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Overrides the platform data directory for log files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

fn default_interval_minutes() -> u32 {
    DEFAULT_INTERVAL_MINUTES
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

fn default_log_level() -> String {
    "info".to_string()
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "backplan", "backplan")
}

impl Config {
    /// Default location of `config.toml` in the platform config directory.
    pub fn default_path() -> PathBuf {
        project_dirs()
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Default directory for log files.
    pub fn default_log_dir() -> PathBuf {
        project_dirs()
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| std::env::temp_dir().join("backplan").join("logs"))
    }

    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path.unwrap_or_else(Self::default_path);

        let config_str = std::fs::read_to_string(&path).map_err(|e| {
            BackplanError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_toml_str(&config_str)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: Option<PathBuf>) -> Result<Self> {
        let explicit = path.is_some();
        let path = path.unwrap_or_else(Self::default_path);
        if !explicit && !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(Some(path))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.backup_job().map(|_| ())
    }

    /// Builds the validated job described by the `[job]` section.
    pub fn backup_job(&self) -> Result<BackupJob> {
        BackupJob::try_from(&self.job)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.logging
            .directory
            .clone()
            .unwrap_or_else(Self::default_log_dir)
    }
}
