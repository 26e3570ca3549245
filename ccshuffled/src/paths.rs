//! Cross-platform application paths

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ConfigError;

/// Overrides the per-user data directory (deployments, tests).
pub const DATA_DIR_ENV: &str = "CCSHUFFLE_DATA_DIR";

#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self, ConfigError> {
        let data_dir = match std::env::var_os(DATA_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => Self::get_data_dir()?,
        };
        Self::at(data_dir)
    }

    /// Use `data_dir` as-is, creating it if needed.
    pub fn at(data_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).map_err(|source| ConfigError::Io {
            path: data_dir.clone(),
            source,
        })?;
        Ok(Self { data_dir })
    }

    fn get_data_dir() -> Result<PathBuf, ConfigError> {
        let base = dirs::data_dir().ok_or(ConfigError::NoDataDir)?;
        Ok(base.join("ccshuffle"))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    /// Snapshot of the current round, rewritten on build and resolve.
    pub fn round_file(&self) -> PathBuf {
        self.data_dir.join("round.json")
    }
}
