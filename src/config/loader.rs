//! Configuration file loader.

use std::path::{Path, PathBuf};

use super::BridgeConfig;

/// File name looked up in the current directory.
pub const LOCAL_CONFIG_FILE: &str = ".streambridge.toml";

/// Finds and parses the bridge configuration file.
///
/// Candidates are tried in order; the first one that exists wins. A missing
/// file is not an error, the defaults apply instead.
#[derive(Debug)]
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Search `./.streambridge.toml`, then `<config dir>/streambridge/config.toml`.
    #[must_use]
    pub fn new() -> Self {
        let mut search_paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("streambridge").join("config.toml"));
        }
        Self { search_paths }
    }

    /// Only consider `path`.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            search_paths: vec![path],
        }
    }

    /// Parse the first existing candidate, or fall back to defaults.
    ///
    /// The result is not validated; see [`BridgeConfig::validate`].
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the chosen file cannot be read or parsed.
    pub fn load(&self) -> Result<BridgeConfig, ConfigError> {
        let Some(path) = self.find_config_file() else {
            tracing::debug!(candidates = self.search_paths.len(), "No config file found");
            return Ok(BridgeConfig::default());
        };
        tracing::debug!(path = %path.display(), "Loading config file");
        Self::load_from_path(&path)
    }

    fn load_from_path(path: &Path) -> Result<BridgeConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }

    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// The candidate `load` would read, if any.
    #[must_use]
    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths.iter().find(|p| p.is_file()).cloned()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors raised while loading or checking a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
