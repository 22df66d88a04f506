//! Deployment environment lookup.
//!
//! When the host runs in distributed (`hadoop`) mode, the child's working
//! directory is the second locally cached archive. Otherwise the child
//! inherits the caller's working directory, or uses the one configured on
//! the command.

use std::ffi::OsString;
use std::path::PathBuf;

/// Running mode that enables the cache-archive working directory.
pub const DISTRIBUTED_RUNNING_MODE: &str = "hadoop";

/// Position, in the cached archive list, of the child's working directory.
pub const WORKING_DIR_ARCHIVE_INDEX: usize = 1;

/// Environment variable holding the running mode.
pub const RUNNING_MODE_VAR: &str = "STREAMBRIDGE_RUNNING_MODE";

/// Environment variable holding the cached archive paths (platform path-list syntax).
pub const CACHE_ARCHIVES_VAR: &str = "STREAMBRIDGE_CACHE_ARCHIVES";

/// Errors that can occur while resolving the working directory.
#[derive(thiserror::Error, Debug)]
pub enum EnvError {
    /// The cache archive list is too short.
    #[error("No cached archive at index {index} ({available} available)")]
    MissingCacheArchive { index: usize, available: usize },

    /// The provider could not list its cached archives.
    #[error("Cache archives unavailable: {0}")]
    CacheUnavailable(String),
}

/// Source of deployment information for the bridge.
pub trait Environment: Send + Sync {
    /// Deployment mode key, if any.
    fn running_mode(&self) -> Option<String>;

    /// Ordered list of locally cached archive paths.
    ///
    /// # Errors
    ///
    /// Returns `EnvError` if the list cannot be obtained.
    fn local_cache_archives(&self) -> Result<Vec<PathBuf>, EnvError>;
}

/// Resolve the working directory dictated by the environment.
///
/// Returns `None` outside distributed mode.
///
/// # Errors
///
/// Returns `EnvError` in distributed mode if the archive list cannot be
/// read or is too short.
pub fn resolve_working_dir<E: Environment + ?Sized>(env: &E) -> Result<Option<PathBuf>, EnvError> {
    if env.running_mode().as_deref() != Some(DISTRIBUTED_RUNNING_MODE) {
        return Ok(None);
    }

    let archives = env.local_cache_archives()?;
    let available = archives.len();
    archives
        .into_iter()
        .nth(WORKING_DIR_ARCHIVE_INDEX)
        .map(Some)
        .ok_or(EnvError::MissingCacheArchive {
            index: WORKING_DIR_ARCHIVE_INDEX,
            available,
        })
}

/// Environment read from the current process's variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn running_mode(&self) -> Option<String> {
        std::env::var(RUNNING_MODE_VAR).ok()
    }

    fn local_cache_archives(&self) -> Result<Vec<PathBuf>, EnvError> {
        let raw = std::env::var_os(CACHE_ARCHIVES_VAR).unwrap_or_else(OsString::new);
        Ok(std::env::split_paths(&raw)
            .filter(|p| !p.as_os_str().is_empty())
            .collect())
    }
}

/// Fixed environment, for embedding hosts and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticEnvironment {
    running_mode: Option<String>,
    archives: Vec<PathBuf>,
}

impl StaticEnvironment {
    /// Local mode: no working directory override.
    #[must_use]
    pub fn local() -> Self {
        Self::default()
    }

    /// Distributed mode with the given cached archives.
    #[must_use]
    pub fn distributed<I, P>(archives: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            running_mode: Some(DISTRIBUTED_RUNNING_MODE.to_string()),
            archives: archives.into_iter().map(Into::into).collect(),
        }
    }

    /// Set an arbitrary running mode.
    #[must_use]
    pub fn with_running_mode(mut self, mode: impl Into<String>) -> Self {
        self.running_mode = Some(mode.into());
        self
    }
}

impl Environment for StaticEnvironment {
    fn running_mode(&self) -> Option<String> {
        self.running_mode.clone()
    }

    fn local_cache_archives(&self) -> Result<Vec<PathBuf>, EnvError> {
        Ok(self.archives.clone())
    }
}
