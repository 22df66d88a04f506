//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bridge::{
    Bridge, CommandSpec, SeparatorSet, DEFAULT_FLUSH_TIMEOUT, DEFAULT_READ_CHUNK_SIZE,
    HANDOFF_QUEUE_CAPACITY, STDIN_BUFFER_SIZE,
};

use super::ConfigError;

/// Bridge configuration loaded from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Command line of the child, program first.
    pub command: Vec<String>,
    /// Working directory for the child (overridden in distributed mode).
    pub working_dir: Option<PathBuf>,
    /// Record separator characters. Defaults to `"\r\n"`.
    pub separators: Option<String>,
    /// Seconds `flush_blocking` waits for a batch.
    pub flush_timeout_secs: u64,
    /// Batches held before the output reader blocks.
    pub queue_capacity: usize,
    /// Buffer size of the child's stdin writer.
    pub stdin_buffer_size: usize,
    /// Maximum size of one read from the child's output.
    pub read_chunk_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            working_dir: None,
            separators: None,
            flush_timeout_secs: DEFAULT_FLUSH_TIMEOUT.as_secs(),
            queue_capacity: HANDOFF_QUEUE_CAPACITY,
            stdin_buffer_size: STDIN_BUFFER_SIZE,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

impl BridgeConfig {
    /// The flush timeout as a duration.
    #[must_use]
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_secs(self.flush_timeout_secs)
    }

    /// Parsed separator set, or the default when unset.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the separator string is empty.
    pub fn separator_set(&self) -> Result<SeparatorSet, ConfigError> {
        match &self.separators {
            Some(s) => SeparatorSet::from_chars(s)
                .map_err(|e| ConfigError::Invalid(format!("separators: {e}"))),
            None => Ok(SeparatorSet::default()),
        }
    }

    /// Check the configuration for values the bridge cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command.is_empty() {
            return Err(ConfigError::Invalid("command must not be empty".to_string()));
        }
        if self.command[0].trim().is_empty() {
            return Err(ConfigError::Invalid("program name must not be blank".to_string()));
        }
        self.separator_set()?;
        if self.flush_timeout_secs == 0 {
            return Err(ConfigError::Invalid("flush_timeout_secs must be positive".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be positive".to_string()));
        }
        if self.stdin_buffer_size == 0 || self.read_chunk_size == 0 {
            return Err(ConfigError::Invalid("buffer sizes must be positive".to_string()));
        }
        Ok(())
    }

    /// The command spec described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the command is empty.
    pub fn command_spec(&self) -> Result<CommandSpec, ConfigError> {
        let spec = CommandSpec::from_argv(self.command.iter().cloned())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(match &self.working_dir {
            Some(dir) => spec.working_dir(dir),
            None => spec,
        })
    }

    /// Validate and build an unprepared bridge.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if validation fails.
    pub fn build_bridge(&self) -> Result<Bridge, ConfigError> {
        self.validate()?;
        let mut bridge = Bridge::new()
            .flush_timeout(self.flush_timeout())
            .queue_capacity(self.queue_capacity)
            .stdin_buffer_size(self.stdin_buffer_size)
            .read_chunk_size(self.read_chunk_size);
        bridge
            .configure(self.command_spec()?, Some(self.separator_set()?))
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(bridge)
    }
}
