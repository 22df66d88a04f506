//! Bridge error types.

use std::time::Duration;

use crate::environment::EnvError;

/// Errors that can occur while driving the child process.
#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    /// No command was configured before `prepare`.
    #[error("No command configured")]
    NotConfigured,

    /// The command line had no program.
    #[error("Command line is empty")]
    EmptyCommand,

    /// A separator set must hold at least one character.
    #[error("Separator set is empty")]
    EmptySeparators,

    /// Unknown backslash escape in a separator string.
    #[error("Invalid separator escape: {0}")]
    InvalidEscape(String),

    /// Operation requires a running bridge.
    #[error("Bridge is not running")]
    NotPrepared,

    /// `prepare` or `configure` called after the child was started.
    #[error("Bridge already prepared")]
    AlreadyPrepared,

    /// Operation attempted after `finish`.
    #[error("Bridge is closed")]
    Closed,

    /// The program was not found.
    #[error("Program not found: {program}")]
    NotFound { program: String },

    /// Permission denied when spawning.
    #[error("Permission denied spawning {program}")]
    PermissionDenied { program: String },

    /// Other spawn failure.
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A standard stream of the child was not piped.
    #[error("Child {0} not available")]
    MissingPipe(&'static str),

    /// The shared stdout/stderr pipe could not be set up.
    #[error("Failed to create output pipe: {0}")]
    Pipe(#[source] std::io::Error),

    /// Writing or flushing the child's stdin failed.
    #[error("Failed to write to subprocess: {0}")]
    Write(#[source] std::io::Error),

    /// No batch arrived within the flush timeout.
    #[error("timed out waiting for subprocess after {0:?}")]
    Timeout(Duration),

    /// The output reader exited and every batch was already delivered.
    #[error("Subprocess output closed")]
    OutputClosed,

    /// Working directory lookup failed.
    #[error("Environment error: {0}")]
    Environment(#[from] EnvError),
}

impl BridgeError {
    /// Create a spawn error from an I/O error, classifying common cases.
    pub(crate) fn from_spawn_io(program: &str, err: std::io::Error) -> Self {
        let program = program.to_string();
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { program },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { program },
            _ => Self::Spawn {
                program,
                source: err,
            },
        }
    }
}
