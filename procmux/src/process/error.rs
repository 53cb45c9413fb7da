//! Error taxonomy for process handles and the multiplexer.
//!
//! A nonzero child exit code is never an error at this layer; it is result
//! data exposed through [`ProcessHandle::exit_code`](super::ProcessHandle::exit_code).

use std::io;
use thiserror::Error;

/// Errors raised while configuring, starting or driving child processes.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The host process model cannot support non-blocking pipes and readiness polling.
    #[error("process handles are not supported on {platform}")]
    InvalidPlatform { platform: &'static str },

    /// The OS refused to create the child process.
    #[error("failed to spawn process `{command}`: {source}")]
    SpawnFailure {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The readiness check itself failed (as opposed to timing out).
    #[error("process interrupted: readiness check failed: {0}")]
    Interrupted(#[source] io::Error),

    /// A handle was attached, or a wait was begun, after the multiplexer started waiting.
    #[error("multiplexer has already started waiting")]
    AlreadyStarted,

    /// `start` was called on a handle whose child is still running.
    #[error("process `{command}` is already running")]
    AlreadyRunning { command: String },

    /// `wait` was called on a handle that was never started.
    #[error("process `{command}` has not been started")]
    NotStarted { command: String },

    /// Reading from or writing to a child pipe failed.
    #[error("pipe I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for process operations.
pub type Result<T> = std::result::Result<T, ProcessError>;
