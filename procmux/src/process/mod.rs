//! Non-blocking child process handles and their multiplexer.
//!
//! A [`ProcessHandle`] owns one child and its pipes; a
//! [`ProcessMultiplexer`] starts a fixed set of handles and polls them all
//! from the calling thread until every child has closed its stdout.

mod buffer;
mod error;
mod handle;
mod multiplexer;
mod options;
mod readiness;
mod summary;

pub use buffer::{BufferMode, OutputBuffer, OutputSlice};
pub use error::{ProcessError, Result};
pub use handle::{AppendCallback, LifecycleCallback, ProcessHandle, ProcessState};
pub use multiplexer::{Phase, ProcessMultiplexer};
pub use options::{CommandLine, ErrorCapture, ProcessOptions, DEFAULT_POLL_TIMEOUT, SHELL};
pub use readiness::Interest;
pub use summary::ProcessSummary;
