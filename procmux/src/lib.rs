//! procmux - run child processes concurrently and drain their output without blocking.
//!
//! - [`process`] holds the core: a non-blocking process handle and a
//!   multiplexer that polls many handles from one thread.
//! - [`download`] is a consumer of the core that splits an HTTP download into
//!   byte ranges fetched by worker subprocesses.

pub mod download;
pub mod process;
