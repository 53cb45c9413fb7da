//! Parallel HTTP range download built on the process multiplexer.
//!
//! A consumer of [`crate::process`]: the client fans byte ranges out to worker
//! subprocesses and fans their temp files back in.

mod client;
mod ranges;
mod worker;

pub use client::{
    build_multiplexer, download, fetch_content_length, merge_parts, output_name, plan,
    run_workers, DownloadReport, DownloadRequest, WorkerCommand,
};
pub use ranges::{partition, ByteRange, RangeError};
pub use worker::{fetch_range, run_from_env, Assignment, ENV_RANGE, ENV_TMPFILE, ENV_URL};
