//! Parallel download client: one worker subprocess per byte range.
//!
//! The client asks the server for the content length, splits it into
//! contiguous ranges, runs one worker per range through a
//! [`ProcessMultiplexer`], then concatenates the temp files in range order.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use reqwest::header::CONTENT_LENGTH;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::process::{ProcessHandle, ProcessMultiplexer, ProcessOptions};

use super::ranges::partition;
use super::worker::Assignment;

/// Timeout for the initial header request.
const HEAD_TIMEOUT: Duration = Duration::from_secs(15);

/// Output name used when the URL has no usable last path segment.
const FALLBACK_NAME: &str = "download.bin";

/// Program (and leading arguments) each worker runs.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// This executable's hidden `fetch-range` subcommand.
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe().context("Failed to locate the current executable")?;
        Ok(Self {
            program: exe.display().to_string(),
            args: vec!["fetch-range".to_string()],
        })
    }
}

/// Everything needed to run one download.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub workers: usize,
    pub output: Option<PathBuf>,
    pub worker: WorkerCommand,
    pub poll_timeout: Duration,
}

/// Outcome of a finished download.
#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub output: PathBuf,
    pub bytes: u64,
    /// Wall-clock time the workers ran for.
    pub elapsed: Duration,
}

/// Ask the server for the size of `url` with a header-only request.
pub async fn fetch_content_length(url: &str) -> Result<u64> {
    let client = reqwest::Client::builder()
        .timeout(HEAD_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;
    let response = client
        .head(url)
        .send()
        .await
        .with_context(|| format!("Header request to {url} failed"))?
        .error_for_status()
        .with_context(|| format!("Header request to {url} was rejected"))?;

    let len = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(0);
    if len == 0 {
        bail!("Header request returned without content length");
    }
    Ok(len)
}

/// Default output file: the last path segment of `url`.
pub fn output_name(url: &str) -> PathBuf {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(ToString::to_string))
        })
        .filter(|name| !name.is_empty())
        .map_or_else(|| PathBuf::from(FALLBACK_NAME), PathBuf::from)
}

/// Split `len` bytes of `url` into `workers` assignments with temp files in `dir`.
pub fn plan(url: &str, len: u64, workers: usize, dir: &Path) -> Result<Vec<Assignment>> {
    let ranges = partition(len, workers)?;
    Ok(ranges
        .into_iter()
        .enumerate()
        .map(|(i, range)| Assignment {
            url: url.to_string(),
            range,
            tmpfile: dir.join(format!("tmp_{i:02}.part")),
        })
        .collect())
}

/// Build one worker handle per assignment, attached in range order.
pub fn build_multiplexer(
    assignments: &[Assignment],
    worker: &WorkerCommand,
    poll_timeout: Duration,
) -> Result<ProcessMultiplexer> {
    let mut mux = ProcessMultiplexer::with_poll_timeout(poll_timeout);
    for assignment in assignments {
        let range = assignment.range;
        let options = ProcessOptions::new(&worker.program)
            .args(worker.args.iter().cloned())
            .envs(assignment.env_vars())
            .poll_timeout(poll_timeout);
        let handle = ProcessHandle::new(options)?
            .on_start(move |h| info!(pid = ?h.pid(), %range, "worker started"))
            .on_output(move |_, chunk| {
                debug!(%range, output = %String::from_utf8_lossy(chunk), "worker output");
            })
            .on_error(move |_, chunk| {
                warn!(%range, "worker: {}", String::from_utf8_lossy(chunk));
            })
            .on_stop(move |h| {
                info!(
                    %range,
                    exit_code = h.exit_code(),
                    seconds = h.process_time(),
                    "worker finished"
                );
            });
        mux.attach(handle)?;
        info!(%range, "attached worker");
    }
    Ok(mux)
}

/// Run every worker to completion on a blocking thread.
///
/// Fails if any worker cannot be run or exits nonzero; temp files are
/// removed in both cases.
pub async fn run_workers(
    assignments: &[Assignment],
    worker: &WorkerCommand,
    poll_timeout: Duration,
) -> Result<Duration> {
    let mut mux = build_multiplexer(assignments, worker, poll_timeout)?;
    // On failure the multiplexer is dropped on the blocking thread, joining
    // any worker that was already started.
    let waited = tokio::task::spawn_blocking(move || -> Result<ProcessMultiplexer> {
        mux.wait()?;
        Ok(mux)
    })
    .await
    .context("Worker multiplexer task panicked")?;
    let mux = match waited {
        Ok(mux) => mux,
        Err(e) => {
            remove_parts(assignments).await;
            return Err(e);
        }
    };

    let failures: Vec<String> = mux
        .handles()
        .iter()
        .zip(assignments)
        .filter(|(handle, _)| handle.exit_code() != 0)
        .map(|(handle, assignment)| {
            format!(
                "range {} exited with {}: {}",
                assignment.range,
                handle.exit_code(),
                handle.errors().join(" | ")
            )
        })
        .collect();

    if !failures.is_empty() {
        remove_parts(assignments).await;
        bail!("{} worker(s) failed:\n{}", failures.len(), failures.join("\n"));
    }

    Ok(mux.total_time().unwrap_or_default())
}

async fn remove_parts(assignments: &[Assignment]) {
    for assignment in assignments {
        if let Err(e) = tokio::fs::remove_file(&assignment.tmpfile).await {
            debug!(path = %assignment.tmpfile.display(), error = %e, "temp file not removed");
        }
    }
}

/// Concatenate `parts` in order into `output`, deleting each part afterwards.
pub async fn merge_parts(parts: &[PathBuf], output: &Path) -> Result<u64> {
    let mut out = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let mut total = 0u64;
    for part in parts {
        let data = tokio::fs::read(part)
            .await
            .with_context(|| format!("Failed to read {}", part.display()))?;
        out.write_all(&data)
            .await
            .with_context(|| format!("Failed to write {}", output.display()))?;
        total += data.len() as u64;
        tokio::fs::remove_file(part)
            .await
            .with_context(|| format!("Failed to remove {}", part.display()))?;
    }
    out.flush().await?;
    Ok(total)
}

/// Download `request.url` with `request.workers` parallel range workers.
pub async fn download(request: &DownloadRequest) -> Result<DownloadReport> {
    let len = fetch_content_length(&request.url).await?;
    let output = request
        .output
        .clone()
        .unwrap_or_else(|| output_name(&request.url));
    let dir = output
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    info!(bytes = len, url = %request.url, workers = request.workers, "starting download");
    let assignments = plan(&request.url, len, request.workers, dir)?;

    let started = Instant::now();
    let worker_time = run_workers(&assignments, &request.worker, request.poll_timeout).await?;
    debug!(
        worker_ms = worker_time.as_millis(),
        total_ms = started.elapsed().as_millis(),
        "workers done"
    );

    let parts: Vec<PathBuf> = assignments.into_iter().map(|a| a.tmpfile).collect();
    let bytes = merge_parts(&parts, &output).await?;
    if bytes != len {
        warn!(expected = len, written = bytes, "merged size differs from content length");
    }

    Ok(DownloadReport {
        output,
        bytes,
        elapsed: worker_time,
    })
}
