//! Range-fetch worker run as a child process of the download client.
//!
//! The worker learns its assignment from environment variables, fetches one
//! byte range with a single HTTP request and writes the body to its temp file.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use reqwest::header::RANGE;
use reqwest::StatusCode;
use tracing::debug;

use super::ranges::ByteRange;

/// Byte range to fetch, as `start-end` (inclusive).
pub const ENV_RANGE: &str = "PROCMUX_RANGE";

/// URL to fetch from.
pub const ENV_URL: &str = "PROCMUX_URL";

/// File the fetched bytes are written to.
pub const ENV_TMPFILE: &str = "PROCMUX_TMPFILE";

/// A worker's assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub url: String,
    pub range: ByteRange,
    pub tmpfile: PathBuf,
}

impl Assignment {
    /// Read the assignment from a variable lookup (normally the process environment).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).with_context(|| format!("{key} is not set"));
        let range = get(ENV_RANGE)?
            .parse::<ByteRange>()
            .with_context(|| format!("{ENV_RANGE} is invalid"))?;
        Ok(Self {
            url: get(ENV_URL)?,
            range,
            tmpfile: PathBuf::from(get(ENV_TMPFILE)?),
        })
    }

    /// Read the assignment from this process's environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Environment variables that hand this assignment to a worker.
    pub fn env_vars(&self) -> [(&'static str, String); 3] {
        [
            (ENV_RANGE, self.range.to_string()),
            (ENV_URL, self.url.clone()),
            (ENV_TMPFILE, self.tmpfile.display().to_string()),
        ]
    }
}

/// Fetch `range` of `url` into `path`, returning the number of bytes written.
///
/// The server must answer `206 Partial Content` with exactly the requested
/// number of bytes; anything else is an error so the client never merges a
/// short or whole-file body.
pub async fn fetch_range(url: &str, range: ByteRange, path: &Path) -> Result<u64> {
    let client = reqwest::Client::new();
    let response = client
        .get(url)
        .header(RANGE, range.header_value())
        .send()
        .await
        .with_context(|| format!("Failed to request range {range} of {url}"))?;

    let status = response.status();
    if status != StatusCode::PARTIAL_CONTENT {
        bail!("Server answered {status} for range {range}, expected 206 Partial Content");
    }

    let body = response
        .bytes()
        .await
        .with_context(|| format!("Failed to read body for range {range}"))?;
    let fetched = body.len() as u64;
    if fetched != range.len() {
        bail!(
            "Range {range} returned {fetched} bytes, expected {}",
            range.len()
        );
    }

    tokio::fs::write(path, &body)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    debug!(%range, bytes = fetched, path = %path.display(), "range written");
    Ok(fetched)
}

/// Worker entry point: fetch the assignment found in the environment.
pub async fn run_from_env() -> Result<u64> {
    let assignment = Assignment::from_env()?;
    fetch_range(&assignment.url, assignment.range, &assignment.tmpfile).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(vars: &'a HashMap<&'a str, &'a str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| vars.get(key).map(ToString::to_string)
    }

    #[test]
    fn assignment_round_trips_through_env_vars() {
        let assignment = Assignment {
            url: "http://example.com/file.iso".to_string(),
            range: ByteRange { start: 10, end: 19 },
            tmpfile: PathBuf::from("/tmp/tmp_01.part"),
        };
        let vars: HashMap<&str, String> = assignment.env_vars().into_iter().collect();
        let parsed = Assignment::from_lookup(|key| vars.get(key).cloned()).unwrap();
        assert_eq!(parsed, assignment);
    }

    #[test]
    fn missing_variable_is_named() {
        let vars = HashMap::from([(ENV_RANGE, "0-9"), (ENV_URL, "http://example.com/")]);
        let err = Assignment::from_lookup(lookup(&vars)).unwrap_err();
        assert!(err.to_string().contains(ENV_TMPFILE));
    }

    #[test]
    fn malformed_range_is_rejected() {
        let vars = HashMap::from([
            (ENV_RANGE, "ten-twenty"),
            (ENV_URL, "http://example.com/"),
            (ENV_TMPFILE, "/tmp/x"),
        ]);
        let err = Assignment::from_lookup(lookup(&vars)).unwrap_err();
        assert!(err.to_string().contains(ENV_RANGE));
    }
}
