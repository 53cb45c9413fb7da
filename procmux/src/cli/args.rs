//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use procmux::process::ErrorCapture;

/// procmux - Run child processes concurrently and collect their output
#[derive(Parser, Debug)]
#[command(name = "procmux")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Seconds a single readiness check may wait before polling again
    #[arg(long, global = true, default_value = "10")]
    pub poll_timeout: u64,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run shell commands concurrently and wait for all of them
    Run {
        /// Keep stdout as raw bytes instead of splitting it into lines
        #[arg(long)]
        binary: bool,

        /// Where the commands' stderr goes
        #[arg(long, value_enum, default_value_t = StderrMode::Separate)]
        stderr: StderrMode,

        /// Environment variable shared by every command (KEY=VALUE, repeatable)
        #[arg(short = 'e', long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,

        /// Working directory for every command
        #[arg(short = 'C', long)]
        dir: Option<PathBuf>,

        /// Print a JSON report instead of live output and a table
        #[arg(long)]
        json: bool,

        /// Shell command lines to run
        #[arg(required = true)]
        commands: Vec<String>,
    },

    /// Download a URL in parallel byte ranges, one worker process per range
    Download {
        /// URL to download (the server must support range requests)
        url: String,

        /// Number of worker processes
        #[arg(default_value = "4")]
        workers: usize,

        /// Output file (defaults to the last segment of the URL)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Worker entry point used by `download` (reads its assignment from the environment)
    #[command(hide = true)]
    FetchRange,
}

/// Stderr handling for `run`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StderrMode {
    /// Capture stderr separately and report it per command
    Separate,
    /// Let commands write straight to this terminal's stderr
    Inherit,
}

impl From<StderrMode> for ErrorCapture {
    fn from(mode: StderrMode) -> Self {
        match mode {
            StderrMode::Separate => Self::Separate,
            StderrMode::Inherit => Self::Inherit,
        }
    }
}

/// Parse a `KEY=VALUE` pair.
fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{s}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run() {
        let cli = Cli::try_parse_from([
            "procmux",
            "--poll-timeout",
            "2",
            "run",
            "--binary",
            "-e",
            "A=1",
            "--env",
            "B=x=y",
            "sleep 1",
            "echo hi",
        ])
        .unwrap();
        assert_eq!(cli.poll_timeout, 2);
        match cli.command {
            Commands::Run {
                binary,
                stderr,
                env,
                commands,
                json,
                dir,
            } => {
                assert!(binary);
                assert!(!json);
                assert!(dir.is_none());
                assert_eq!(stderr, StderrMode::Separate);
                assert_eq!(
                    env,
                    [
                        ("A".to_string(), "1".to_string()),
                        ("B".to_string(), "x=y".to_string())
                    ]
                );
                assert_eq!(commands, ["sleep 1", "echo hi"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn run_requires_a_command() {
        assert!(Cli::try_parse_from(["procmux", "run"]).is_err());
    }

    #[test]
    fn parses_download_defaults() {
        let cli = Cli::try_parse_from(["procmux", "download", "http://example.com/f"]).unwrap();
        assert_eq!(cli.poll_timeout, 10);
        match cli.command {
            Commands::Download {
                url,
                workers,
                output,
            } => {
                assert_eq!(url, "http://example.com/f");
                assert_eq!(workers, 4);
                assert!(output.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn env_pair_parsing() {
        assert_eq!(
            parse_env_pair("KEY=a=b"),
            Ok(("KEY".to_string(), "a=b".to_string()))
        );
        assert_eq!(parse_env_pair("EMPTY="), Ok(("EMPTY".to_string(), String::new())));
        assert!(parse_env_pair("novalue").is_err());
        assert!(parse_env_pair("=x").is_err());
    }
}
