//! CLI command execution.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use procmux::download::{self, DownloadRequest, WorkerCommand};
use procmux::process::{
    BufferMode, ProcessHandle, ProcessMultiplexer, ProcessOptions, ProcessSummary,
};
use tracing::debug;

use super::args::{Cli, Commands, StderrMode};

/// Width of the command column in the `run` table.
const COMMAND_WIDTH: usize = 40;

/// Settings for the `run` subcommand.
struct RunSettings {
    binary: bool,
    stderr: StderrMode,
    env: HashMap<String, String>,
    dir: Option<PathBuf>,
    json: bool,
    poll_timeout: Duration,
}

/// Execute a CLI command.
pub async fn execute(cli: Cli) -> Result<()> {
    let poll_timeout = Duration::from_secs(cli.poll_timeout);

    match cli.command {
        Commands::Run {
            binary,
            stderr,
            env,
            dir,
            json,
            commands,
        } => {
            let settings = RunSettings {
                binary,
                stderr,
                env: env.into_iter().collect(),
                dir,
                json,
                poll_timeout,
            };
            run_commands(&commands, settings).await
        }
        Commands::Download {
            url,
            workers,
            output,
        } => run_download(url, workers, output, poll_timeout).await,
        Commands::FetchRange => {
            let bytes = download::run_from_env().await?;
            println!("{bytes}");
            Ok(())
        }
    }
}

fn build_handle(index: usize, line: &str, settings: &RunSettings) -> Result<ProcessHandle> {
    let mut options = ProcessOptions::shell(line)
        .buffer_mode(if settings.binary {
            BufferMode::Binary
        } else {
            BufferMode::Line
        })
        .error_capture(settings.stderr.into())
        .poll_timeout(settings.poll_timeout);
    if let Some(dir) = &settings.dir {
        options = options.working_dir(dir);
    }

    let handle = ProcessHandle::new(options)?;
    if settings.json {
        return Ok(handle);
    }
    Ok(handle
        .on_output(move |_, chunk| {
            for line in String::from_utf8_lossy(chunk).lines() {
                println!("[{index}] {line}");
            }
        })
        .on_error(move |_, chunk| {
            eprintln!("[{index}] {}", String::from_utf8_lossy(chunk));
        }))
}

async fn run_commands(commands: &[String], settings: RunSettings) -> Result<()> {
    let mut mux = ProcessMultiplexer::with_poll_timeout(settings.poll_timeout);
    for (index, line) in commands.iter().enumerate() {
        mux.attach(build_handle(index, line, &settings)?)?;
    }
    debug!(commands = mux.len(), "running commands");

    let env = settings.env;
    let mux = tokio::task::spawn_blocking(move || -> Result<ProcessMultiplexer> {
        mux.wait_with_env(&env)?;
        Ok(mux)
    })
    .await
    .context("Process multiplexer task panicked")??;

    let summaries: Vec<ProcessSummary> = mux.handles().iter().map(ProcessSummary::from).collect();

    if settings.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        print_table(&summaries, mux.process_time());
    }

    let failed = summaries.iter().filter(|s| !s.success()).count();
    if failed > 0 {
        bail!("{failed} of {} commands failed", summaries.len());
    }
    Ok(())
}

fn print_table(summaries: &[ProcessSummary], total: f64) {
    println!();
    println!("{:<4} {:<6} {:<9} {}", "#", "EXIT", "SECONDS", "COMMAND");
    println!("{}", "-".repeat(COMMAND_WIDTH + 22));
    for (index, summary) in summaries.iter().enumerate() {
        println!(
            "{:<4} {:<6} {:<9.3} {}",
            index,
            summary.exit_code,
            summary.process_time,
            truncate(&summary.command, COMMAND_WIDTH)
        );
        for error in &summary.errors {
            println!("{:<21}! {error}", "");
        }
    }
    println!();
    println!("Total: {total:.3}s");
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

async fn run_download(
    url: String,
    workers: usize,
    output: Option<PathBuf>,
    poll_timeout: Duration,
) -> Result<()> {
    println!("Downloading {url} with {workers} workers");
    let request = DownloadRequest {
        url,
        workers,
        output,
        worker: WorkerCommand::current_exe()?,
        poll_timeout,
    };
    let report = download::download(&request).await?;
    println!(
        "Downloaded {} bytes in {:.2}s to {}",
        report.bytes,
        report.elapsed.as_secs_f64(),
        report.output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_long_commands() {
        assert_eq!(truncate("echo hi", 10), "echo hi");
        assert_eq!(truncate("sleep 1; echo done", 10), "sleep 1...");
    }

    #[tokio::test]
    async fn run_reports_failures() {
        let settings = RunSettings {
            binary: false,
            stderr: StderrMode::Separate,
            env: HashMap::new(),
            dir: None,
            json: true,
            poll_timeout: Duration::from_secs(5),
        };
        let commands = ["true".to_string(), "exit 2".to_string()];
        let err = run_commands(&commands, settings).await.unwrap_err();
        assert_eq!(err.to_string(), "1 of 2 commands failed");
    }

    #[tokio::test]
    async fn run_succeeds_with_shared_env() {
        let settings = RunSettings {
            binary: true,
            stderr: StderrMode::Separate,
            env: HashMap::from([("X".to_string(), "1".to_string())]),
            dir: None,
            json: false,
            poll_timeout: Duration::from_secs(5),
        };
        let commands = ["[ \"$X\" = 1 ]".to_string()];
        run_commands(&commands, settings).await.unwrap();
    }
}
