//! Configuration for a single child process.
//!
//! Provides a builder covering:
//! - Shell command lines or explicit program + argument vectors
//! - Environment variable management
//! - Working directory configuration
//! - An optional stdin payload
//! - Output framing and stderr capture policy

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::buffer::BufferMode;

/// Default bound on a single readiness check.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Shell used to run [`CommandLine::Shell`] commands.
pub const SHELL: &str = "/bin/sh";

/// What gets executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// A command line handed to `/bin/sh -c`.
    Shell(String),
    /// A program and its arguments, executed directly.
    Exec { program: String, args: Vec<String> },
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell(line) => f.write_str(line),
            Self::Exec { program, args } => {
                f.write_str(program)?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                Ok(())
            }
        }
    }
}

/// Where the child's standard error goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorCapture {
    /// Stderr is a second pipe with its own records and callback.
    #[default]
    Separate,
    /// Stderr is inherited from the parent; only stdout is captured.
    Inherit,
}

/// Configuration options for a process handle.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// The command to execute.
    pub command: CommandLine,

    /// Working directory for the process (default: the caller's).
    pub working_dir: Option<PathBuf>,

    /// Environment variables to set (merged over the inherited env).
    pub env: HashMap<String, String>,

    /// Environment variables to remove.
    pub env_remove: Vec<String>,

    /// Whether to clear the environment before adding env vars.
    pub env_clear: bool,

    /// Bytes written to the child's stdin once, after which stdin is closed.
    pub stdin: Option<Vec<u8>>,

    /// How drained stdout bytes are framed into records.
    pub buffer_mode: BufferMode,

    /// Whether stderr is captured separately or inherited.
    pub error_capture: ErrorCapture,

    /// Bound on each readiness check in a standalone `wait`.
    pub poll_timeout: Duration,
}

impl ProcessOptions {
    /// Create options that execute `program` directly.
    pub fn new(program: impl Into<String>) -> Self {
        Self::with_command(CommandLine::Exec {
            program: program.into(),
            args: Vec::new(),
        })
    }

    /// Create options that run `line` through `/bin/sh -c`.
    pub fn shell(line: impl Into<String>) -> Self {
        Self::with_command(CommandLine::Shell(line.into()))
    }

    fn with_command(command: CommandLine) -> Self {
        Self {
            command,
            working_dir: None,
            env: HashMap::new(),
            env_remove: Vec::new(),
            env_clear: false,
            stdin: None,
            buffer_mode: BufferMode::default(),
            error_capture: ErrorCapture::default(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    /// Add an argument. Ignored for shell command lines.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        if let CommandLine::Exec { args, .. } = &mut self.command {
            args.push(arg.into());
        }
        self
    }

    /// Add multiple arguments. Ignored for shell command lines.
    pub fn args<I, S>(mut self, new_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let CommandLine::Exec { args, .. } = &mut self.command {
            args.extend(new_args.into_iter().map(Into::into));
        }
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set multiple environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.env.insert(k.into(), v.into());
        }
        self
    }

    /// Remove an environment variable.
    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    /// Clear the environment before setting variables.
    pub fn env_clear(mut self) -> Self {
        self.env_clear = true;
        self
    }

    /// Write `payload` to the child's stdin after spawning.
    pub fn stdin(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    /// Set the output framing.
    pub fn buffer_mode(mut self, mode: BufferMode) -> Self {
        self.buffer_mode = mode;
        self
    }

    /// Set the stderr capture policy.
    pub fn error_capture(mut self, capture: ErrorCapture) -> Self {
        self.error_capture = capture;
        self
    }

    /// Set the bound on each readiness check.
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_builder_collects_args() {
        let options = ProcessOptions::new("ls").arg("-l").args(["-a", "/tmp"]);
        assert_eq!(
            options.command,
            CommandLine::Exec {
                program: "ls".to_string(),
                args: vec!["-l".to_string(), "-a".to_string(), "/tmp".to_string()],
            }
        );
        assert_eq!(options.command.to_string(), "ls -l -a /tmp");
    }

    #[test]
    fn shell_ignores_args() {
        let options = ProcessOptions::shell("echo hi").arg("ignored");
        assert_eq!(options.command, CommandLine::Shell("echo hi".to_string()));
    }

    #[test]
    fn defaults() {
        let options = ProcessOptions::shell("true");
        assert_eq!(options.buffer_mode, BufferMode::Line);
        assert_eq!(options.error_capture, ErrorCapture::Separate);
        assert_eq!(options.poll_timeout, DEFAULT_POLL_TIMEOUT);
        assert!(options.stdin.is_none());
        assert!(options.working_dir.is_none());
    }

    #[test]
    fn later_env_values_win() {
        let options = ProcessOptions::shell("true")
            .env("A", "1")
            .envs([("A", "2"), ("B", "3")]);
        assert_eq!(options.env.get("A").map(String::as_str), Some("2"));
        assert_eq!(options.env.get("B").map(String::as_str), Some("3"));
    }
}
