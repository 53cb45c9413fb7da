//! Lifecycle of a single child process.
//!
//! A [`ProcessHandle`] spawns its child without waiting for it, drains the
//! child's pipes without blocking, and joins the child only after stdout has
//! reported end-of-stream. It can be driven on its own through
//! [`ProcessHandle::wait`] or by a [`ProcessMultiplexer`](super::ProcessMultiplexer)
//! through [`ProcessHandle::interests`] and [`ProcessHandle::drain_once`].

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::buffer::{trim_record, OutputBuffer, OutputSlice};
use super::error::{ProcessError, Result};
use super::options::{CommandLine, ErrorCapture, ProcessOptions, SHELL};
use super::readiness::{self, Interest};

/// Size of the scratch buffer used for each `read` call.
const READ_CHUNK: usize = 8192;

/// Callback receiving the handle on start or stop.
pub type LifecycleCallback = Box<dyn FnMut(&ProcessHandle) + Send>;

/// Callback receiving the handle and one appended chunk.
pub type AppendCallback = Box<dyn FnMut(&ProcessHandle, &[u8]) + Send>;

/// Where a handle is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Created,
    Running,
    Terminated,
}

#[derive(Default)]
struct Callbacks {
    on_start: Option<LifecycleCallback>,
    on_stop: Option<LifecycleCallback>,
    on_output: Option<AppendCallback>,
    on_error: Option<AppendCallback>,
}

#[derive(Clone, Copy)]
enum Lifecycle {
    Start,
    Stop,
}

/// Stdin payload not yet accepted by the child.
struct PendingInput {
    pipe: ChildStdin,
    payload: Vec<u8>,
    written: usize,
}

enum StreamStatus {
    Open,
    Closed,
}

/// Read everything currently available from a non-blocking pipe into `chunk`.
fn read_available(pipe: &mut impl Read, chunk: &mut Vec<u8>) -> io::Result<StreamStatus> {
    let mut scratch = [0u8; READ_CHUNK];
    loop {
        match pipe.read(&mut scratch) {
            Ok(0) => return Ok(StreamStatus::Closed),
            Ok(n) => chunk.extend_from_slice(&scratch[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(StreamStatus::Open),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

/// Exit code of a finished child; signal deaths map to `128 + signal`.
fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Owns one child process, its pipe ends and everything read from them.
pub struct ProcessHandle {
    options: ProcessOptions,
    state: ProcessState,
    child: Option<Child>,
    pid: Option<u32>,
    stdin: Option<PendingInput>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    started_at: Option<Instant>,
    elapsed: Duration,
    exit_status: Option<ExitStatus>,
    exit_code: i32,
    output: OutputBuffer,
    errors: Vec<String>,
    latest_cursor: usize,
    callbacks: Callbacks,
}

impl ProcessHandle {
    /// Configure a handle. Nothing is spawned until [`start`](Self::start).
    pub fn new(options: ProcessOptions) -> Result<Self> {
        readiness::ensure_supported()?;
        let output = OutputBuffer::new(options.buffer_mode);
        Ok(Self {
            options,
            state: ProcessState::Created,
            child: None,
            pid: None,
            stdin: None,
            stdout: None,
            stderr: None,
            started_at: None,
            elapsed: Duration::ZERO,
            exit_status: None,
            exit_code: 0,
            output,
            errors: Vec::new(),
            latest_cursor: 0,
            callbacks: Callbacks::default(),
        })
    }

    /// Called with the handle right after the child is spawned.
    pub fn on_start(mut self, callback: impl FnMut(&Self) + Send + 'static) -> Self {
        self.callbacks.on_start = Some(Box::new(callback));
        self
    }

    /// Called with the handle once the child has been joined.
    pub fn on_stop(mut self, callback: impl FnMut(&Self) + Send + 'static) -> Self {
        self.callbacks.on_stop = Some(Box::new(callback));
        self
    }

    /// Called for every non-empty stdout chunk, after it was appended.
    pub fn on_output(mut self, callback: impl FnMut(&Self, &[u8]) + Send + 'static) -> Self {
        self.callbacks.on_output = Some(Box::new(callback));
        self
    }

    /// Called for every non-empty stderr chunk (separate capture only).
    pub fn on_error(mut self, callback: impl FnMut(&Self, &[u8]) + Send + 'static) -> Self {
        self.callbacks.on_error = Some(Box::new(callback));
        self
    }

    /// Spawn the child and return immediately.
    pub fn start(&mut self) -> Result<()> {
        self.start_with_env(None)
    }

    /// Spawn the child with `shared` layered under the handle's own environment.
    ///
    /// Keys set on the handle win over `shared`; both win over the inherited
    /// environment. Starting a terminated handle discards its previous results.
    pub fn start_with_env(&mut self, shared: Option<&HashMap<String, String>>) -> Result<()> {
        if self.state == ProcessState::Running {
            return Err(ProcessError::AlreadyRunning {
                command: self.command_line(),
            });
        }
        self.reset();

        let mut cmd = self.build_command(shared);
        let started_at = Instant::now();
        let mut child = cmd.spawn().map_err(|source| ProcessError::SpawnFailure {
            command: self.command_line(),
            source,
        })?;

        self.pid = Some(child.id());
        self.stdout = child.stdout.take();
        self.stderr = child.stderr.take();
        let stdin = child.stdin.take();
        self.child = Some(child);
        self.started_at = Some(started_at);
        self.state = ProcessState::Running;

        if let Err(e) = self.prepare_pipes(stdin) {
            self.stop()?;
            return Err(e);
        }

        debug!(pid = ?self.pid, command = %self.options.command, "process started");
        self.fire_lifecycle(Lifecycle::Start);
        Ok(())
    }

    fn build_command(&self, shared: Option<&HashMap<String, String>>) -> Command {
        let mut cmd = match &self.options.command {
            CommandLine::Shell(line) => {
                let mut cmd = Command::new(SHELL);
                cmd.arg("-c").arg(line);
                cmd
            }
            CommandLine::Exec { program, args } => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
        };

        if let Some(ref dir) = self.options.working_dir {
            cmd.current_dir(dir);
        }

        if self.options.env_clear {
            cmd.env_clear();
        }

        for key in &self.options.env_remove {
            cmd.env_remove(key);
        }

        if let Some(shared) = shared {
            cmd.envs(shared);
        }
        cmd.envs(&self.options.env);

        let has_input = self.options.stdin.as_ref().is_some_and(|p| !p.is_empty());
        cmd.stdin(if has_input { Stdio::piped() } else { Stdio::null() });
        cmd.stdout(Stdio::piped());
        cmd.stderr(match self.options.error_capture {
            ErrorCapture::Separate => Stdio::piped(),
            ErrorCapture::Inherit => Stdio::inherit(),
        });
        cmd
    }

    fn prepare_pipes(&mut self, stdin: Option<ChildStdin>) -> Result<()> {
        if let Some(ref stdout) = self.stdout {
            readiness::set_nonblocking(stdout)?;
        }
        if let Some(ref stderr) = self.stderr {
            readiness::set_nonblocking(stderr)?;
        }
        if let (Some(pipe), Some(payload)) = (stdin, self.options.stdin.clone()) {
            readiness::set_nonblocking(&pipe)?;
            self.stdin = Some(PendingInput {
                pipe,
                payload,
                written: 0,
            });
            self.flush_stdin()?;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.pid = None;
        self.started_at = None;
        self.elapsed = Duration::ZERO;
        self.exit_status = None;
        self.exit_code = 0;
        self.output = OutputBuffer::new(self.options.buffer_mode);
        self.errors.clear();
        self.latest_cursor = 0;
    }

    /// Write as much pending stdin as the pipe accepts; close it once done.
    fn flush_stdin(&mut self) -> Result<()> {
        let Some(pending) = self.stdin.as_mut() else {
            return Ok(());
        };
        while pending.written < pending.payload.len() {
            match pending.pipe.write(&pending.payload[pending.written..]) {
                Ok(n) => pending.written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    debug!(pid = ?self.pid, "child closed stdin before reading all input");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.stdin = None;
        Ok(())
    }

    /// Pipe ends that should take part in the next readiness check.
    pub fn interests(&self) -> Vec<Interest<'_>> {
        let mut interests = Vec::with_capacity(3);
        if let Some(ref stdout) = self.stdout {
            interests.push(Interest::Stdout(stdout));
        }
        if let Some(ref stderr) = self.stderr {
            interests.push(Interest::Stderr(stderr));
        }
        if let Some(ref pending) = self.stdin {
            interests.push(Interest::Stdin(&pending.pipe));
        }
        interests
    }

    /// Read whatever is available right now and append it.
    ///
    /// Returns `false` exactly when stdout reported end-of-stream, in which
    /// case the handle has already been stopped.
    pub fn drain_once(&mut self) -> Result<bool> {
        if self.state != ProcessState::Running {
            return Ok(false);
        }
        self.flush_stdin()?;
        self.drain_stderr()?;

        let mut chunk = Vec::new();
        let status = match self.stdout.as_mut() {
            Some(stdout) => read_available(stdout, &mut chunk)?,
            None => StreamStatus::Closed,
        };
        if !chunk.is_empty() {
            self.append_output(&chunk);
        }

        match status {
            StreamStatus::Open => Ok(true),
            StreamStatus::Closed => {
                self.drain_stderr()?;
                self.stop()?;
                Ok(false)
            }
        }
    }

    fn drain_stderr(&mut self) -> Result<()> {
        let Some(stderr) = self.stderr.as_mut() else {
            return Ok(());
        };
        let mut chunk = Vec::new();
        let status = read_available(stderr, &mut chunk)?;
        if let StreamStatus::Closed = status {
            self.stderr = None;
        }
        if !chunk.is_empty() {
            self.append_error(&chunk);
        }
        Ok(())
    }

    fn append_output(&mut self, chunk: &[u8]) {
        let payload = self.output.append(chunk);
        trace!(pid = ?self.pid, bytes = chunk.len(), "stdout chunk");
        if let Some(mut callback) = self.callbacks.on_output.take() {
            callback(&*self, payload);
            self.callbacks.on_output = Some(callback);
        }
    }

    fn append_error(&mut self, chunk: &[u8]) {
        let record = trim_record(chunk);
        self.errors.push(String::from_utf8_lossy(record).into_owned());
        trace!(pid = ?self.pid, bytes = chunk.len(), "stderr chunk");
        if let Some(mut callback) = self.callbacks.on_error.take() {
            callback(&*self, record);
            self.callbacks.on_error = Some(callback);
        }
    }

    fn fire_lifecycle(&mut self, event: Lifecycle) {
        let slot = match event {
            Lifecycle::Start => &mut self.callbacks.on_start,
            Lifecycle::Stop => &mut self.callbacks.on_stop,
        };
        if let Some(mut callback) = slot.take() {
            callback(&*self);
            match event {
                Lifecycle::Start => self.callbacks.on_start = Some(callback),
                Lifecycle::Stop => self.callbacks.on_stop = Some(callback),
            }
        }
    }

    /// Close every pipe, join the child and return its exit code.
    ///
    /// Idempotent: a handle that is not running returns its cached exit code
    /// (0 for a handle that never ran) without side effects. If the join
    /// fails the handle stays running, keeps its child and can be stopped again.
    pub fn stop(&mut self) -> Result<i32> {
        if self.state != ProcessState::Running {
            return Ok(self.exit_code);
        }

        self.stdin = None;
        self.stdout = None;
        self.stderr = None;

        if let Some(child) = self.child.as_mut() {
            let status = child.wait()?;
            self.exit_status = Some(status);
            self.exit_code = exit_code_of(status);
        }
        self.child = None;
        if let Some(started_at) = self.started_at {
            self.elapsed = started_at.elapsed();
        }
        self.state = ProcessState::Terminated;

        debug!(
            pid = ?self.pid,
            exit_code = self.exit_code,
            elapsed_ms = self.elapsed.as_millis(),
            "process stopped"
        );
        self.fire_lifecycle(Lifecycle::Stop);
        Ok(self.exit_code)
    }

    /// Drive this handle alone until stdout closes, then return the exit code.
    ///
    /// Each iteration waits at most the configured poll timeout; a timeout
    /// with nothing ready simply polls again.
    pub fn wait(&mut self) -> Result<i32> {
        match self.state {
            ProcessState::Created => {
                return Err(ProcessError::NotStarted {
                    command: self.command_line(),
                })
            }
            ProcessState::Terminated => return Ok(self.exit_code),
            ProcessState::Running => {}
        }

        loop {
            let ready = readiness::wait_ready(&self.interests(), self.options.poll_timeout)
                .map_err(ProcessError::Interrupted)?;
            if ready.contains(&true) && !self.drain_once()? {
                return Ok(self.exit_code);
            }
        }
    }

    /// Records appended since the previous call.
    pub fn latest_output(&mut self) -> OutputSlice<'_> {
        let cursor = self.latest_cursor;
        self.latest_cursor = self.output.len();
        self.output.since(cursor)
    }

    /// Everything read from stdout so far.
    pub const fn output(&self) -> &OutputBuffer {
        &self.output
    }

    /// One record per stderr chunk (separate capture only).
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Exit code of the last run; meaningful once the handle is terminated.
    pub const fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub const fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Wall-clock time of the last run, or of the current run so far.
    pub fn elapsed(&self) -> Duration {
        match (self.state, self.started_at) {
            (ProcessState::Running, Some(started_at)) => started_at.elapsed(),
            _ => self.elapsed,
        }
    }

    /// [`elapsed`](Self::elapsed) in fractional seconds.
    pub fn process_time(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub const fn state(&self) -> ProcessState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ProcessState::Running
    }

    pub const fn options(&self) -> &ProcessOptions {
        &self.options
    }

    /// The command as a display string.
    pub fn command_line(&self) -> String {
        self.options.command.to_string()
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("command", &self.options.command)
            .field("state", &self.state)
            .field("pid", &self.pid)
            .field("exit_code", &self.exit_code)
            .field("output_len", &self.output.len())
            .field("errors", &self.errors.len())
            .finish_non_exhaustive()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(pid = ?self.pid, error = %e, "failed to stop process on drop");
        }
    }
}
