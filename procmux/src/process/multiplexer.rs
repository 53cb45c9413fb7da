//! Multiplexer driving many process handles to completion.
//!
//! One thread polls the readable pipes of every active handle and drains
//! whichever report readiness. The children themselves run in parallel as
//! ordinary OS processes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::error::{ProcessError, Result};
use super::handle::ProcessHandle;
use super::options::DEFAULT_POLL_TIMEOUT;
use super::readiness;

/// Where the multiplexer is in its single `wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Accepting handles.
    Idle,
    /// `wait` has begun (it may have failed part-way).
    Waiting,
    /// Every handle has terminated.
    Finished,
}

/// A set of process handles started together and waited on together.
///
/// # Example
///
/// ```rust,no_run
/// use procmux::process::{ProcessHandle, ProcessMultiplexer, ProcessOptions};
///
/// fn main() -> anyhow::Result<()> {
///     let mut mux = ProcessMultiplexer::new();
///     mux.attach(ProcessHandle::new(ProcessOptions::shell("sleep 2; echo a"))?)?;
///     mux.attach(ProcessHandle::new(ProcessOptions::shell("sleep 1; echo b"))?)?;
///
///     // Both children run concurrently: this takes about two seconds.
///     mux.wait()?;
///
///     for handle in mux.handles() {
///         println!("{} -> {}", handle.command_line(), handle.exit_code());
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct ProcessMultiplexer {
    handles: Vec<ProcessHandle>,
    phase: Phase,
    poll_timeout: Duration,
    total_time: Option<Duration>,
}

impl ProcessMultiplexer {
    /// Create an empty multiplexer with the default poll timeout.
    pub const fn new() -> Self {
        Self::with_poll_timeout(DEFAULT_POLL_TIMEOUT)
    }

    /// Create an empty multiplexer whose readiness checks wait at most `timeout`.
    pub const fn with_poll_timeout(timeout: Duration) -> Self {
        Self {
            handles: Vec::new(),
            phase: Phase::Idle,
            poll_timeout: timeout,
            total_time: None,
        }
    }

    /// Add a handle. Fails once `wait` has begun.
    pub fn attach(&mut self, handle: ProcessHandle) -> Result<&mut Self> {
        if self.phase != Phase::Idle {
            return Err(ProcessError::AlreadyStarted);
        }
        self.handles.push(handle);
        Ok(self)
    }

    /// Start every handle and drive them all until each has terminated.
    pub fn wait(&mut self) -> Result<()> {
        self.run(None)
    }

    /// Like [`wait`](Self::wait), layering `env` under every handle's own environment.
    pub fn wait_with_env(&mut self, env: &HashMap<String, String>) -> Result<()> {
        self.run(Some(env))
    }

    /// The poll loop.
    ///
    /// A failed readiness check aborts with [`ProcessError::Interrupted`] and
    /// leaves the remaining handles running; they are stopped only when the
    /// caller stops them or drops the multiplexer.
    fn run(&mut self, env: Option<&HashMap<String, String>>) -> Result<()> {
        if self.phase != Phase::Idle {
            return Err(ProcessError::AlreadyStarted);
        }
        self.phase = Phase::Waiting;

        let start = Instant::now();
        for handle in &mut self.handles {
            handle.start_with_env(env)?;
        }
        debug!(processes = self.handles.len(), "all processes started");

        let mut active: Vec<usize> = (0..self.handles.len()).collect();
        while !active.is_empty() {
            let ready = self.poll_active(&active)?;
            for index in ready {
                if !self.handles[index].drain_once()? {
                    active.retain(|&i| i != index);
                    trace!(index, remaining = active.len(), "process finished");
                }
            }
        }

        let total = start.elapsed();
        self.total_time = Some(total);
        self.phase = Phase::Finished;
        debug!(
            processes = self.handles.len(),
            elapsed_ms = total.as_millis(),
            "all processes terminated"
        );
        Ok(())
    }

    /// One readiness check over every active handle; returns the ready ones in attachment order.
    fn poll_active(&self, active: &[usize]) -> Result<Vec<usize>> {
        let mut interests = Vec::new();
        let mut owners = Vec::new();
        for &index in active {
            for interest in self.handles[index].interests() {
                interests.push(interest);
                owners.push(index);
            }
        }

        let ready = readiness::wait_ready(&interests, self.poll_timeout)
            .map_err(ProcessError::Interrupted)?;

        let mut handles: Vec<usize> = owners
            .into_iter()
            .zip(ready)
            .filter_map(|(owner, is_ready)| is_ready.then_some(owner))
            .collect();
        handles.dedup();
        trace!(ready = handles.len(), polled = interests.len(), "poll iteration");
        Ok(handles)
    }

    /// Wall-clock time from starting all handles to the last one terminating.
    pub const fn total_time(&self) -> Option<Duration> {
        self.total_time
    }

    /// [`total_time`](Self::total_time) in fractional seconds, 0 before `wait` completes.
    pub fn process_time(&self) -> f64 {
        self.total_time.map_or(0.0, |total| total.as_secs_f64())
    }

    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Attached handles in attachment order.
    pub fn handles(&self) -> &[ProcessHandle] {
        &self.handles
    }

    pub fn handles_mut(&mut self) -> &mut [ProcessHandle] {
        &mut self.handles
    }

    /// Give up the multiplexer, keeping its handles.
    pub fn into_handles(self) -> Vec<ProcessHandle> {
        self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Default for ProcessMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessOptions, ProcessState};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    fn handle(line: &str) -> ProcessHandle {
        ProcessHandle::new(ProcessOptions::shell(line)).unwrap()
    }

    #[test]
    fn test_mux_basic() {
        let mut mux = ProcessMultiplexer::new();
        mux.attach(handle("echo hello")).unwrap();
        mux.wait().unwrap();

        assert_eq!(mux.phase(), Phase::Finished);
        assert_eq!(mux.handles()[0].output().lines(), ["hello"]);
        assert_eq!(mux.handles()[0].state(), ProcessState::Terminated);
    }

    #[test]
    fn test_mux_runs_concurrently() {
        let mut mux = ProcessMultiplexer::new();
        mux.attach(handle("sleep 2; echo 'cmd1 1'"))
            .unwrap()
            .attach(handle("sleep 2; echo 'cmd2 1'; sleep 2; echo 'cmd2 2'"))
            .unwrap()
            .attach(handle("sleep 1; echo 'cmd3 1'; sleep 1; echo 'cmd3 2'"))
            .unwrap();
        mux.wait().unwrap();

        let total = mux.process_time();
        assert!((total - 4.0).abs() < 0.1, "total {total}");
        assert_eq!(mux.handles()[1].output().lines(), ["cmd2 1", "cmd2 2"]);
        assert_eq!(mux.handles()[2].output().lines(), ["cmd3 1", "cmd3 2"]);
        for handle in mux.handles() {
            assert_eq!(handle.exit_code(), 0);
            assert!(!handle.is_running());
        }
    }

    #[test]
    fn test_mux_collects_exit_codes_and_errors() {
        let mut mux = ProcessMultiplexer::new();
        mux.attach(handle("exit 0")).unwrap();
        mux.attach(handle("echo oops >&2; exit 1")).unwrap();
        mux.attach(handle("exit 4")).unwrap();
        mux.wait().unwrap();

        let codes: Vec<i32> = mux.handles().iter().map(ProcessHandle::exit_code).collect();
        assert_eq!(codes, [0, 1, 4]);
        assert_eq!(mux.handles()[1].errors(), ["oops"]);
    }

    #[test]
    fn test_mux_callbacks_fire_per_chunk() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut mux = ProcessMultiplexer::new();
        mux.attach(
            handle("echo foo; sleep 0.3; echo bar").on_output(move |_, chunk| {
                sink.lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(chunk).into_owned());
            }),
        )
        .unwrap();
        mux.attach(handle("sleep 0.5")).unwrap();
        mux.wait().unwrap();

        assert_eq!(*seen.lock().unwrap(), ["foo", "bar"]);
    }

    #[test]
    fn test_mux_shared_env() {
        let env = HashMap::from([("GREETING".to_string(), "hi".to_string())]);
        let mut mux = ProcessMultiplexer::new();
        mux.attach(handle("echo $GREETING")).unwrap();
        mux.attach(
            ProcessHandle::new(ProcessOptions::shell("echo $GREETING").env("GREETING", "bye"))
                .unwrap(),
        )
        .unwrap();
        mux.wait_with_env(&env).unwrap();

        assert_eq!(mux.handles()[0].output().lines(), ["hi"]);
        assert_eq!(mux.handles()[1].output().lines(), ["bye"]);
    }

    #[test]
    fn test_mux_empty_finishes_immediately() {
        let mut mux = ProcessMultiplexer::new();
        assert!(mux.is_empty());
        mux.wait().unwrap();
        assert_eq!(mux.phase(), Phase::Finished);
        assert!(mux.total_time().is_some());
    }

    #[test]
    fn test_mux_rejects_late_attach_and_second_wait() {
        let mut mux = ProcessMultiplexer::new();
        assert_eq!(mux.process_time(), 0.0);
        mux.attach(handle("true")).unwrap();
        mux.wait().unwrap();

        assert!(matches!(
            mux.attach(handle("true")),
            Err(ProcessError::AlreadyStarted)
        ));
        assert!(matches!(mux.wait(), Err(ProcessError::AlreadyStarted)));
        assert_eq!(mux.len(), 1);
    }

    #[test]
    fn test_mux_spawn_failure_propagates() {
        let mut mux = ProcessMultiplexer::new();
        mux.attach(ProcessHandle::new(ProcessOptions::new("nonexistent_command_12345")).unwrap())
            .unwrap();
        assert!(matches!(
            mux.wait(),
            Err(ProcessError::SpawnFailure { .. })
        ));
    }

    #[test]
    fn test_mux_interrupted_leaves_children_running() {
        use nix::sys::pthread::{pthread_kill, pthread_self};
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        signal_hook::flag::register(signal_hook::consts::SIGUSR1, Arc::new(AtomicBool::new(false)))
            .unwrap();

        let waiter = pthread_self();
        let done = Arc::new(AtomicBool::new(false));
        let done_flag = Arc::clone(&done);
        let interrupter = std::thread::spawn(move || {
            while !done_flag.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(100));
                let _ = pthread_kill(waiter, Signal::SIGUSR1);
            }
        });

        let mut mux = ProcessMultiplexer::new();
        mux.attach(ProcessHandle::new(ProcessOptions::new("sleep").arg("30")).unwrap())
            .unwrap();
        let result = mux.wait();
        done.store(true, Ordering::SeqCst);
        interrupter.join().unwrap();

        assert!(matches!(result, Err(ProcessError::Interrupted(_))));
        assert_eq!(mux.phase(), Phase::Waiting);
        assert!(mux.total_time().is_none());

        let child = &mut mux.handles_mut()[0];
        assert!(child.is_running());
        let pid = Pid::from_raw(i32::try_from(child.pid().unwrap()).unwrap());
        kill(pid, Signal::SIGKILL).unwrap();
        assert_eq!(child.stop().unwrap(), 128 + 9);
    }
}
