//! Bounded readiness checks over child pipe descriptors.

use std::process::{ChildStderr, ChildStdin, ChildStdout};
use std::time::Duration;

use super::error::ProcessError;

/// One pipe end a handle wants to hear about.
#[derive(Debug, Clone, Copy)]
pub enum Interest<'a> {
    Stdout(&'a ChildStdout),
    Stderr(&'a ChildStderr),
    /// Writable interest while a stdin payload is still being flushed.
    Stdin(&'a ChildStdin),
}

/// Refuse hosts whose process model lacks pollable non-blocking pipes.
pub fn ensure_supported() -> Result<(), ProcessError> {
    if cfg!(unix) {
        Ok(())
    } else {
        Err(ProcessError::InvalidPlatform {
            platform: std::env::consts::OS,
        })
    }
}

pub use imp::{set_nonblocking, wait_ready};

#[cfg(unix)]
mod imp {
    use super::{Duration, Interest};
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
    use std::io;
    use std::os::fd::{AsFd, AsRawFd, BorrowedFd};

    impl<'a> Interest<'a> {
        fn fd(&self) -> BorrowedFd<'a> {
            match *self {
                Self::Stdout(pipe) => pipe.as_fd(),
                Self::Stderr(pipe) => pipe.as_fd(),
                Self::Stdin(pipe) => pipe.as_fd(),
            }
        }

        fn events(&self) -> PollFlags {
            match self {
                Self::Stdout(_) | Self::Stderr(_) => PollFlags::POLLIN,
                Self::Stdin(_) => PollFlags::POLLOUT,
            }
        }
    }

    pub(super) fn poll_timeout(timeout: Duration) -> PollTimeout {
        PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX)
    }

    /// Put a pipe end into non-blocking mode.
    pub fn set_nonblocking(pipe: &impl AsRawFd) -> io::Result<()> {
        let fd = pipe.as_raw_fd();
        let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
        fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
        Ok(())
    }

    /// Wait up to `timeout` for any interest to become ready.
    ///
    /// Returns one flag per interest, in order. A timeout is not an error: it
    /// yields all `false`. Hang-up and error conditions count as ready so the
    /// caller observes end-of-stream on its next read.
    ///
    /// Timeouts longer than `i32::MAX` milliseconds are clamped.
    pub fn wait_ready(interests: &[Interest<'_>], timeout: Duration) -> io::Result<Vec<bool>> {
        let mut fds: Vec<PollFd<'_>> = interests
            .iter()
            .map(|interest| PollFd::new(interest.fd(), interest.events()))
            .collect();

        let selected = poll(&mut fds, poll_timeout(timeout))?;
        if selected == 0 {
            return Ok(vec![false; fds.len()]);
        }

        let wake = PollFlags::POLLIN | PollFlags::POLLOUT | PollFlags::POLLHUP | PollFlags::POLLERR;
        Ok(fds
            .iter()
            .map(|fd| fd.revents().is_some_and(|events| events.intersects(wake)))
            .collect())
    }
}

#[cfg(not(unix))]
mod imp {
    use super::{Duration, Interest};
    use std::io;

    pub fn set_nonblocking<T>(_pipe: &T) -> io::Result<()> {
        Err(io::ErrorKind::Unsupported.into())
    }

    pub fn wait_ready(_interests: &[Interest<'_>], _timeout: Duration) -> io::Result<Vec<bool>> {
        Err(io::ErrorKind::Unsupported.into())
    }
}
