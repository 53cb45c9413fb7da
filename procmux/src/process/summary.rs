//! Serializable snapshot of a handle's results.

use serde::Serialize;

use super::buffer::OutputBuffer;
use super::handle::{ProcessHandle, ProcessState};

/// Result of one process, suitable for JSON reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessSummary {
    pub command: String,
    pub pid: Option<u32>,
    pub state: &'static str,
    pub exit_code: i32,
    pub process_time: f64,
    /// Line records, or `None` in binary mode.
    pub output: Option<Vec<String>>,
    /// Byte count of the output buffer.
    pub output_bytes: usize,
    pub errors: Vec<String>,
}

impl ProcessSummary {
    /// Whether the process terminated with exit code 0.
    pub fn success(&self) -> bool {
        self.state == "terminated" && self.exit_code == 0
    }
}

impl From<&ProcessHandle> for ProcessSummary {
    fn from(handle: &ProcessHandle) -> Self {
        let (output, output_bytes) = match handle.output() {
            OutputBuffer::Lines(lines) => (
                Some(lines.clone()),
                lines.iter().map(String::len).sum(),
            ),
            OutputBuffer::Binary(bytes) => (None, bytes.len()),
        };
        Self {
            command: handle.command_line(),
            pid: handle.pid(),
            state: match handle.state() {
                ProcessState::Created => "created",
                ProcessState::Running => "running",
                ProcessState::Terminated => "terminated",
            },
            exit_code: handle.exit_code(),
            process_time: handle.process_time(),
            output,
            output_bytes,
            errors: handle.errors().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{BufferMode, ProcessOptions};

    #[test]
    fn summarises_line_output() {
        let mut handle = ProcessHandle::new(ProcessOptions::shell("echo hi; exit 3")).unwrap();
        handle.start().unwrap();
        handle.wait().unwrap();

        let summary = ProcessSummary::from(&handle);
        assert_eq!(summary.command, "echo hi; exit 3");
        assert_eq!(summary.state, "terminated");
        assert_eq!(summary.exit_code, 3);
        assert_eq!(summary.output, Some(vec!["hi".to_string()]));
        assert!(!summary.success());

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["exit_code"], 3);
        assert_eq!(json["output"][0], "hi");
    }

    #[test]
    fn binary_output_is_counted_not_copied() {
        let mut handle = ProcessHandle::new(
            ProcessOptions::new("printf")
                .arg("abc")
                .buffer_mode(BufferMode::Binary),
        )
        .unwrap();
        handle.start().unwrap();
        handle.wait().unwrap();

        let summary = ProcessSummary::from(&handle);
        assert_eq!(summary.output, None);
        assert_eq!(summary.output_bytes, 3);
        assert!(summary.success());
    }

    #[test]
    fn unstarted_handle() {
        let handle = ProcessHandle::new(ProcessOptions::shell("true")).unwrap();
        let summary = ProcessSummary::from(&handle);
        assert_eq!(summary.state, "created");
        assert_eq!(summary.pid, None);
        assert!(!summary.success());
    }
}
