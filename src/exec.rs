//! External command execution with timeouts.
//!
//! Every VCS client invocation goes through [`Executor`]: stdout/stderr are
//! drained on helper threads so a chatty child never blocks on a full pipe,
//! and the child is killed once the timeout elapses.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{HistoryError, Result};

/// Which timeout applies to a command: long for background indexing,
/// short for interactive (UI) requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandTimeoutType {
    Indexer,
    Interactive,
}

/// Captured output of a finished command.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stdout decoded lossily (VCS output may contain non-UTF-8 file names or messages).
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(5);

pub struct Executor {
    program: String,
    args: Vec<String>,
    dir: PathBuf,
    timeout: Duration,
}

impl Executor {
    pub fn new(program: &str, dir: &Path, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            dir: dir.to_path_buf(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn display(&self) -> String {
        let mut s = self.program.clone();
        for a in &self.args {
            s.push(' ');
            s.push_str(a);
        }
        s
    }

    /// Run the command and return its output regardless of exit status.
    /// Fails only when the command cannot be spawned or times out.
    pub fn run(&self) -> Result<CommandOutput> {
        let start = Instant::now();
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| HistoryError::Command {
                command: self.display(),
                dir: self.dir.display().to_string(),
                message: format!("cannot spawn: {}", e),
            })?;

        let stdout_reader = child.stdout.take().map(|mut out| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = out.read_to_end(&mut buf);
                buf
            })
        });
        let stderr_reader = child.stderr.take().map(|mut err| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = err.read_to_end(&mut buf);
                buf
            })
        });

        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if start.elapsed() >= self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(HistoryError::CommandTimeout {
                        command: self.display(),
                        secs: self.timeout.as_secs(),
                    });
                }
                None => std::thread::sleep(POLL_INTERVAL),
            }
        };

        let stdout = stdout_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        let stderr = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        debug!(
            command = %self.display(),
            dir = %self.dir.display(),
            status = ?status.code(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "command finished"
        );

        Ok(CommandOutput {
            status: status.code(),
            stdout,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    /// Run the command and require a zero exit status.
    pub fn run_checked(&self) -> Result<CommandOutput> {
        let output = self.run()?;
        if !output.success() {
            return Err(HistoryError::Command {
                command: self.display(),
                dir: self.dir.display().to_string(),
                message: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_captures_stdout() {
        let tmp = tempfile::tempdir().unwrap();
        let out = Executor::new("sh", tmp.path(), Duration::from_secs(10))
            .args(["-c", "echo hello"])
            .run_checked()
            .unwrap();
        assert_eq!(out.stdout_lossy().trim(), "hello");
    }

    #[test]
    fn test_nonzero_exit_is_error_when_checked() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = Executor::new("sh", tmp.path(), Duration::from_secs(10))
            .args(["-c", "echo boom >&2; exit 3"]);
        let out = exec.run().unwrap();
        assert_eq!(out.status, Some(3));
        assert_eq!(out.stderr.trim(), "boom");
        match exec.run_checked() {
            Err(HistoryError::Command { message, .. }) => assert_eq!(message, "boom"),
            other => panic!("expected Command error, got {:?}", other),
        }
    }

    #[test]
    fn test_timeout_kills_child() {
        let tmp = tempfile::tempdir().unwrap();
        let start = Instant::now();
        let result = Executor::new("sh", tmp.path(), Duration::from_millis(200))
            .args(["-c", "sleep 10"])
            .run();
        assert!(matches!(result, Err(HistoryError::CommandTimeout { .. })));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_missing_binary_is_command_error() {
        let tmp = tempfile::tempdir().unwrap();
        let result = Executor::new("definitely-not-a-real-binary-xyz", tmp.path(), Duration::from_secs(1)).run();
        assert!(matches!(result, Err(HistoryError::Command { .. })));
    }

    #[test]
    fn test_runs_in_working_directory() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("marker.txt"), "x").unwrap();
        let out = Executor::new("ls", tmp.path(), Duration::from_secs(10))
            .run_checked()
            .unwrap();
        assert!(out.stdout_lossy().contains("marker.txt"));
    }
}
