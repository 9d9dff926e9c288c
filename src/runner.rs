//! External process execution with captured stderr and a hard timeout.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Upper bound on the stderr bytes surfaced to clients.
pub const STDERR_PREFIX_BYTES: usize = 600;

/// How long to wait for stderr to close after the converter exits.
const STDERR_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// A fully resolved converter command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Stored upload the converter reads.
    pub input: PathBuf,
    /// File the converter is expected to produce.
    pub output: PathBuf,
}

impl Invocation {
    pub fn new(program: impl Into<String>, input: PathBuf, output: PathBuf) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            input,
            output,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        let arg = path.to_string_lossy().into_owned();
        self.arg(arg)
    }

    /// Appends the expected output path as the final argument.
    pub fn output_arg(self) -> Self {
        let output = self.output.clone();
        self.arg_path(&output)
    }
}

/// What a finished converter process reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Exit code, `None` when terminated by a signal.
    pub exit_code: Option<i32>,
    /// Decoded prefix of stderr, at most [`STDERR_PREFIX_BYTES`] bytes.
    pub stderr_prefix: String,
}

impl RunOutcome {
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            stderr_prefix: String::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: &str) -> Self {
        Self {
            exit_code: Some(exit_code),
            stderr_prefix: decode_stderr_prefix(stderr.as_bytes()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process exceeded timeout of {0:?}")]
    TimedOut(Duration),
}

/// Capability to run one external converter process.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation, timeout: Duration)
        -> Result<RunOutcome, RunError>;
}

/// Runs converters as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(
        &self,
        invocation: &Invocation,
        timeout: Duration,
    ) -> Result<RunOutcome, RunError> {
        debug!(
            program = %invocation.program,
            args = ?invocation.args,
            timeout_secs = timeout.as_secs(),
            "spawning converter"
        );

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own group, so a timeout also reaches helpers the converter forks.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|source| RunError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        // Drain stderr concurrently so a chatty converter cannot fill the pipe.
        let stderr = child.stderr.take();
        let mut drain = tokio::spawn(async move {
            match stderr {
                Some(pipe) => read_prefix(pipe, STDERR_PREFIX_BYTES).await,
                None => Vec::new(),
            }
        });

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(source)) => {
                drain.abort();
                return Err(RunError::Wait {
                    program: invocation.program.clone(),
                    source,
                });
            }
            Err(_) => {
                warn!(
                    program = %invocation.program,
                    timeout_secs = timeout.as_secs(),
                    "converter timed out, killing process group"
                );
                #[cfg(unix)]
                if let Some(pid) = child.id() {
                    if let Err(e) = kill_process_group(pid) {
                        warn!(program = %invocation.program, pid, error = %e, "failed to kill process group");
                    }
                }
                if let Err(e) = child.kill().await {
                    warn!(program = %invocation.program, error = %e, "failed to kill converter");
                }
                drain.abort();
                return Err(RunError::TimedOut(timeout));
            }
        };

        // Grandchildren may inherit stderr and keep it open after exit.
        let stderr = match tokio::time::timeout(STDERR_DRAIN_GRACE, &mut drain).await {
            Ok(Ok(bytes)) => bytes,
            _ => {
                drain.abort();
                Vec::new()
            }
        };

        Ok(RunOutcome {
            exit_code: status.code(),
            stderr_prefix: decode_stderr_prefix(&stderr),
        })
    }
}

/// Sends SIGKILL to the process group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: u32) -> std::io::Result<()> {
    // SAFETY: killpg has no memory-safety preconditions.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Reads `reader` to EOF, keeping at most `limit` bytes.
async fn read_prefix<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> Vec<u8> {
    let mut kept = Vec::with_capacity(limit);
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) => {
                debug!(error = %e, "stderr read failed");
                break;
            }
        }
    }
    kept
}

/// Decodes at most [`STDERR_PREFIX_BYTES`] bytes as UTF-8, dropping invalid sequences.
pub fn decode_stderr_prefix(bytes: &[u8]) -> String {
    let bounded = &bytes[..bytes.len().min(STDERR_PREFIX_BYTES)];
    bounded.utf8_chunks().map(|chunk| chunk.valid()).collect()
}
