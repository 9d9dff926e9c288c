//! Runs a planned converter invocation and interprets its outcome.

use crate::error::ConvertError;
use crate::runner::{Invocation, ProcessRunner, RunError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Invokes external converters through a [`ProcessRunner`].
///
/// A conversion succeeds only when the process exits with status zero and
/// the expected output file exists afterwards.
#[derive(Clone)]
pub struct ExternalConverter {
    runner: Arc<dyn ProcessRunner>,
    timeout: Duration,
}

impl ExternalConverter {
    pub fn new(runner: Arc<dyn ProcessRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    /// Runs `invocation` once, mapping failures onto client-visible errors.
    ///
    /// # Errors
    ///
    /// - `RequestTimeout` when the process outlives the timeout
    /// - `BadRequest` with the stderr prefix when it exits nonzero
    /// - `Internal` when it cannot be started or exits zero without output
    pub async fn convert(&self, invocation: &Invocation) -> Result<(), ConvertError> {
        info!(
            program = %invocation.program,
            output = %invocation.output.display(),
            "running converter"
        );
        let started = Instant::now();

        let outcome = match self.runner.run(invocation, self.timeout).await {
            Ok(outcome) => outcome,
            Err(RunError::TimedOut(limit)) => {
                warn!(program = %invocation.program, timeout_secs = limit.as_secs(), "conversion timed out");
                return Err(ConvertError::RequestTimeout);
            }
            Err(e) => {
                error!(error = %e, "converter could not run");
                return Err(ConvertError::internal(format!(
                    "Converter unavailable: {}",
                    invocation.program
                )));
            }
        };

        if !outcome.succeeded() {
            let detail = if outcome.stderr_prefix.is_empty() {
                match outcome.exit_code {
                    Some(code) => format!("{} exited with status {}", invocation.program, code),
                    None => format!("{} was terminated by a signal", invocation.program),
                }
            } else {
                outcome.stderr_prefix
            };
            warn!(program = %invocation.program, exit_code = ?outcome.exit_code, "conversion failed");
            return Err(ConvertError::bad_request(format!(
                "Conversion failed: {}",
                detail
            )));
        }

        if !tokio::fs::try_exists(&invocation.output).await.unwrap_or(false) {
            error!(
                program = %invocation.program,
                output = %invocation.output.display(),
                "converter exited cleanly but produced no output"
            );
            return Err(ConvertError::internal("Output not produced"));
        }

        info!(
            program = %invocation.program,
            duration_ms = started.elapsed().as_millis() as u64,
            "conversion complete"
        );
        Ok(())
    }
}
