//! Conversion job model and per-request state.

use crate::error::ConvertError;
use crate::routing::Category;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Pipeline stage of a single conversion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Received,
    Validated,
    Persisted,
    SizeChecked,
    Classified,
    Converting,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Received => write!(f, "received"),
            JobStatus::Validated => write!(f, "validated"),
            JobStatus::Persisted => write!(f, "persisted"),
            JobStatus::SizeChecked => write!(f, "size_checked"),
            JobStatus::Classified => write!(f, "classified"),
            JobStatus::Converting => write!(f, "converting"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One upload moving through the conversion pipeline.
///
/// The `id` is the only component of on-disk names derived from the request,
/// besides the lowercased extension, so a hostile filename cannot steer where
/// files land.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionJob {
    pub id: String,
    pub filename: String,
    pub source_extension: String,
    pub mime_hint: String,
    pub input_path: PathBuf,
    pub output_path: Option<PathBuf>,
    pub target_format: Option<String>,
    pub category: Option<Category>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl ConversionJob {
    /// Creates a job for `filename`, storing its input under `uploads_dir`.
    pub fn new(filename: String, mime_hint: String, uploads_dir: &Path) -> Self {
        let now = Utc::now();
        let id = generate_id();
        let source_extension = source_extension(&filename);
        let input_path = uploads_dir.join(format!("{}{}", id, source_extension));
        Self {
            id,
            filename,
            source_extension,
            mime_hint,
            input_path,
            output_path: None,
            target_format: None,
            category: None,
            status: JobStatus::Received,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    pub fn advance(&mut self, status: JobStatus) {
        debug!(job_id = %self.id, from = %self.status, to = %status, "job transition");
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn mark_succeeded(&mut self, output_path: PathBuf) {
        self.output_path = Some(output_path);
        self.error = None;
        self.advance(JobStatus::Succeeded);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.error = Some(error);
        self.advance(JobStatus::Failed);
    }

    /// Stem of the client's filename, used for the download name.
    pub fn original_stem(&self) -> String {
        Path::new(&self.filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn processing_duration_ms(&self) -> Option<i64> {
        if self.status.is_terminal() {
            Some(
                self.updated_at
                    .signed_duration_since(self.created_at)
                    .num_milliseconds(),
            )
        } else {
            None
        }
    }
}

/// Returns 32 lowercase hex characters backed by a random v4 UUID.
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Lowercased extension of `filename` including the leading dot, or empty.
pub fn source_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Normalizes a requested target like `" .PDF "` to `"pdf"`.
pub fn normalize_target(raw: &str) -> Result<String, ConvertError> {
    let target = raw.trim().trim_start_matches('.').to_lowercase();
    if target.is_empty() {
        return Err(ConvertError::bad_request("Missing target format"));
    }
    if target.contains(['/', '\\', '\0']) {
        return Err(ConvertError::bad_request("Invalid target format"));
    }
    Ok(target)
}
