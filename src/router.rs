//! The conversion pipeline: intake, persistence, classification, conversion.
//!
//! A request moves through
//! `Received → Validated → Persisted → SizeChecked → Classified → Converting`
//! and settles as `Succeeded` or `Failed`. Each stage is a separate method so
//! the HTTP layer can persist a multipart file field as it streams in, before
//! the target field has necessarily been read.

use crate::config::Config;
use crate::converter::ExternalConverter;
use crate::error::ConvertError;
use crate::job::{normalize_target, ConversionJob, JobStatus};
use crate::routing::{classify, resolve_mime};
use crate::runner::ProcessRunner;
use crate::telemetry;
use anyhow::Result;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

/// A complete conversion request whose upload is an async reader.
pub struct ConversionRequest<R> {
    pub upload: R,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub target: String,
}

/// Result of a successful conversion.
///
/// The output is already open, so a job is only recorded as succeeded once
/// its file can actually be served.
#[derive(Debug)]
pub struct ConvertedFile {
    pub job_id: String,
    /// Location of the converter output on disk.
    pub path: PathBuf,
    /// `{original stem}.{output extension}` offered to the client.
    pub download_name: String,
    pub file: tokio::fs::File,
    pub size: u64,
}

/// Validates, stores, classifies and converts uploads.
pub struct ConversionRouter {
    config: Arc<Config>,
    converter: ExternalConverter,
    slots: Arc<Semaphore>,
}

impl ConversionRouter {
    /// Creates a router and the storage directories it writes into.
    pub fn new(config: Config, runner: Arc<dyn ProcessRunner>) -> Result<Self> {
        config.ensure_storage()?;
        let converter = ExternalConverter::new(runner, config.conversion_timeout);
        let slots = Arc::new(Semaphore::new(config.max_concurrent_conversions));
        Ok(Self {
            config: Arc::new(config),
            converter,
            slots,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs the whole pipeline for a request.
    ///
    /// The target is validated before anything is written to disk.
    pub async fn run<R>(&self, request: ConversionRequest<R>) -> Result<ConvertedFile, ConvertError>
    where
        R: AsyncRead + Send + Unpin,
    {
        let mut job = self.intake(request.filename.as_deref(), request.content_type.as_deref())?;
        if let Err(e) = normalize_target(&request.target) {
            self.reject(&mut job, &e);
            return Err(e);
        }
        self.persist(&mut job, ReaderStream::new(request.upload)).await?;
        self.finish(job, &request.target).await
    }

    /// Validates the filename and assigns the job its identifier and paths.
    ///
    /// Nothing touches the filesystem here.
    pub fn intake(
        &self,
        filename: Option<&str>,
        content_type: Option<&str>,
    ) -> Result<ConversionJob, ConvertError> {
        let filename = match filename {
            Some(name) if !name.is_empty() => name,
            _ => return Err(ConvertError::bad_request("Missing filename")),
        };

        let mime_hint = resolve_mime(content_type, filename);
        let mut job = ConversionJob::new(
            filename.to_string(),
            mime_hint,
            &self.config.uploads_dir(),
        );
        job.advance(JobStatus::Validated);

        info!(
            job_id = %job.id,
            filename = %job.filename,
            mime_hint = %job.mime_hint,
            "upload received"
        );
        Ok(job)
    }

    /// Streams `upload` into the job's input file and enforces the size limit.
    ///
    /// Writing stops as soon as the limit is exceeded; the partial file stays
    /// on disk. Returns the stored size in bytes.
    pub async fn persist<S, E>(&self, job: &mut ConversionJob, upload: S) -> Result<u64, ConvertError>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display,
    {
        let result = self.write_upload(job, upload).await;
        if let Err(ref e) = result {
            self.reject(job, e);
        }
        result
    }

    async fn write_upload<S, E>(&self, job: &mut ConversionJob, upload: S) -> Result<u64, ConvertError>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display,
    {
        let limit = self.config.max_upload_bytes;
        let mut file = tokio::fs::File::create(&job.input_path).await?;
        let mut received: u64 = 0;

        futures::pin_mut!(upload);
        while let Some(chunk) = upload.next().await {
            let chunk = chunk.map_err(|e| {
                ConvertError::bad_request(format!("Failed to read upload: {}", e))
            })?;
            received += chunk.len() as u64;
            if received > limit {
                warn!(job_id = %job.id, limit_bytes = limit, "upload exceeds size limit");
                return Err(ConvertError::PayloadTooLarge);
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);
        job.advance(JobStatus::Persisted);

        let size = tokio::fs::metadata(&job.input_path).await?.len();
        if size > limit {
            warn!(job_id = %job.id, size_bytes = size, limit_bytes = limit, "stored upload exceeds size limit");
            return Err(ConvertError::PayloadTooLarge);
        }
        job.advance(JobStatus::SizeChecked);

        info!(job_id = %job.id, size_bytes = size, path = %job.input_path.display(), "upload stored");
        Ok(size)
    }

    /// Classifies a persisted job, runs its converter and settles it.
    pub async fn finish(&self, mut job: ConversionJob, target: &str) -> Result<ConvertedFile, ConvertError> {
        match self.convert_job(&mut job, target).await {
            Ok(converted) => {
                job.mark_succeeded(converted.path.clone());
                telemetry::record_conversion_telemetry(&job);
                Ok(converted)
            }
            Err(e) => {
                self.reject(&mut job, &e);
                Err(e)
            }
        }
    }

    async fn convert_job(&self, job: &mut ConversionJob, target: &str) -> Result<ConvertedFile, ConvertError> {
        if job.status != JobStatus::SizeChecked {
            return Err(ConvertError::internal("Upload was not stored"));
        }
        job.target_format = Some(normalize_target(target)?);

        let route = classify(&job.mime_hint, &job.source_extension)
            .ok_or_else(|| ConvertError::bad_request("Unsupported file type"))?;
        job.category = Some(route.category);
        job.advance(JobStatus::Classified);

        let invocation =
            route
                .strategy
                .plan(job, &self.config.programs, &self.config.outputs_dir())?;
        job.output_path = Some(invocation.output.clone());

        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| ConvertError::internal("Conversion slots closed"))?;
        job.advance(JobStatus::Converting);
        self.converter.convert(&invocation).await?;

        let file = tokio::fs::File::open(&invocation.output).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            warn!(job_id = %job.id, path = %invocation.output.display(), "converter output is not a regular file");
            return Err(ConvertError::internal("Output not produced"));
        }

        let extension = invocation
            .output
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(ConvertedFile {
            job_id: job.id.clone(),
            download_name: format!("{}.{}", job.original_stem(), extension),
            path: invocation.output,
            file,
            size: metadata.len(),
        })
    }

    /// Settles `job` as failed with `error` and records its telemetry.
    pub fn reject(&self, job: &mut ConversionJob, error: &ConvertError) {
        job.mark_failed(error.to_string());
        telemetry::record_conversion_telemetry(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{MockProcessRunner, RunOutcome};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    fn router(dir: &TempDir, runner: MockProcessRunner) -> ConversionRouter {
        let config = Config {
            base_dir: dir.path().to_path_buf(),
            max_upload_bytes: 64,
            conversion_timeout: Duration::from_secs(5),
            ..Config::default()
        };
        ConversionRouter::new(config, Arc::new(runner)).unwrap()
    }

    fn request(filename: &str, content: &'static [u8], target: &str) -> ConversionRequest<&'static [u8]> {
        ConversionRequest {
            upload: content,
            filename: Some(filename.to_string()),
            content_type: None,
            target: target.to_string(),
        }
    }

    #[test]
    fn test_intake_rejects_missing_filename() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(&dir, MockProcessRunner::new());

        for filename in [None, Some("")] {
            let err = router.intake(filename, Some("image/png")).unwrap_err();
            assert!(matches!(err, ConvertError::BadRequest(ref m) if m == "Missing filename"));
        }
        assert_eq!(std::fs::read_dir(router.config().uploads_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_run_converts_image() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = MockProcessRunner::new();
        runner.expect_run().times(1).returning(|invocation, _| {
            assert_eq!(invocation.program, "convert");
            assert!(invocation.input.exists());
            std::fs::write(&invocation.output, b"jpeg bytes").unwrap();
            Ok(RunOutcome::success())
        });
        let router = router(&dir, runner);

        let converted = router
            .run(request("Holiday Photo.PNG", b"png bytes", " .JPG"))
            .await
            .unwrap();

        assert_eq!(converted.download_name, "Holiday Photo.jpg");
        assert_eq!(
            converted.path,
            dir.path().join("outputs").join(format!("{}.jpg", converted.job_id))
        );
        let stored = dir
            .path()
            .join("uploads")
            .join(format!("{}.png", converted.job_id));
        assert_eq!(std::fs::read(stored).unwrap(), b"png bytes");
    }

    #[tokio::test]
    async fn test_run_rejects_empty_target_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(&dir, MockProcessRunner::new());

        let err = router.run(request("a.png", b"png", " . ")).await.unwrap_err();

        assert!(matches!(err, ConvertError::BadRequest(ref m) if m == "Missing target format"));
        assert_eq!(std::fs::read_dir(router.config().uploads_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_upload() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(&dir, MockProcessRunner::new());
        let mut job = router.intake(Some("big.png"), None).unwrap();
        let chunks = vec![
            Ok::<_, std::io::Error>(Bytes::from(vec![0u8; 40])),
            Ok(Bytes::from(vec![0u8; 40])),
        ];

        let err = router
            .persist(&mut job, futures::stream::iter(chunks))
            .await
            .unwrap_err();

        assert!(matches!(err, ConvertError::PayloadTooLarge));
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_upload_at_limit_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(&dir, MockProcessRunner::new());
        let mut job = router.intake(Some("exact.png"), None).unwrap();
        let chunks = vec![Ok::<_, std::io::Error>(Bytes::from(vec![7u8; 64]))];

        let size = router
            .persist(&mut job, futures::stream::iter(chunks))
            .await
            .unwrap();

        assert_eq!(size, 64);
        assert_eq!(job.status, JobStatus::SizeChecked);
    }

    #[tokio::test]
    async fn test_stream_error_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(&dir, MockProcessRunner::new());
        let mut job = router.intake(Some("a.png"), None).unwrap();
        let chunks = vec![
            Ok(Bytes::from_static(b"par")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "client went away")),
        ];

        let err = router
            .persist(&mut job, futures::stream::iter(chunks))
            .await
            .unwrap_err();

        assert!(matches!(err, ConvertError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_document_non_pdf_never_invokes_converter() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = MockProcessRunner::new();
        runner.expect_run().times(0);
        let router = router(&dir, runner);

        let err = router.run(request("deck.pptx", b"pptx", "png")).await.unwrap_err();

        assert!(matches!(err, ConvertError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_document_output_uses_input_stem() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = MockProcessRunner::new();
        runner.expect_run().times(1).returning(|invocation, _| {
            assert_eq!(invocation.program, "soffice");
            let stem = invocation.input.file_stem().unwrap().to_owned();
            let outdir = std::path::Path::new(&invocation.args[4]);
            std::fs::write(outdir.join(stem).with_extension("pdf"), b"%PDF").unwrap();
            Ok(RunOutcome::success())
        });
        let router = router(&dir, runner);

        let converted = router.run(request("Q3 Report.docx", b"docx", "PDF")).await.unwrap();

        assert_eq!(converted.download_name, "Q3 Report.pdf");
        assert_eq!(
            converted.path.file_name().unwrap().to_string_lossy(),
            format!("{}.pdf", converted.job_id)
        );
    }

    #[tokio::test]
    async fn test_unsupported_type() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(&dir, MockProcessRunner::new());

        let err = router.run(request("archive.zip", b"zip", "tar")).await.unwrap_err();

        assert!(matches!(err, ConvertError::BadRequest(ref m) if m == "Unsupported file type"));
    }

    #[tokio::test]
    async fn test_unreadable_output_is_not_success() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = MockProcessRunner::new();
        runner.expect_run().times(1).returning(|invocation, _| {
            std::fs::create_dir(&invocation.output).unwrap();
            Ok(RunOutcome::success())
        });
        let router = router(&dir, runner);

        let err = router.run(request("a.png", b"png", "jpg")).await.unwrap_err();

        assert!(matches!(err, ConvertError::Internal(ref m) if m == "Output not produced"));
    }

    #[tokio::test]
    async fn test_converted_file_is_open_for_download() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = MockProcessRunner::new();
        runner.expect_run().times(1).returning(|invocation, _| {
            std::fs::write(&invocation.output, b"gif bytes").unwrap();
            Ok(RunOutcome::success())
        });
        let router = router(&dir, runner);

        let mut converted = router.run(request("a.png", b"png", "gif")).await.unwrap();
        std::fs::remove_file(&converted.path).unwrap();

        let mut served = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut converted.file, &mut served)
            .await
            .unwrap();
        assert_eq!(converted.size, 9);
        assert_eq!(served, b"gif bytes");
    }

    #[tokio::test]
    async fn test_finish_requires_persisted_upload() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(&dir, MockProcessRunner::new());
        let job = router.intake(Some("a.png"), None).unwrap();

        let err = router.finish(job, "jpg").await.unwrap_err();

        assert!(matches!(err, ConvertError::Internal(_)));
    }
}
