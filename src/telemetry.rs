//! Telemetry and structured logging for conversion jobs.

use crate::job::{ConversionJob, JobStatus};
use opentelemetry::trace::{Span, Tracer};
use opentelemetry::{global, KeyValue};
use tracing::{debug, info, warn};

const TRACER_NAME: &str = "convert-server";

/// Conversions slower than this are logged as warnings.
const SLOW_CONVERSION_MS: i64 = 30_000;

/// Records telemetry for a settled (succeeded or failed) job.
///
/// Emits an OpenTelemetry span and a structured log line with the job id,
/// category, target format, status, duration and error message.
pub fn record_conversion_telemetry(job: &ConversionJob) {
    let tracer = global::tracer(TRACER_NAME);
    let mut span = tracer.start("file_conversion");

    span.set_attribute(KeyValue::new("job_id", job.id.clone()));
    span.set_attribute(KeyValue::new("status", job.status.to_string()));
    span.set_attribute(KeyValue::new(
        "source_extension",
        job.source_extension.clone(),
    ));
    span.set_attribute(KeyValue::new("mime_hint", job.mime_hint.clone()));
    if let Some(category) = job.category {
        span.set_attribute(KeyValue::new("category", category.to_string()));
    }
    if let Some(ref target) = job.target_format {
        span.set_attribute(KeyValue::new("target_format", target.clone()));
    }

    if let Some(duration_ms) = job.processing_duration_ms() {
        span.set_attribute(KeyValue::new("duration_ms", duration_ms));

        info!(
            job_id = %job.id,
            category = ?job.category,
            target_format = ?job.target_format,
            duration_ms = duration_ms,
            status = %job.status,
            "conversion job settled"
        );

        if duration_ms > SLOW_CONVERSION_MS {
            warn!(
                job_id = %job.id,
                duration_ms = duration_ms,
                "conversion exceeded performance threshold ({}ms)",
                SLOW_CONVERSION_MS
            );
        }
    }

    if job.status == JobStatus::Failed {
        if let Some(ref error) = job.error {
            span.set_attribute(KeyValue::new("error", error.clone()));
            warn!(
                job_id = %job.id,
                error = %error,
                "conversion job failed"
            );
        }
    }

    if let Ok(snapshot) = serde_json::to_string(job) {
        debug!(job = %snapshot, "conversion job snapshot");
    }

    span.end();
}

/// Initializes OpenTelemetry with an OTLP exporter pointed at `endpoint`.
///
/// Called once at startup when an endpoint is configured. The service name
/// comes from `OTEL_SERVICE_NAME` (default: convert-server).
pub fn init_telemetry(endpoint: &str) -> Result<(), Box<dyn std::error::Error>> {
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::Config;

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| TRACER_NAME.to_string());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(Config::default().with_resource(
            opentelemetry_sdk::Resource::new(vec![
                KeyValue::new("service.name", service_name),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ]),
        ))
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    if let Some(provider) = tracer.provider() {
        global::set_tracer_provider(provider);
    }

    info!("Telemetry initialized: endpoint={}", endpoint);
    Ok(())
}

/// Flushes pending spans before exit.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}
