//! HTTP surface: `GET /healthz` and multipart `POST /convert`.

use crate::error::ConvertError;
use crate::job::{normalize_target, ConversionJob};
use crate::router::{ConversionRouter, ConvertedFile};
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Builds the application router.
///
/// The framework body limit is disabled; [`ConversionRouter::persist`]
/// enforces the configured upload limit while streaming.
pub fn routes(router: Arc<ConversionRouter>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/convert", post(convert))
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(router)
}

async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn convert(
    State(router): State<Arc<ConversionRouter>>,
    mut multipart: Multipart,
) -> Result<Response, ConvertError> {
    let mut job: Option<ConversionJob> = None;
    let mut target: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") if job.is_none() => {
                let filename = field.file_name().map(str::to_owned);
                let content_type = field.content_type().map(str::to_owned);
                let mut intake = router.intake(filename.as_deref(), content_type.as_deref())?;
                if let Some(raw) = target.as_deref() {
                    if let Err(e) = normalize_target(raw) {
                        router.reject(&mut intake, &e);
                        return Err(e);
                    }
                }
                if let Err(e) = router.persist(&mut intake, field).await {
                    if target.is_none() {
                        return Err(prefer_target_error(&mut multipart, e).await);
                    }
                    return Err(e);
                }
                job = Some(intake);
            }
            Some("target") if target.is_none() => {
                target = Some(field.text().await.map_err(malformed)?);
            }
            other => debug!(field = ?other, "ignoring multipart field"),
        }
    }

    let job = job.ok_or_else(|| ConvertError::bad_request("Missing file"))?;
    // A missing target settles the stored job through normal validation.
    let target = target.unwrap_or_default();
    let converted = router.finish(job, &target).await?;
    download(converted).await
}

/// A file field that failed to store may still be followed by an invalid
/// target; that rejection takes precedence, as it would have had the target
/// arrived first.
async fn prefer_target_error(multipart: &mut Multipart, stored: ConvertError) -> ConvertError {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("target") {
            continue;
        }
        return match field.text().await {
            Ok(raw) => normalize_target(&raw).err().unwrap_or(stored),
            Err(_) => stored,
        };
    }
    stored
}

fn malformed(e: axum::extract::multipart::MultipartError) -> ConvertError {
    ConvertError::bad_request(format!("Invalid multipart body: {}", e.body_text()))
}

async fn download(converted: ConvertedFile) -> Result<Response, ConvertError> {
    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (header::CONTENT_LENGTH, converted.size.to_string()),
        (
            header::CONTENT_DISPOSITION,
            content_disposition(&converted.download_name),
        ),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(converted.file))).into_response())
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 name
/// when the original contains characters a quoted string cannot carry.
pub fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c == ' ' || c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();

    if fallback == filename {
        format!("attachment; filename=\"{}\"", fallback)
    } else {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            fallback,
            urlencoding::encode(filename)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plain_disposition() {
        assert_eq!(
            content_disposition("My Report.pdf"),
            "attachment; filename=\"My Report.pdf\""
        );
    }

    #[test]
    fn test_non_ascii_disposition() {
        assert_eq!(
            content_disposition("résumé.pdf"),
            "attachment; filename=\"r_sum_.pdf\"; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf"
        );
    }

    #[test]
    fn test_quotes_are_replaced() {
        assert_eq!(
            content_disposition("a\"b.png"),
            "attachment; filename=\"a_b.png\"; filename*=UTF-8''a%22b.png"
        );
    }
}
