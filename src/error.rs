//! Client-visible conversion errors.
//!
//! Every pipeline stage returns `Result<T, ConvertError>`. The type implements
//! [`axum::response::IntoResponse`], so handlers can propagate it with `?` and
//! the client receives a JSON body `{"detail": "..."}` with the mapped status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Terminal failure of a conversion request.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// Invalid input, unsupported type, or the converter rejected the file.
    #[error("{0}")]
    BadRequest(String),

    /// The upload exceeded the configured size limit.
    #[error("File too large")]
    PayloadTooLarge,

    /// The converter did not finish within the configured timeout.
    #[error("Conversion timed out")]
    RequestTimeout,

    /// The server or an external tool broke its contract.
    #[error("{0}")]
    Internal(String),
}

impl ConvertError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ConvertError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ConvertError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ConvertError::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            ConvertError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ConvertError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "conversion request failed");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<std::io::Error> for ConvertError {
    fn from(e: std::io::Error) -> Self {
        // Paths in io errors stay in the logs, not in the response.
        error!(error = %e, "storage I/O failure");
        ConvertError::Internal("Storage failure".to_string())
    }
}
