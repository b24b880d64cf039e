//! API error taxonomy.
//!
//! Two buckets: bad uploads map to 400, everything that breaks while
//! decoding or recognizing maps to 500 with the full error chain attached
//! so operators can diagnose from the response alone.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing `file` field or empty filename.
    #[error("{0}")]
    Validation(String),
    /// Decode failure, engine failure, or a crashed worker task.
    #[error("OCR processing failed: {0:#}")]
    Processing(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Processing(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": message })),
            )
                .into_response(),
            ApiError::Processing(err) => {
                error!("OCR processing failed: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": format!("OCR processing failed: {err:#}"),
                        "details": format!("{err:?}"),
                    })),
                )
                    .into_response()
            }
        }
    }
}
