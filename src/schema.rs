//! Wire types for the HTTP surface.

use serde::Serialize;

/// Body of a successful `POST /ocr` response.
#[derive(Debug, Clone, Serialize)]
pub struct OcrResponse {
    pub text: String,
    pub confidence: f64,
    pub lines_detected: usize,
    pub method: &'static str,
    /// Only present in fallback mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Body of a `GET /health` response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub paddleocr_available: bool,
    pub server_version: &'static str,
}
