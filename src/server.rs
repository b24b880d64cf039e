//! HTTP surface: router, handlers, shared state.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::fallback;
use crate::ocr::{self, TextRecognizer};
use crate::schema::{HealthResponse, OcrResponse};

pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application state shared across handlers.
///
/// Engine availability is decided once at startup and never mutated;
/// handlers only ever read it.
#[derive(Clone)]
pub struct AppState {
    engine: Option<Arc<dyn TextRecognizer>>,
}

impl AppState {
    pub fn new(engine: Option<Arc<dyn TextRecognizer>>) -> Self {
        Self { engine }
    }

    fn engine_available(&self) -> bool {
        self.engine.is_some()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/ocr", post(process_ocr))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB photo uploads
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Human-readable status page.
async fn index(State(state): State<AppState>) -> Html<String> {
    let status = if state.engine_available() {
        "READY"
    } else {
        "FALLBACK MODE"
    };
    let setup = if state.engine_available() {
        ""
    } else {
        "<h2>Setup required</h2>\
         <p>PaddleOCR models are missing. Place <code>rec.onnx</code> and \
         <code>dict.txt</code> in the models directory (or point \
         <code>OCR_MODELS_DIR</code> at them) and restart the server. Until \
         then <code>/ocr</code> returns mock data.</p>"
    };

    Html(format!(
        "<h1>Receipt OCR Server - {status}</h1>\
         <p><strong>Status:</strong> {status}</p>\
         <p><strong>PaddleOCR available:</strong> {available}</p>\
         <p><strong>Version:</strong> {version}</p>\
         <h2>Endpoints</h2>\
         <ul>\
         <li><code>GET /health</code> - health check</li>\
         <li><code>POST /ocr</code> - run OCR (image as <code>file</code> in multipart/form-data)</li>\
         </ul>\
         {setup}",
        available = state.engine_available(),
        version = SERVER_VERSION,
    ))
}

/// Health check endpoint. Reads only startup-time state.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "running",
        paddleocr_available: state.engine_available(),
        server_version: SERVER_VERSION,
    })
}

/// Run OCR on an uploaded image.
async fn process_ocr(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<OcrResponse>, ApiError> {
    let upload = read_upload(&mut multipart).await?;
    info!(
        "received upload: {} ({} bytes)",
        upload.filename,
        upload.bytes.len()
    );

    match &state.engine {
        Some(engine) => Ok(Json(recognize_upload(Arc::clone(engine), upload.bytes).await?)),
        None => {
            warn!("OCR engine unavailable, returning fallback receipt");
            Ok(Json(fallback::fallback_response()))
        }
    }
}

struct Upload {
    filename: String,
    bytes: Vec<u8>,
}

/// Pull the `file` field out of the multipart payload.
async fn read_upload(multipart: &mut Multipart) -> Result<Upload, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Invalid multipart payload: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Err(ApiError::Validation("Empty filename".to_string()));
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::Validation(format!("Failed to read upload: {e}")))?
            .to_vec();
        return Ok(Upload { filename, bytes });
    }

    Err(ApiError::Validation("No file uploaded".to_string()))
}

/// Decode, recognize, and aggregate on a blocking thread.
async fn recognize_upload(
    engine: Arc<dyn TextRecognizer>,
    bytes: Vec<u8>,
) -> Result<OcrResponse, ApiError> {
    let method = engine.name();

    let outcome = tokio::task::spawn_blocking(move || -> anyhow::Result<ocr::OcrOutcome> {
        let pixels = ocr::decode_rgb(&bytes)?;
        let parses = engine.recognize(&pixels)?;
        Ok(ocr::aggregate_lines(&parses))
    })
    .await
    .map_err(|e| ApiError::Processing(anyhow::anyhow!("OCR worker task failed: {e}")))?
    .map_err(ApiError::Processing)?;

    info!(
        "extracted {} lines (confidence {:.2})",
        outcome.lines_detected, outcome.confidence
    );

    Ok(OcrResponse {
        text: outcome.text,
        confidence: outcome.confidence,
        lines_detected: outcome.lines_detected,
        method,
        warning: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{LineParse, RecognizedLine};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const BOUNDARY: &str = "receipt-test-boundary";

    struct StubRecognizer {
        parses: Vec<LineParse>,
    }

    impl TextRecognizer for StubRecognizer {
        fn name(&self) -> &'static str {
            "paddleocr"
        }

        fn recognize(&self, _image: &image::RgbImage) -> anyhow::Result<Vec<LineParse>> {
            Ok(self.parses.clone())
        }
    }

    fn router_with_stub(parses: Vec<LineParse>) -> Router {
        router(AppState::new(Some(Arc::new(StubRecognizer { parses }))))
    }

    fn router_without_engine() -> Router {
        router(AppState::new(None))
    }

    fn parsed(text: &str, confidence: f64) -> LineParse {
        LineParse::Parsed(RecognizedLine {
            text: text.to_string(),
            confidence,
        })
    }

    fn multipart_body(field: &str, filename: Option<&str>, data: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match filename {
            Some(name) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{field}\"; filename=\"{name}\"\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{field}\"\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn ocr_request(field: &str, filename: Option<&str>, data: &[u8]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/ocr")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(field, filename, data)))
            .unwrap()
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(12, 12, image::Rgb([255, 255, 255]));
        let mut buf = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageOutputFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn missing_file_field_is_rejected() {
        let response = router_with_stub(vec![])
            .oneshot(ocr_request("document", Some("receipt.png"), &png_bytes()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "No file uploaded");
    }

    #[tokio::test]
    async fn empty_filename_is_rejected() {
        let response = router_with_stub(vec![])
            .oneshot(ocr_request("file", Some(""), &png_bytes()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Empty filename");
    }

    #[tokio::test]
    async fn fallback_mode_returns_mock_receipt_on_every_call() {
        for _ in 0..2 {
            let response = router_without_engine()
                .oneshot(ocr_request("file", Some("receipt.png"), &png_bytes()))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let body = json_body(response).await;
            assert_eq!(body["method"], "fallback");
            assert_eq!(body["confidence"].as_f64().unwrap(), 0.5);
            assert_eq!(body["lines_detected"], 12);
            assert!(!body["warning"].as_str().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn zero_detected_lines_yields_placeholder() {
        let response = router_with_stub(vec![])
            .oneshot(ocr_request("file", Some("receipt.png"), &png_bytes()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["text"], "No text detected");
        assert_eq!(body["confidence"].as_f64().unwrap(), 0.0);
        assert_eq!(body["lines_detected"], 0);
        assert_eq!(body["method"], "paddleocr");
        assert!(body.get("warning").is_none());
    }

    #[tokio::test]
    async fn mean_confidence_is_rounded_to_two_decimals() {
        let response = router_with_stub(vec![
            parsed("RECEIPT", 0.9),
            parsed("Coffee $4.50", 0.8),
            parsed("Total $17.23", 0.7),
        ])
        .oneshot(ocr_request("file", Some("receipt.png"), &png_bytes()))
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["confidence"].as_f64().unwrap(), 0.8);
        assert_eq!(body["lines_detected"], 3);
        assert_eq!(body["text"], "RECEIPT\nCoffee $4.50\nTotal $17.23");
    }

    #[tokio::test]
    async fn skipped_lines_do_not_abort_the_request() {
        let response = router_with_stub(vec![
            parsed("Subtotal $15.95", 0.84),
            LineParse::Skipped {
                reason: "missing confidence".to_string(),
            },
        ])
        .oneshot(ocr_request("file", Some("receipt.png"), &png_bytes()))
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["lines_detected"], 1);
        assert_eq!(body["confidence"].as_f64().unwrap(), 0.84);
        assert_eq!(body["text"], "Subtotal $15.95");
    }

    #[tokio::test]
    async fn undecodable_upload_returns_500_with_details() {
        let response = router_with_stub(vec![])
            .oneshot(ocr_request("file", Some("receipt.png"), b"not an image"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("OCR processing failed"));
        assert!(!body["details"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn health_reports_startup_outcome_without_drift() {
        for _ in 0..3 {
            let response = router_without_engine()
                .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = json_body(response).await;
            assert_eq!(body["status"], "running");
            assert_eq!(body["paddleocr_available"], false);
            assert_eq!(body["server_version"], SERVER_VERSION);
        }

        let response = router_with_stub(vec![])
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["paddleocr_available"], true);
    }

    #[tokio::test]
    async fn index_shows_fallback_banner_when_engine_is_missing() {
        let response = router_without_engine()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("FALLBACK MODE"));
        assert!(html.contains("Setup required"));
    }
}
