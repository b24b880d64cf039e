//! Receipt OCR server - HTTP wrapper around a PaddleOCR recognition engine.
//!
//! Receives uploaded receipt images and returns the extracted text. When the
//! engine cannot be initialized at startup the server stays up in fallback
//! mode, answering with a mock receipt until it is restarted with models
//! installed.

mod error;
mod fallback;
mod ocr;
mod schema;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use ocr::paddle::PaddleOcrEngine;
use ocr::TextRecognizer;
use server::AppState;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const BIND_ADDR: &str = "0.0.0.0:8000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "receipt_ocr_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Initialize the OCR engine; a failure here degrades the whole process
    // into fallback mode until restart.
    let models_dir =
        PathBuf::from(std::env::var("OCR_MODELS_DIR").unwrap_or_else(|_| "models".to_string()));
    let engine: Option<Arc<dyn TextRecognizer>> = match PaddleOcrEngine::load(&models_dir) {
        Ok(engine) => {
            info!("PaddleOCR engine initialized from {:?}", models_dir);
            Some(Arc::new(engine))
        }
        Err(err) => {
            warn!("PaddleOCR engine unavailable: {err:#}");
            warn!("running in fallback mode; /ocr will return mock receipts until models are installed");
            None
        }
    };

    let app = server::router(AppState::new(engine));

    let listener = tokio::net::TcpListener::bind(BIND_ADDR).await?;
    info!("server listening on http://{BIND_ADDR}");
    axum::serve(listener, app).await?;

    Ok(())
}
