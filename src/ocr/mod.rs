//! OCR engine seam and line aggregation.
//!
//! Defines the [`TextRecognizer`] trait so the HTTP layer never touches a
//! concrete engine, plus the pure functions that turn per-line parses into
//! the response aggregate. Malformed lines are an explicit [`LineParse`]
//! branch collected into the list, never an error that aborts the request.

pub mod paddle;

use anyhow::Context;
use image::RgbImage;
use tracing::debug;

/// Placeholder text when no line survived parsing.
pub const NO_TEXT_PLACEHOLDER: &str = "No text detected";

/// One recognized text line with its confidence score.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedLine {
    pub text: String,
    pub confidence: f64,
}

/// Per-line outcome from an engine. Skipped lines carry a reason for logs
/// but are excluded from the aggregate.
#[derive(Debug, Clone, PartialEq)]
pub enum LineParse {
    Parsed(RecognizedLine),
    Skipped { reason: String },
}

/// A text recognizer: pixel buffer in, per-line parses out.
///
/// Implementations must tolerate partial failure; a line that cannot be
/// parsed becomes [`LineParse::Skipped`], and only image-level failures
/// return `Err`.
pub trait TextRecognizer: Send + Sync {
    /// Identifier reported in the `method` response field.
    fn name(&self) -> &'static str;

    fn recognize(&self, image: &RgbImage) -> anyhow::Result<Vec<LineParse>>;
}

/// Aggregate of all parsed lines for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrOutcome {
    pub text: String,
    pub confidence: f64,
    pub lines_detected: usize,
}

/// Decode uploaded bytes into an RGB pixel buffer.
pub fn decode_rgb(bytes: &[u8]) -> anyhow::Result<RgbImage> {
    let img = image::load_from_memory(bytes).context("failed to decode uploaded image")?;
    Ok(img.to_rgb8())
}

/// Flatten line parses into the response aggregate.
///
/// Parsed texts are joined with newlines; the confidence is the arithmetic
/// mean over parsed lines, rounded to two decimals, or 0 when nothing parsed.
pub fn aggregate_lines(parses: &[LineParse]) -> OcrOutcome {
    let mut texts: Vec<&str> = Vec::new();
    let mut total_confidence = 0.0;

    for parse in parses {
        match parse {
            LineParse::Parsed(line) => {
                texts.push(line.text.as_str());
                total_confidence += line.confidence;
            }
            LineParse::Skipped { reason } => {
                debug!("skipping malformed line: {reason}");
            }
        }
    }

    let lines_detected = texts.len();
    let confidence = if lines_detected > 0 {
        round2(total_confidence / lines_detected as f64)
    } else {
        0.0
    };
    let text = if texts.is_empty() {
        NO_TEXT_PLACEHOLDER.to_string()
    } else {
        texts.join("\n")
    };

    OcrOutcome {
        text,
        confidence,
        lines_detected,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
