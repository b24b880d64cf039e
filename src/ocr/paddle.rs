//! PaddleOCR text recognition via ONNX Runtime.
//!
//! Loads a PaddleOCR CRNN recognition model (`rec.onnx`) and its character
//! dictionary (`dict.txt`) from a models directory. Receipt images are cut
//! into horizontal text bands with a row-ink projection profile, and each
//! band runs through the recognition session followed by greedy CTC decode.
//! Missing model files fail [`PaddleOcrEngine::load`], which puts the server
//! into fallback mode for its lifetime.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use tracing::{debug, info};

use super::{LineParse, RecognizedLine, TextRecognizer};

/// Input height expected by the CRNN recognition model.
const REC_HEIGHT: u32 = 48;
/// Narrow crops are padded up to this width so the sequence has enough steps.
const MIN_REC_WIDTH: u32 = 16;
/// Wider bands are scaled down to keep inference bounded.
const MAX_REC_WIDTH: u32 = 960;
/// Rows with ink above this fraction of the mean row ink count as text.
const INK_THRESHOLD_RATIO: f64 = 0.15;
/// Bands shorter than this are noise, not text.
const MIN_BAND_HEIGHT: u32 = 8;
/// Vertical margin added around each band before cropping.
const BAND_MARGIN: u32 = 2;

pub struct PaddleOcrEngine {
    // ort sessions need &mut to run
    session: Mutex<Session>,
    dict: Vec<String>,
}

impl PaddleOcrEngine {
    /// Load `rec.onnx` and `dict.txt` from the models directory.
    pub fn load(models_dir: &Path) -> Result<Self> {
        let rec_path = models_dir.join("rec.onnx");
        let dict_path = models_dir.join("dict.txt");

        if !rec_path.exists() {
            anyhow::bail!("recognition model not found at {:?}", rec_path);
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&rec_path)
            .with_context(|| format!("failed to load recognition model from {:?}", rec_path))?;

        let raw = std::fs::read_to_string(&dict_path)
            .with_context(|| format!("failed to read dictionary from {:?}", dict_path))?;
        let dict = parse_dict(&raw);
        if dict.is_empty() {
            anyhow::bail!("dictionary at {:?} is empty", dict_path);
        }

        info!(
            "loaded PaddleOCR recognition model from {:?} ({} dictionary entries)",
            rec_path,
            dict.len()
        );

        Ok(Self {
            session: Mutex::new(session),
            dict,
        })
    }

    /// Run one text band through the recognition session.
    ///
    /// Returns `None` when the band decodes to nothing usable (empty text or
    /// a non-finite confidence).
    fn recognize_band(&self, band: &RgbImage) -> Result<Option<RecognizedLine>> {
        let (width, height) = band.dimensions();
        if width == 0 || height == 0 {
            return Ok(None);
        }

        let scale = REC_HEIGHT as f32 / height as f32;
        let target_width =
            ((width as f32 * scale) as u32).clamp(MIN_REC_WIDTH, MAX_REC_WIDTH);
        let resized = imageops::resize(band, target_width, REC_HEIGHT, FilterType::Triangle);

        // NCHW tensor normalized to (px/255 - 0.5)/0.5, PaddleOCR convention
        let mut tensor =
            Array4::<f32>::zeros((1, 3, REC_HEIGHT as usize, target_width as usize));
        for y in 0..REC_HEIGHT as usize {
            for x in 0..target_width as usize {
                let pixel = resized.get_pixel(x as u32, y as u32);
                for c in 0..3 {
                    tensor[[0, c, y, x]] = (pixel[c] as f32 / 255.0 - 0.5) / 0.5;
                }
            }
        }

        let shape: [usize; 4] = [1, 3, REC_HEIGHT as usize, target_width as usize];
        let (data, _offset) = tensor.into_raw_vec_and_offset();
        let input = Value::from_array((shape, data))?;

        let (dims, probs) = {
            let mut session = self.session.lock().unwrap();
            let outputs = session.run(ort::inputs![input])?;
            let first_key = outputs
                .keys()
                .next()
                .context("recognition model produced no outputs")?;
            let (shape, data) = outputs[first_key].try_extract_tensor::<f32>()?;
            let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            (dims, data.to_vec())
        };

        // Expect [1, T, V] or [T, V]
        let (steps, vocab_size) = match dims.as_slice() {
            [1, t, v] => (*t, *v),
            [t, v] => (*t, *v),
            other => anyhow::bail!("unexpected recognition output shape: {:?}", other),
        };

        let (text, confidence) = ctc_greedy_decode(&probs, steps, vocab_size, &self.dict);
        if text.trim().is_empty() || !confidence.is_finite() {
            return Ok(None);
        }

        Ok(Some(RecognizedLine { text, confidence }))
    }
}

impl TextRecognizer for PaddleOcrEngine {
    fn name(&self) -> &'static str {
        "paddleocr"
    }

    fn recognize(&self, image: &RgbImage) -> Result<Vec<LineParse>> {
        let gray = imageops::grayscale(image);
        let bands = segment_rows(&gray);
        debug!("segmented {} candidate text bands", bands.len());

        let mut parses = Vec::with_capacity(bands.len());
        for band in bands {
            let top = band.top.saturating_sub(BAND_MARGIN);
            let bottom = (band.top + band.height + BAND_MARGIN).min(image.height());
            let crop = imageops::crop_imm(image, 0, top, image.width(), bottom - top).to_image();

            // Per-line failures are skipped, never escalated
            match self.recognize_band(&crop) {
                Ok(Some(line)) => parses.push(LineParse::Parsed(line)),
                Ok(None) => parses.push(LineParse::Skipped {
                    reason: "band produced no usable text".to_string(),
                }),
                Err(err) => parses.push(LineParse::Skipped {
                    reason: format!("band inference failed: {err:#}"),
                }),
            }
        }

        Ok(parses)
    }
}

/// A horizontal run of rows containing ink.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TextBand {
    top: u32,
    height: u32,
}

/// Cut the image into horizontal text bands using a row projection profile.
///
/// Inverted-luma sums per row; rows above a fraction of the mean ink count
/// as text, contiguous runs become bands. A blank image yields no bands.
fn segment_rows(gray: &GrayImage) -> Vec<TextBand> {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let mut row_ink = vec![0u64; height as usize];
    for y in 0..height {
        for x in 0..width {
            row_ink[y as usize] += (255 - gray.get_pixel(x, y).0[0]) as u64;
        }
    }

    let mean = row_ink.iter().sum::<u64>() as f64 / row_ink.len() as f64;
    if mean == 0.0 {
        return Vec::new();
    }
    let threshold = mean * INK_THRESHOLD_RATIO;

    let mut bands = Vec::new();
    let mut start: Option<u32> = None;
    for y in 0..height {
        let inked = row_ink[y as usize] as f64 > threshold;
        match (inked, start) {
            (true, None) => start = Some(y),
            (false, Some(s)) => {
                if y - s >= MIN_BAND_HEIGHT {
                    bands.push(TextBand {
                        top: s,
                        height: y - s,
                    });
                }
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        if height - s >= MIN_BAND_HEIGHT {
            bands.push(TextBand {
                top: s,
                height: height - s,
            });
        }
    }

    bands
}

/// Greedy CTC decode over a `[steps, vocab]` probability matrix.
///
/// Index 0 is the CTC blank; index `i` maps to `dict[i - 1]` and the class
/// one past the dictionary is a space (PaddleOCR appends it at export time).
/// Confidence is the mean winning probability over emitted characters.
fn ctc_greedy_decode(
    probs: &[f32],
    steps: usize,
    vocab_size: usize,
    dict: &[String],
) -> (String, f64) {
    let mut text = String::new();
    let mut total_prob = 0.0f64;
    let mut emitted = 0usize;
    let mut previous_class = 0usize;

    for step in 0..steps {
        let row = &probs[step * vocab_size..(step + 1) * vocab_size];
        let (best_class, best_prob) = row.iter().enumerate().fold(
            (0usize, f32::MIN),
            |(bi, bp), (i, &p)| if p > bp { (i, p) } else { (bi, bp) },
        );

        // collapse repeats, drop blanks
        if best_class != 0 && best_class != previous_class {
            if let Some(symbol) = lookup_symbol(dict, best_class) {
                text.push_str(symbol);
                total_prob += best_prob as f64;
                emitted += 1;
            }
        }
        previous_class = best_class;
    }

    let confidence = if emitted > 0 {
        total_prob / emitted as f64
    } else {
        0.0
    };
    (text, confidence)
}

fn lookup_symbol(dict: &[String], class: usize) -> Option<&str> {
    let index = class - 1;
    if index < dict.len() {
        Some(dict[index].as_str())
    } else if index == dict.len() {
        Some(" ")
    } else {
        None
    }
}

/// One dictionary symbol per line; blank lines inside the file are
/// significant only at the end, where trailing newlines are dropped.
fn parse_dict(raw: &str) -> Vec<String> {
    let mut entries: Vec<String> = raw.lines().map(|line| line.to_string()).collect();
    while entries.last().is_some_and(|e| e.is_empty()) {
        entries.pop();
    }
    entries
}
