//! OCR engine with segmentation-mode exploration.
//!
//! Defines the [`OcrBackend`] trait so the recognizer (tesseract CLI, or a fake
//! in tests) can be swapped, and [`OcrEngine`] which tries several page
//! segmentation modes and keeps the most confident result.

pub mod tesseract;
pub mod tsv;

use std::fmt;
use std::sync::Arc;

use image::GrayImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::preprocess::PreprocessedImage;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("OCR extraction failed: {0}")]
    Extraction(String),
    #[error("OCR found no text in the image")]
    NoText,
}

/// Tesseract page segmentation modes relevant to receipts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SegmentationMode {
    /// PSM 3
    FullyAutomatic,
    /// PSM 4
    SingleColumn,
    /// PSM 6
    UniformBlock,
    /// PSM 11
    SparseText,
    /// PSM 13
    RawLine,
}

impl SegmentationMode {
    pub fn psm(self) -> u8 {
        match self {
            Self::FullyAutomatic => 3,
            Self::SingleColumn => 4,
            Self::UniformBlock => 6,
            Self::SparseText => 11,
            Self::RawLine => 13,
        }
    }

    pub fn from_psm(psm: u8) -> Option<Self> {
        match psm {
            3 => Some(Self::FullyAutomatic),
            4 => Some(Self::SingleColumn),
            6 => Some(Self::UniformBlock),
            11 => Some(Self::SparseText),
            13 => Some(Self::RawLine),
            _ => None,
        }
    }
}

impl TryFrom<u8> for SegmentationMode {
    type Error = String;

    fn try_from(psm: u8) -> Result<Self, Self::Error> {
        Self::from_psm(psm).ok_or_else(|| format!("unsupported page segmentation mode {}", psm))
    }
}

impl From<SegmentationMode> for u8 {
    fn from(mode: SegmentationMode) -> Self {
        mode.psm()
    }
}

impl fmt::Display for SegmentationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "psm {}", self.psm())
    }
}

/// A recognized token, its confidence (0–100) and its bounding box in pixels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognizedWord {
    pub text: String,
    pub confidence: f32,
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// Raw backend output for one recognition pass.
#[derive(Debug, Clone, Default)]
pub struct RecognizedPage {
    pub text: String,
    pub words: Vec<RecognizedWord>,
}

impl RecognizedPage {
    /// Mean confidence of non-empty tokens; 0 when nothing was recognized.
    pub fn mean_confidence(&self) -> f32 {
        let confidences: Vec<f32> = self
            .words
            .iter()
            .filter(|w| !w.text.trim().is_empty() && w.confidence >= 0.0)
            .map(|w| w.confidence)
            .collect();
        if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f32>() / confidences.len() as f32
        }
    }
}

/// Text recognizer behind the engine. Implementations must be reentrant.
pub trait OcrBackend: Send + Sync {
    fn name(&self) -> &str;

    fn recognize(
        &self,
        image: &GrayImage,
        lang: &str,
        mode: SegmentationMode,
    ) -> Result<RecognizedPage, OcrError>;
}

/// One mode tried during extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrAttempt {
    pub mode: SegmentationMode,
    pub confidence: f32,
}

/// Best OCR output for an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResult {
    pub text: String,
    /// 0–100
    pub confidence: f32,
    pub word_count: usize,
    pub char_count: usize,
    pub line_count: usize,
    pub mode_used: SegmentationMode,
    pub attempts: Vec<OcrAttempt>,
    pub lang: String,
    /// Word boxes of the chosen attempt, for highlighting regions of the image.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boxes: Vec<RecognizedWord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Tesseract language string, e.g. `ind+eng`.
    pub lang: String,
    /// Modes in the order they are tried.
    pub modes: Vec<SegmentationMode>,
    /// Stop trying modes once a result reaches this confidence (0–100).
    pub confidence_threshold: f32,
    pub tesseract_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tessdata_dir: Option<String>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            lang: "ind+eng".to_string(),
            modes: vec![
                SegmentationMode::UniformBlock,
                SegmentationMode::FullyAutomatic,
                SegmentationMode::SingleColumn,
            ],
            confidence_threshold: 65.0,
            tesseract_path: "tesseract".to_string(),
            tessdata_dir: None,
        }
    }
}

/// Stateless OCR engine; safe to share across concurrent runs.
pub struct OcrEngine {
    backend: Arc<dyn OcrBackend>,
    config: OcrConfig,
}

impl OcrEngine {
    pub fn new(backend: Arc<dyn OcrBackend>, config: OcrConfig) -> Self {
        Self { backend, config }
    }

    /// Extract text with the configured language and modes.
    pub fn extract_text(&self, image: &PreprocessedImage) -> Result<OcrResult, OcrError> {
        self.extract_text_with(image, &self.config.lang, &self.config.modes)
    }

    /// Try `modes` in order, stopping early once the confidence threshold is met.
    pub fn extract_text_with(
        &self,
        image: &PreprocessedImage,
        lang: &str,
        modes: &[SegmentationMode],
    ) -> Result<OcrResult, OcrError> {
        if modes.is_empty() {
            return Err(OcrError::Extraction(
                "no segmentation modes configured".to_string(),
            ));
        }

        info!(
            "Running OCR ({}) on {}x{} image, lang={}, modes={:?}",
            self.backend.name(),
            image.width(),
            image.height(),
            lang,
            modes.iter().map(|m| m.psm()).collect::<Vec<_>>()
        );

        let mut attempts = Vec::with_capacity(modes.len());
        let mut best: Option<(SegmentationMode, f32, RecognizedPage)> = None;
        let mut last_error = None;

        for &mode in modes {
            let page = match self.backend.recognize(&image.image, lang, mode) {
                Ok(page) => page,
                Err(OcrError::EngineUnavailable(reason)) => {
                    return Err(OcrError::EngineUnavailable(reason));
                }
                Err(e) => {
                    warn!("OCR {} failed: {}", mode, e);
                    attempts.push(OcrAttempt {
                        mode,
                        confidence: 0.0,
                    });
                    last_error = Some(e);
                    continue;
                }
            };

            let confidence = page.mean_confidence();
            debug!(
                "OCR {}: confidence {:.1}, {} words",
                mode,
                confidence,
                page.words.len()
            );
            attempts.push(OcrAttempt { mode, confidence });

            let improved = best.as_ref().map_or(true, |(_, c, _)| confidence > *c);
            if improved {
                best = Some((mode, confidence, page));
            }

            if confidence >= self.config.confidence_threshold {
                debug!("OCR {} met threshold, skipping remaining modes", mode);
                break;
            }
        }

        let Some((mode_used, confidence, page)) = best else {
            return Err(last_error.unwrap_or_else(|| {
                OcrError::Extraction("no OCR attempt succeeded".to_string())
            }));
        };

        let text = page.text.trim().to_string();
        if text.is_empty() {
            warn!("OCR produced no text across {} attempts", attempts.len());
            return Err(OcrError::NoText);
        }

        let boxes: Vec<RecognizedWord> = page
            .words
            .into_iter()
            .filter(|w| !w.text.trim().is_empty())
            .collect();

        let result = OcrResult {
            boxes,
            word_count: text.split_whitespace().count(),
            char_count: text.chars().count(),
            line_count: text.lines().filter(|l| !l.trim().is_empty()).count(),
            text,
            confidence,
            mode_used,
            attempts,
            lang: lang.to_string(),
        };

        info!(
            "OCR complete: {} words, {:.1}% confidence via {} ({} attempts)",
            result.word_count,
            result.confidence,
            result.mode_used,
            result.attempts.len()
        );

        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Backend returning canned pages per mode and recording calls.
    pub struct FakeBackend {
        pages: HashMap<SegmentationMode, Result<(String, f32), String>>,
        pub calls: Mutex<Vec<SegmentationMode>>,
    }

    impl FakeBackend {
        pub fn new() -> Self {
            Self {
                pages: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn with_page(mut self, mode: SegmentationMode, text: &str, confidence: f32) -> Self {
            self.pages.insert(mode, Ok((text.to_string(), confidence)));
            self
        }

        pub fn with_failure(mut self, mode: SegmentationMode, reason: &str) -> Self {
            self.pages.insert(mode, Err(reason.to_string()));
            self
        }
    }

    impl OcrBackend for FakeBackend {
        fn name(&self) -> &str {
            "fake"
        }

        fn recognize(
            &self,
            _image: &GrayImage,
            _lang: &str,
            mode: SegmentationMode,
        ) -> Result<RecognizedPage, OcrError> {
            self.calls.lock().unwrap().push(mode);
            match self.pages.get(&mode) {
                Some(Ok((text, confidence))) => Ok(RecognizedPage {
                    text: text.clone(),
                    words: text
                        .split_whitespace()
                        .enumerate()
                        .map(|(i, w)| RecognizedWord {
                            text: w.to_string(),
                            confidence: *confidence,
                            left: i as u32 * 100,
                            top: 10,
                            width: 90,
                            height: 20,
                        })
                        .collect(),
                }),
                Some(Err(reason)) => Err(OcrError::Extraction(reason.clone())),
                None => Ok(RecognizedPage::default()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeBackend;
    use super::*;
    use image::Luma;

    fn blank() -> PreprocessedImage {
        PreprocessedImage {
            image: GrayImage::from_pixel(10, 10, Luma([255])),
            steps: Vec::new(),
            skew_corrected: None,
        }
    }

    fn modes(psms: &[u8]) -> Vec<SegmentationMode> {
        psms.iter()
            .map(|p| SegmentationMode::from_psm(*p).unwrap())
            .collect()
    }

    fn engine(backend: Arc<FakeBackend>) -> OcrEngine {
        OcrEngine::new(backend, OcrConfig::default())
    }

    #[test]
    fn test_early_exit_on_first_confident_mode() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_page(SegmentationMode::UniformBlock, "TOTAL 25.000", 70.0)
                .with_page(SegmentationMode::FullyAutomatic, "TOTAL 25.000", 90.0),
        );
        let result = engine(backend.clone())
            .extract_text_with(&blank(), "ind+eng", &modes(&[6, 3, 4]))
            .unwrap();

        assert_eq!(result.attempts.len(), 1);
        assert_eq!(result.mode_used, SegmentationMode::UniformBlock);
        assert_eq!(*backend.calls.lock().unwrap(), modes(&[6]));
    }

    #[test]
    fn test_keeps_best_when_threshold_never_met() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_page(SegmentationMode::UniformBlock, "T0TAL", 40.0)
                .with_page(SegmentationMode::FullyAutomatic, "TOTAL 25.000\nKembali", 60.0)
                .with_page(SegmentationMode::SingleColumn, "TOTAL", 50.0),
        );
        let result = engine(backend)
            .extract_text_with(&blank(), "ind+eng", &modes(&[6, 3, 4]))
            .unwrap();

        assert_eq!(result.attempts.len(), 3);
        assert_eq!(result.mode_used, SegmentationMode::FullyAutomatic);
        assert_eq!(result.confidence, 60.0);
        assert_eq!(result.word_count, 3);
        assert_eq!(result.line_count, 2);
        assert_eq!(result.char_count, "TOTAL 25.000\nKembali".chars().count());
    }

    #[test]
    fn test_empty_page_scores_zero() {
        let page = RecognizedPage::default();
        assert_eq!(page.mean_confidence(), 0.0);

        let page = RecognizedPage {
            text: "a".into(),
            words: vec![
                RecognizedWord {
                    text: " ".into(),
                    confidence: 95.0,
                    ..Default::default()
                },
                RecognizedWord {
                    text: "a".into(),
                    confidence: 50.0,
                    ..Default::default()
                },
            ],
        };
        assert_eq!(page.mean_confidence(), 50.0);
    }

    #[test]
    fn test_boxes_come_from_chosen_attempt() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_page(SegmentationMode::UniformBlock, "T0TAL", 40.0)
                .with_page(SegmentationMode::FullyAutomatic, "TOTAL 25.000", 80.0),
        );
        let result = engine(backend)
            .extract_text_with(&blank(), "ind+eng", &modes(&[6, 3]))
            .unwrap();

        let texts: Vec<&str> = result.boxes.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(texts, vec!["TOTAL", "25.000"]);
        assert_eq!(result.boxes[1].left, 100);
        assert_eq!(result.boxes[1].confidence, 80.0);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["boxes"][0]["text"], "TOTAL");
        assert_eq!(json["boxes"][0]["width"], 90);
    }

    #[test]
    fn test_failed_mode_recorded_and_skipped() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_failure(SegmentationMode::UniformBlock, "segfault")
                .with_page(SegmentationMode::FullyAutomatic, "INDOMARET", 80.0),
        );
        let result = engine(backend)
            .extract_text_with(&blank(), "ind+eng", &modes(&[6, 3, 4]))
            .unwrap();
        assert_eq!(result.attempts.len(), 2);
        assert_eq!(result.attempts[0].confidence, 0.0);
        assert_eq!(result.text, "INDOMARET");
    }

    #[test]
    fn test_all_modes_failing_is_an_error() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_failure(SegmentationMode::UniformBlock, "bad")
                .with_failure(SegmentationMode::FullyAutomatic, "worse"),
        );
        let result = engine(backend).extract_text_with(&blank(), "eng", &modes(&[6, 3]));
        assert!(matches!(result, Err(OcrError::Extraction(reason)) if reason == "worse"));
    }

    #[test]
    fn test_blank_page_is_no_text() {
        let backend = Arc::new(FakeBackend::new());
        let result = engine(backend).extract_text_with(&blank(), "eng", &modes(&[6, 3]));
        assert!(matches!(result, Err(OcrError::NoText)));
    }

    #[test]
    fn test_segmentation_mode_serde_as_psm_number() {
        let json = serde_json::to_string(&SegmentationMode::UniformBlock).unwrap();
        assert_eq!(json, "6");
        let parsed: Vec<SegmentationMode> = serde_json::from_str("[3, 4]").unwrap();
        assert_eq!(parsed, modes(&[3, 4]));
        assert!(serde_json::from_str::<SegmentationMode>("7").is_err());
    }
}
