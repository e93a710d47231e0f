//! Transaction extraction schema types.
//!
//! These are the values handed to callers once a message has gone through the
//! pipeline. Everything here is constructed fresh per run and never mutated
//! after the orchestrator returns it.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ocr::OcrResult;
use crate::preprocess::PreprocessStep;

/// Direction of money flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Intent {
    Income,
    Expense,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Income => write!(f, "INCOME"),
            Intent::Expense => write!(f, "EXPENSE"),
        }
    }
}

/// Canonical output of the LLM parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTransaction {
    pub intent: Intent,
    /// Never negative; the parser rejects negative values.
    pub amount: f64,
    pub currency: String,
    /// Date as the model returned it. Normalized by the sanity checks.
    pub date: Option<String>,
    pub category: String,
    pub note: String,
    /// Self-reported model confidence, 0.0–1.0.
    pub confidence: f64,
    /// Original LLM text, kept for audit.
    pub raw_output: String,
}

/// Result of the sanity checks for one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanityReport {
    pub needs_review: bool,
    pub flags: Vec<String>,
    pub adjusted_confidence: f64,
    pub warnings: Vec<String>,
    pub normalized_category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_date: Option<NaiveDate>,
}

/// Inbound payload for one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Modality {
    Text(String),
    /// Local path of an already-downloaded image.
    Image(PathBuf),
}

/// Where the text handed to the LLM came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    Text,
    Ocr,
}

/// Routing decision for downstream bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Routing {
    AutoConfirm,
    NeedsReview,
}

/// Metadata about the LLM call that produced the transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMeta {
    pub model: String,
    pub attempts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
}

/// OCR provenance attached to image-derived results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrProvenance {
    pub source_path: PathBuf,
    pub preprocessing: Vec<PreprocessStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skew_corrected_degrees: Option<f32>,
    pub ocr: OcrResult,
}

/// What went into a run, before the LLM saw it.
#[derive(Debug, Clone)]
pub struct ExtractionInput {
    pub user_id: i64,
    pub source: InputSource,
    pub input_text: String,
    pub content_hash: String,
    pub prompt: String,
    pub ocr: Option<OcrProvenance>,
}

/// Final orchestrator output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub id: String,
    pub user_id: i64,
    pub source: InputSource,
    /// Text handed to the prompt builder (chat text or OCR output).
    pub input_text: String,
    pub content_hash: String,
    pub prompt: String,
    pub transaction: ParsedTransaction,
    pub report: SanityReport,
    pub routing: Routing,
    pub llm: LlmMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr: Option<OcrProvenance>,
    pub extracted_at: DateTime<Utc>,
    pub extractor_version: String,
}

impl ExtractionResult {
    pub fn new(
        input: ExtractionInput,
        transaction: ParsedTransaction,
        report: SanityReport,
        llm: LlmMeta,
    ) -> Self {
        let routing = if report.needs_review {
            Routing::NeedsReview
        } else {
            Routing::AutoConfirm
        };

        Self {
            id: format!("trx_{}", Uuid::new_v4().simple()),
            user_id: input.user_id,
            source: input.source,
            input_text: input.input_text,
            content_hash: input.content_hash,
            prompt: input.prompt,
            transaction,
            report,
            routing,
            llm,
            ocr: input.ocr,
            extracted_at: Utc::now(),
            extractor_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn needs_review(&self) -> bool {
        self.routing == Routing::NeedsReview
    }
}
