//! Extraction pipeline: input → (preprocess → OCR) → prompt → LLM → parse → sanity checks.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::llm::{CompletionClient, LlmError};
use crate::ocr::{OcrEngine, OcrError, OcrResult};
use crate::parser::{self, ParseError};
use crate::preprocess::{self, PreprocessConfig, PreprocessError, RawImage};
use crate::prompt;
use crate::retry::RetryPolicy;
use crate::sanity::SanityChecker;
use crate::schema::{
    ExtractionInput, ExtractionResult, InputSource, LlmMeta, Modality, OcrProvenance,
};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Received,
    Preprocessing,
    OcrDone,
    Prompting,
    LlmCalled,
    Parsed,
    SanityChecked,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "RECEIVED",
            Stage::Preprocessing => "PREPROCESSING",
            Stage::OcrDone => "OCR_DONE",
            Stage::Prompting => "PROMPTING",
            Stage::LlmCalled => "LLM_CALLED",
            Stage::Parsed => "PARSED",
            Stage::SanityChecked => "SANITY_CHECKED",
            Stage::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// How a failure should be presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The input couldn't be understood; retrying the same input won't help.
    Unreadable,
    /// A dependency is down or overloaded; the user can try again later.
    Unavailable,
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Ocr(#[from] OcrError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("image worker failed: {0}")]
    Worker(#[from] JoinError),
}

impl ExtractionError {
    /// Stage the run failed at.
    pub fn stage(&self) -> Stage {
        match self {
            ExtractionError::Preprocess(_) | ExtractionError::Worker(_) => Stage::Preprocessing,
            ExtractionError::Ocr(_) => Stage::OcrDone,
            ExtractionError::Llm(_) => Stage::LlmCalled,
            ExtractionError::Parse(_) => Stage::Parsed,
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            ExtractionError::Preprocess(_)
            | ExtractionError::Parse(_)
            | ExtractionError::Ocr(OcrError::NoText | OcrError::Extraction(_)) => {
                FailureClass::Unreadable
            }
            ExtractionError::Ocr(OcrError::EngineUnavailable(_))
            | ExtractionError::Llm(_)
            | ExtractionError::Worker(_) => FailureClass::Unavailable,
        }
    }

    /// Offending LLM text, when the failure was a parse error.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            ExtractionError::Parse(e) => Some(&e.raw),
            _ => None,
        }
    }
}

/// Text recovered from an image plus how it was obtained.
struct ImageText {
    content_hash: String,
    provenance: OcrProvenance,
}

/// Extraction pipeline orchestrator.
///
/// Holds only shared, immutable handles; every call to [`Extractor::run`] is
/// independent and concurrent runs don't interact.
pub struct Extractor {
    preprocess: PreprocessConfig,
    ocr: Arc<OcrEngine>,
    llm: Arc<dyn CompletionClient>,
    retry: RetryPolicy,
    sanity: SanityChecker,
}

impl Extractor {
    pub fn new(ocr: Arc<OcrEngine>, llm: Arc<dyn CompletionClient>) -> Self {
        Self {
            preprocess: PreprocessConfig::default(),
            ocr,
            llm,
            retry: RetryPolicy::default(),
            sanity: SanityChecker::default(),
        }
    }

    pub fn with_preprocess(mut self, config: PreprocessConfig) -> Self {
        self.preprocess = config;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_sanity(mut self, checker: SanityChecker) -> Self {
        self.sanity = checker;
        self
    }

    /// Run one message through the pipeline.
    ///
    /// A transaction that needs review is still a success; errors are
    /// reserved for runs that produced no transaction at all.
    pub async fn run(
        &self,
        user_id: i64,
        modality: Modality,
    ) -> Result<ExtractionResult, ExtractionError> {
        info!("[{}] user={} {}", Stage::Received, user_id, describe(&modality));

        let (source, input_text, content_hash, provenance) = match modality {
            Modality::Text(text) => {
                let hash = sha256_hex(text.as_bytes());
                (InputSource::Text, text, hash, None)
            }
            Modality::Image(path) => {
                let recovered = self.read_image(path).await?;
                let text = recovered.provenance.ocr.text.clone();
                (
                    InputSource::Ocr,
                    text,
                    recovered.content_hash,
                    Some(recovered.provenance),
                )
            }
        };

        let prompt = prompt::build_prompt(&input_text);
        debug!(
            "[{}] {} chars of input, {} char prompt for {}",
            Stage::Prompting,
            input_text.len(),
            prompt.len(),
            self.llm.model()
        );

        let (completion, attempts) = self
            .retry
            .run(|| self.llm.complete(&prompt))
            .await
            .map_err(|e| {
                warn!("[{}] giving up: {}", Stage::LlmCalled, e);
                e
            })?;
        info!(
            "[{}] model={} attempts={} response={} chars",
            Stage::LlmCalled,
            completion.model,
            attempts,
            completion.text.len()
        );

        let transaction = parser::parse(&completion.text).map_err(|e| {
            warn!("[{}] {}", Stage::Parsed, e);
            e
        })?;
        debug!(
            "[{}] intent={} amount={} category={} confidence={:.2}",
            Stage::Parsed,
            transaction.intent,
            transaction.amount,
            transaction.category,
            transaction.confidence
        );

        let report = self.sanity.evaluate(&transaction);
        info!(
            "[{}] needs_review={} flags={:?}",
            Stage::SanityChecked,
            report.needs_review,
            report.flags
        );

        let llm_meta = LlmMeta {
            model: completion.model,
            attempts,
            prompt_tokens: completion.prompt_tokens,
            completion_tokens: completion.completion_tokens,
        };
        let input = ExtractionInput {
            user_id,
            source,
            input_text,
            content_hash,
            prompt,
            ocr: provenance,
        };
        let result = ExtractionResult::new(input, transaction, report, llm_meta);

        info!("[{}] {} routed {:?}", Stage::Done, result.id, result.routing);
        Ok(result)
    }

    /// Decode, preprocess and OCR an image on the blocking pool.
    async fn read_image(&self, path: PathBuf) -> Result<ImageText, ExtractionError> {
        let ocr = Arc::clone(&self.ocr);
        let config = self.preprocess.clone();

        tokio::task::spawn_blocking(move || -> Result<ImageText, ExtractionError> {
            let bytes = std::fs::read(&path).map_err(|source| PreprocessError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let content_hash = sha256_hex(&bytes);

            let raw = RawImage::decode(&bytes)?;
            let prepared = preprocess::preprocess(raw, &config)?;
            info!(
                "[{}] {:?} -> {}x{}",
                Stage::Preprocessing,
                prepared.steps,
                prepared.width(),
                prepared.height()
            );

            let result: OcrResult = ocr.extract_text(&prepared)?;
            info!(
                "[{}] {} words at {:.1}% via {}",
                Stage::OcrDone,
                result.word_count,
                result.confidence,
                result.mode_used
            );

            Ok(ImageText {
                content_hash,
                provenance: OcrProvenance {
                    source_path: path,
                    preprocessing: prepared.steps,
                    skew_corrected_degrees: prepared.skew_corrected,
                    ocr: result,
                },
            })
        })
        .await?
    }
}

fn describe(modality: &Modality) -> String {
    match modality {
        Modality::Text(text) => format!("text ({} chars)", text.chars().count()),
        Modality::Image(path) => format!("image {}", display_name(path)),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
