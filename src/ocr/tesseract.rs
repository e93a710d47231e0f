//! Tesseract CLI backend.
//!
//! Writes the image to a temporary PNG and runs
//! `tesseract <in> <out> --psm N -l LANG txt tsv`, reading the plain text and
//! the per-word TSV back from the output base path. Every call uses its own
//! temp directory so the backend holds no per-run state.

use std::path::Path;
use std::process::Command;

use image::GrayImage;
use tracing::{debug, info};

use super::{tsv, OcrBackend, OcrConfig, OcrError, RecognizedPage, SegmentationMode};

pub struct TesseractCli {
    binary: String,
    tessdata_dir: Option<String>,
}

impl TesseractCli {
    /// Verify the binary runs and every language in `config.lang` is installed.
    pub fn new(config: &OcrConfig) -> Result<Self, OcrError> {
        let backend = Self {
            binary: config.tesseract_path.clone(),
            tessdata_dir: config.tessdata_dir.clone(),
        };

        let installed = backend.list_languages()?;
        let missing: Vec<&str> = config
            .lang
            .split('+')
            .map(str::trim)
            .filter(|lang| !lang.is_empty() && !installed.iter().any(|l| l == lang))
            .collect();
        if !missing.is_empty() {
            return Err(OcrError::EngineUnavailable(format!(
                "tesseract language data missing for: {}",
                missing.join(", ")
            )));
        }

        info!(
            "Tesseract ready ({}), languages: {}",
            backend.binary,
            installed.join(", ")
        );
        Ok(backend)
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(dir) = &self.tessdata_dir {
            cmd.arg("--tessdata-dir").arg(dir);
        }
        cmd
    }

    fn list_languages(&self) -> Result<Vec<String>, OcrError> {
        let output = self.command().arg("--list-langs").output().map_err(|e| {
            OcrError::EngineUnavailable(format!(
                "failed to run tesseract (is it installed? path='{}'): {}",
                self.binary, e
            ))
        })?;
        if !output.status.success() {
            return Err(OcrError::EngineUnavailable(format!(
                "tesseract --list-langs exited with {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        // Recent versions print to stdout, older ones to stderr.
        let listing = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).to_string()
        } else {
            String::from_utf8_lossy(&output.stdout).to_string()
        };
        Ok(parse_language_listing(&listing))
    }
}

impl OcrBackend for TesseractCli {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(
        &self,
        image: &GrayImage,
        lang: &str,
        mode: SegmentationMode,
    ) -> Result<RecognizedPage, OcrError> {
        let workdir = tempfile::tempdir()
            .map_err(|e| OcrError::Extraction(format!("failed to create temp dir: {}", e)))?;
        let input = workdir.path().join("input.png");
        let output_base = workdir.path().join("output");

        image
            .save(&input)
            .map_err(|e| OcrError::Extraction(format!("failed to write OCR input: {}", e)))?;

        let output = self
            .command()
            .arg(&input)
            .arg(&output_base)
            .arg("--psm")
            .arg(mode.psm().to_string())
            .arg("-l")
            .arg(lang)
            .arg("txt")
            .arg("tsv")
            .output()
            .map_err(|e| OcrError::EngineUnavailable(format!("failed to run tesseract: {}", e)))?;

        if !output.status.success() {
            return Err(OcrError::Extraction(format!(
                "tesseract exited with {} ({}): {}",
                output.status.code().unwrap_or(-1),
                mode,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let text = read_output(&output_base, "txt")?;
        let words = tsv::parse_words(&read_output(&output_base, "tsv")?);
        debug!(
            "tesseract {}: {} chars, {} words",
            mode,
            text.len(),
            words.len()
        );

        Ok(RecognizedPage { text, words })
    }
}

fn read_output(base: &Path, extension: &str) -> Result<String, OcrError> {
    let path = base.with_extension(extension);
    std::fs::read_to_string(&path).map_err(|e| {
        OcrError::Extraction(format!("missing tesseract output {}: {}", path.display(), e))
    })
}

/// Parse `tesseract --list-langs`: a header line followed by one code per line.
fn parse_language_listing(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter(|line| !line.starts_with("List of available languages"))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
