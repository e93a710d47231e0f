//! Application configuration.
//!
//! Loaded from an optional JSON file (`EXTRACTOR_CONFIG`, or `config.json` when
//! present), then overridden from the environment. Every field has a default,
//! so an empty file or no file at all is a valid configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::llm::LlmConfig;
use crate::ocr::OcrConfig;
use crate::preprocess::PreprocessConfig;
use crate::retry::RetryPolicy;
use crate::sanity::SanityConfig;

const DEFAULT_CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Oldest results are evicted beyond this many.
    pub max_stored_results: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            max_stored_results: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub preprocess: PreprocessConfig,
    pub ocr: OcrConfig,
    pub llm: LlmConfig,
    pub retry: RetryPolicy,
    pub sanity: SanityConfig,
}

impl AppConfig {
    /// Load from file and environment, then validate.
    pub fn load() -> Result<Self> {
        let path = match std::env::var("EXTRACTOR_CONFIG") {
            Ok(path) => Some(PathBuf::from(path)),
            Err(_) => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                fallback.exists().then_some(fallback)
            }
        };

        let mut config = match &path {
            Some(path) => Self::from_file(path)?,
            None => {
                info!("No config file, using defaults");
                Self::default()
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {:?}", path))?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Apply environment overrides, reading variables through `lookup`.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = lookup("LLM_API_KEY").or_else(|| lookup("OPENROUTER_API_KEY")) {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = lookup("LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(lang) = lookup("OCR_LANG") {
            self.ocr.lang = lang;
        }
        if let Some(path) = lookup("TESSERACT_PATH") {
            self.ocr.tesseract_path = path;
        }
        if let Some(addr) = lookup("BIND_ADDR") {
            self.server.bind_addr = addr;
        }
    }

    /// Reject settings the pipeline can't run with.
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_key.is_none() {
            anyhow::bail!("LLM API key not set (LLM_API_KEY or OPENROUTER_API_KEY)");
        }
        if self.ocr.modes.is_empty() {
            anyhow::bail!("ocr.modes must list at least one segmentation mode");
        }
        if !(0.0..=100.0).contains(&self.ocr.confidence_threshold) {
            anyhow::bail!(
                "ocr.confidence_threshold must be within 0-100, got {}",
                self.ocr.confidence_threshold
            );
        }

        let p = &self.preprocess;
        if p.adaptive_block_size < 3 || p.adaptive_block_size % 2 == 0 {
            anyhow::bail!(
                "preprocess.adaptive_block_size must be odd and >= 3, got {}",
                p.adaptive_block_size
            );
        }
        let (low, high) = p.foreground_band;
        if !(0.0 <= low && low < high && high <= 1.0) {
            anyhow::bail!("preprocess.foreground_band must satisfy 0 <= low < high <= 1");
        }
        if p.clahe_tiles == 0 || p.min_height == 0 || p.max_short_side > p.max_long_side {
            anyhow::bail!("preprocess size/tile settings are inconsistent");
        }

        let s = &self.sanity;
        if !(0.0 <= s.low_confidence
            && s.low_confidence <= s.moderate_confidence
            && s.moderate_confidence <= 1.0)
        {
            anyhow::bail!("sanity confidence thresholds must satisfy 0 <= low <= moderate <= 1");
        }
        if !(0.0..=1.0).contains(&s.flag_penalty) {
            anyhow::bail!("sanity.flag_penalty must be within 0-1");
        }

        let r = &self.retry;
        if r.max_attempts == 0 || r.deadline_secs == 0 {
            anyhow::bail!("retry.max_attempts and retry.deadline_secs must be positive");
        }
        if r.base_delay_ms > r.max_delay_ms {
            anyhow::bail!("retry.base_delay_ms must not exceed retry.max_delay_ms");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::SegmentationMode;
    use std::collections::HashMap;

    fn valid() -> AppConfig {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("sk-test".to_string());
        config
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"ocr": {"modes": [11, 6], "confidence_threshold": 70}, "retry": {"max_attempts": 5}}"#,
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(
            config.ocr.modes,
            vec![SegmentationMode::SparseText, SegmentationMode::UniformBlock]
        );
        assert_eq!(config.ocr.confidence_threshold, 70.0);
        assert_eq!(config.ocr.lang, "ind+eng");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 800);
        assert_eq!(config.sanity.low_confidence, 0.4);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"ocr": {"modes": [7]}}"#).unwrap();
        assert!(AppConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("OPENROUTER_API_KEY", "sk-or"),
            ("LLM_MODEL", "llama-3.1-8b-instant"),
            ("LLM_BASE_URL", "https://api.groq.com/openai/v1"),
            ("OCR_LANG", "ind"),
            ("BIND_ADDR", ""),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.llm.api_key.as_deref(), Some("sk-or"));
        assert_eq!(config.llm.model, "llama-3.1-8b-instant");
        assert_eq!(config.llm.base_url, "https://api.groq.com/openai/v1");
        assert_eq!(config.ocr.lang, "ind");
        assert_eq!(config.server.bind_addr, ServerConfig::default().bind_addr);
    }

    #[test]
    fn test_llm_api_key_takes_precedence() {
        let mut config = AppConfig::default();
        config.apply_overrides(|key| match key {
            "LLM_API_KEY" => Some("primary".to_string()),
            "OPENROUTER_API_KEY" => Some("fallback".to_string()),
            _ => None,
        });
        assert_eq!(config.llm.api_key.as_deref(), Some("primary"));
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());
        assert!(AppConfig::default().validate().is_err());

        let mut config = valid();
        config.ocr.modes.clear();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.ocr.confidence_threshold = 120.0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.sanity.low_confidence = 0.7;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.preprocess.adaptive_block_size = 10;
        assert!(config.validate().is_err());
    }
}
