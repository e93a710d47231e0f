//! Parser for raw LLM output into a [`ParsedTransaction`].
//!
//! Models wrap the JSON in prose or code fences often enough that we never
//! decode the whole text; the first balanced `{...}` object is extracted and
//! decoded, then each field is coerced into its canonical form.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::schema::{Intent, ParsedTransaction};

/// Keys every response must carry, checked in this order.
pub const REQUIRED_KEYS: [&str; 7] = [
    "intent",
    "amount",
    "currency",
    "date",
    "category",
    "note",
    "confidence",
];

const DEFAULT_CURRENCY: &str = "IDR";

/// Why a response couldn't be turned into a transaction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseFailure {
    #[error("no JSON object found")]
    NoJsonObject,
    #[error("unbalanced braces in JSON object")]
    Unbalanced,
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("missing required key '{0}'")]
    MissingKey(&'static str),
    #[error("unrecognized intent '{0}'")]
    UnknownIntent(String),
    #[error("invalid amount '{0}'")]
    InvalidAmount(String),
    #[error("negative amount {0}")]
    NegativeAmount(f64),
    #[error("invalid confidence '{0}'")]
    InvalidConfidence(String),
}

/// Parse failure plus the raw text that caused it.
#[derive(Debug, Clone, Error)]
#[error("failed to parse LLM output: {failure}")]
pub struct ParseError {
    pub failure: ParseFailure,
    pub raw: String,
}

impl ParseError {
    fn new(failure: ParseFailure, raw: &str) -> Self {
        Self {
            failure,
            raw: raw.to_string(),
        }
    }
}

/// Parse a model response into a transaction.
pub fn parse(text: &str) -> Result<ParsedTransaction, ParseError> {
    parse_object(text).map_err(|failure| ParseError::new(failure, text))
}

fn parse_object(text: &str) -> Result<ParsedTransaction, ParseFailure> {
    let json = extract_json_object(text)?;
    let value: Value =
        serde_json::from_str(json).map_err(|e| ParseFailure::InvalidJson(e.to_string()))?;
    let Value::Object(object) = value else {
        return Err(ParseFailure::InvalidJson("not an object".to_string()));
    };

    for key in REQUIRED_KEYS {
        if !object.contains_key(key) {
            return Err(ParseFailure::MissingKey(key));
        }
    }

    Ok(ParsedTransaction {
        intent: parse_intent(&object["intent"])?,
        amount: parse_amount(&object["amount"])?,
        currency: string_field(&object, "currency")
            .map(|c| c.to_uppercase())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        date: string_field(&object, "date"),
        category: string_field(&object, "category")
            .map(|c| c.to_lowercase())
            .unwrap_or_default(),
        note: string_field(&object, "note").unwrap_or_default(),
        confidence: parse_confidence(&object["confidence"])?,
        raw_output: text.to_string(),
    })
}

/// Return the first balanced `{...}` span in `text`.
///
/// Braces inside JSON string literals don't count toward nesting.
pub fn extract_json_object(text: &str) -> Result<&str, ParseFailure> {
    let start = text.find('{').ok_or(ParseFailure::NoJsonObject)?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    Err(ParseFailure::Unbalanced)
}

fn parse_intent(value: &Value) -> Result<Intent, ParseFailure> {
    let raw = match value {
        Value::String(s) => s.trim().to_lowercase(),
        other => return Err(ParseFailure::UnknownIntent(other.to_string())),
    };
    match raw.as_str() {
        "income" | "pemasukan" | "masuk" => Ok(Intent::Income),
        "expense" | "pengeluaran" | "keluar" => Ok(Intent::Expense),
        _ => Err(ParseFailure::UnknownIntent(raw)),
    }
}

fn parse_amount(value: &Value) -> Result<f64, ParseFailure> {
    let amount = match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ParseFailure::InvalidAmount(n.to_string()))?,
        Value::String(s) => normalize_amount(s)?,
        other => return Err(ParseFailure::InvalidAmount(other.to_string())),
    };
    if amount < 0.0 {
        return Err(ParseFailure::NegativeAmount(amount));
    }
    Ok(amount)
}

fn amount_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:rp\.?|idr)?(-)?([0-9][0-9.,]*)(rb|ribu|k|jt|juta|miliar|milyar)?$")
            .expect("amount pattern is valid")
    })
}

fn multiplier(suffix: &str) -> f64 {
    match suffix {
        "rb" | "ribu" | "k" => 1_000.0,
        "jt" | "juta" => 1_000_000.0,
        "miliar" | "milyar" => 1_000_000_000.0,
        _ => 1.0,
    }
}

/// Normalize a human-written amount such as `25rb`, `Rp 1.250.000` or `1,5jt`.
///
/// Idempotent: normalizing the textual form of a result yields the same value.
pub fn normalize_amount(raw: &str) -> Result<f64, ParseFailure> {
    let invalid = || ParseFailure::InvalidAmount(raw.to_string());

    let mut compact: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    // "25.000,-" is a common way of writing a round amount
    for tail in [",-", ".-"] {
        if let Some(stripped) = compact.strip_suffix(tail) {
            compact = stripped.to_string();
        }
    }

    let captures = amount_pattern().captures(&compact).ok_or_else(invalid)?;
    let number = parse_number(&captures[2]).ok_or_else(invalid)?;
    let scale = captures.get(3).map_or(1.0, |m| multiplier(m.as_str()));
    let amount = round_cents(number * scale);

    if captures.get(1).is_some() && amount != 0.0 {
        return Err(ParseFailure::NegativeAmount(-amount));
    }
    Ok(amount)
}

/// Parse digits with Indonesian or English separators.
///
/// When both `.` and `,` appear the last one is the decimal mark. A single
/// separator followed by exactly three digits is a thousands separator.
fn parse_number(digits: &str) -> Option<f64> {
    let dots = digits.matches('.').count();
    let commas = digits.matches(',').count();

    let canonical = match (dots, commas) {
        (0, 0) => digits.to_string(),
        (_, 0) | (0, _) => {
            let sep = if dots > 0 { '.' } else { ',' };
            let count = dots.max(commas);
            let after = digits.rsplit(sep).next().unwrap_or_default();
            if count > 1 || after.len() == 3 {
                digits.replace(sep, "")
            } else {
                digits.replace(sep, ".")
            }
        }
        _ => {
            let last_dot = digits.rfind('.')?;
            let last_comma = digits.rfind(',')?;
            if last_comma > last_dot {
                digits.replace('.', "").replace(',', ".")
            } else {
                digits.replace(',', "")
            }
        }
    };

    canonical.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn parse_confidence(value: &Value) -> Result<f64, ParseFailure> {
    let invalid = || ParseFailure::InvalidConfidence(value.to_string());
    let raw = match value {
        Value::Number(n) => n.as_f64().ok_or_else(invalid)?,
        Value::String(s) => s
            .trim()
            .trim_end_matches('%')
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };
    if !raw.is_finite() {
        return Err(invalid());
    }

    let scaled = if raw > 1.0 && raw <= 100.0 {
        raw / 100.0
    } else {
        raw
    };
    Ok(scaled.clamp(0.0, 1.0))
}

/// Read an optional string field; null and blank values become `None`.
fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}
