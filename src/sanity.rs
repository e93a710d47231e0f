//! Rule-based sanity checks over a parsed transaction.
//!
//! Findings are data, never errors: every rule either adds a review flag or a
//! warning to the [`SanityReport`]. Flags are emitted in rule order, and each
//! flag costs a fixed confidence penalty.

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::schema::{Intent, ParsedTransaction, SanityReport};
use crate::taxonomy::{self, UNCATEGORIZED};

pub const FLAG_INVALID_AMOUNT: &str = "invalid_amount";
pub const FLAG_HIGH_AMOUNT: &str = "unusually_high_amount";
pub const FLAG_LOW_CONFIDENCE: &str = "low_confidence";
pub const FLAG_MODERATE_CONFIDENCE: &str = "moderate_confidence";
pub const FLAG_FUTURE_DATE: &str = "future_date";
pub const FLAG_OLD_DATE: &str = "old_date";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanityConfig {
    /// Below this the transaction is flagged `low_confidence`.
    pub low_confidence: f64,
    /// Below this (and above `low_confidence`) it is flagged `moderate_confidence`.
    pub moderate_confidence: f64,
    /// Subtracted from the confidence once per flag.
    pub flag_penalty: f64,
    pub high_amount: f64,
    pub small_amount: f64,
    pub small_income: f64,
    pub large_expense: f64,
    pub max_future_days: i64,
    pub max_age_days: i64,
}

impl Default for SanityConfig {
    fn default() -> Self {
        Self {
            low_confidence: 0.4,
            moderate_confidence: 0.6,
            flag_penalty: 0.05,
            high_amount: 1_000_000_000.0,
            small_amount: 1_000.0,
            small_income: 10_000.0,
            large_expense: 10_000_000.0,
            max_future_days: 7,
            max_age_days: 365,
        }
    }
}

/// Stateless evaluator; cheap to clone and share.
#[derive(Debug, Clone, Default)]
pub struct SanityChecker {
    config: SanityConfig,
}

#[derive(Default)]
struct Findings {
    flags: Vec<String>,
    warnings: Vec<String>,
}

impl Findings {
    fn flag(&mut self, flag: &str) {
        self.flags.push(flag.to_string());
    }

    fn warn(&mut self, warning: String) {
        self.warnings.push(warning);
    }
}

impl SanityChecker {
    pub fn new(config: SanityConfig) -> Self {
        Self { config }
    }

    /// Evaluate against today's local date.
    pub fn evaluate(&self, parsed: &ParsedTransaction) -> SanityReport {
        self.evaluate_on(parsed, Local::now().date_naive())
    }

    /// Evaluate with an explicit reference date for the date rules.
    pub fn evaluate_on(&self, parsed: &ParsedTransaction, today: NaiveDate) -> SanityReport {
        let mut findings = Findings::default();

        self.check_amount(parsed.amount, &mut findings);
        self.check_confidence(parsed.confidence, &mut findings);
        let normalized_category = normalize_category(&parsed.category, &mut findings);
        let normalized_date = self.check_date(parsed.date.as_deref(), today, &mut findings);
        self.check_intent_amount(parsed.intent, parsed.amount, &mut findings);

        let penalty = self.config.flag_penalty * findings.flags.len() as f64;
        let adjusted_confidence = (parsed.confidence - penalty).max(0.0);

        debug!(
            "Sanity checks: {} flags, {} warnings, confidence {:.2} -> {:.2}",
            findings.flags.len(),
            findings.warnings.len(),
            parsed.confidence,
            adjusted_confidence
        );

        SanityReport {
            needs_review: !findings.flags.is_empty(),
            flags: findings.flags,
            adjusted_confidence,
            warnings: findings.warnings,
            normalized_category,
            normalized_date,
        }
    }

    fn check_amount(&self, amount: f64, findings: &mut Findings) {
        if amount <= 0.0 {
            findings.flag(FLAG_INVALID_AMOUNT);
        } else if amount > self.config.high_amount {
            findings.flag(FLAG_HIGH_AMOUNT);
        } else if amount < self.config.small_amount {
            findings.warn(format!("unusually low amount: {}", amount));
        }
    }

    fn check_confidence(&self, confidence: f64, findings: &mut Findings) {
        if confidence < self.config.low_confidence {
            findings.flag(FLAG_LOW_CONFIDENCE);
        } else if confidence < self.config.moderate_confidence {
            findings.flag(FLAG_MODERATE_CONFIDENCE);
        }
    }

    fn check_date(
        &self,
        raw: Option<&str>,
        today: NaiveDate,
        findings: &mut Findings,
    ) -> Option<NaiveDate> {
        let raw = raw?.trim();
        if raw.is_empty() {
            return None;
        }

        let Some(date) = normalize_date(raw) else {
            findings.warn(format!("unrecognized date '{}'", raw));
            return None;
        };

        let days_ahead = (date - today).num_days();
        if days_ahead > self.config.max_future_days {
            findings.flag(FLAG_FUTURE_DATE);
        } else if -days_ahead > self.config.max_age_days {
            findings.flag(FLAG_OLD_DATE);
        }
        Some(date)
    }

    fn check_intent_amount(&self, intent: Intent, amount: f64, findings: &mut Findings) {
        if amount <= 0.0 {
            return;
        }
        match intent {
            Intent::Income if amount < self.config.small_income => {
                findings.warn(format!("income of {} is unusually small", amount));
            }
            Intent::Expense if amount > self.config.large_expense => {
                findings.warn(format!(
                    "expense of {} is unusually large for a personal transaction",
                    amount
                ));
            }
            _ => {}
        }
    }
}

/// Map a category onto the taxonomy, recording every correction.
fn normalize_category(raw: &str, findings: &mut Findings) -> String {
    let category = raw.trim().to_lowercase();

    if category.is_empty() {
        findings.warn("uncategorized: no category given".to_string());
        return UNCATEGORIZED.to_string();
    }
    if category == UNCATEGORIZED {
        findings.warn("uncategorized".to_string());
        return category;
    }
    if taxonomy::is_canonical(&category) {
        return category;
    }
    if let Some(canonical) = taxonomy::synonym(&category) {
        findings.warn(format!(
            "category '{}' mapped to '{}'",
            category, canonical
        ));
        return canonical.to_string();
    }

    findings.warn(format!(
        "unknown category '{}', using '{}'",
        category, UNCATEGORIZED
    ));
    UNCATEGORIZED.to_string()
}

const NUMERIC_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d"];

/// Parse the date forms users and models produce into a calendar date.
pub fn normalize_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();

    for format in NUMERIC_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }

    // ISO timestamps: keep the date part
    if raw.len() > 10 && raw.is_char_boundary(10) {
        let (head, tail) = raw.split_at(10);
        if tail.starts_with('T') || tail.starts_with(' ') {
            if let Ok(date) = NaiveDate::parse_from_str(head, "%Y-%m-%d") {
                return Some(date);
            }
        }
    }

    // "5 Des 2024", "05 december 2024", "1 Agustus, 2024"
    let cleaned = raw.replace(',', " ");
    let parts: Vec<&str> = cleaned.split_whitespace().collect();
    let [day, month, year] = parts.as_slice() else {
        return None;
    };
    let day: u32 = day.parse().ok()?;
    let month = month_number(month)?;
    let year: i32 = year.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn month_number(name: &str) -> Option<u32> {
    let name = name.trim_end_matches('.').to_lowercase();
    let month = match name.as_str() {
        "jan" | "januari" | "january" => 1,
        "feb" | "februari" | "pebruari" | "february" => 2,
        "mar" | "maret" | "march" => 3,
        "apr" | "april" => 4,
        "mei" | "may" => 5,
        "jun" | "juni" | "june" => 6,
        "jul" | "juli" | "july" => 7,
        "agu" | "agt" | "agus" | "agustus" | "aug" | "august" => 8,
        "sep" | "sept" | "september" => 9,
        "okt" | "oktober" | "oct" | "october" => 10,
        "nov" | "nop" | "november" | "nopember" => 11,
        "des" | "desember" | "dec" | "december" => 12,
        _ => return None,
    };
    Some(month)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 10).unwrap()
    }

    fn tx(intent: Intent, amount: f64, category: &str, confidence: f64) -> ParsedTransaction {
        ParsedTransaction {
            intent,
            amount,
            currency: "IDR".to_string(),
            date: None,
            category: category.to_string(),
            note: String::new(),
            confidence,
            raw_output: String::new(),
        }
    }

    fn check(parsed: &ParsedTransaction) -> SanityReport {
        SanityChecker::default().evaluate_on(parsed, today())
    }

    #[test]
    fn test_clean_transaction_passes() {
        let report = check(&tx(Intent::Expense, 25000.0, "makan", 0.95));
        assert!(!report.needs_review);
        assert!(report.flags.is_empty());
        assert!(report.warnings.is_empty());
        assert_eq!(report.adjusted_confidence, 0.95);
        assert_eq!(report.normalized_category, "makan");
    }

    #[test]
    fn test_invalid_amount_flagged() {
        let report = check(&tx(Intent::Expense, 0.0, "makan", 0.9));
        assert_eq!(report.flags, vec![FLAG_INVALID_AMOUNT]);
        assert!(report.needs_review);
    }

    #[test]
    fn test_confidence_bands() {
        let report = check(&tx(Intent::Expense, 25000.0, "makan", 0.2));
        assert_eq!(report.flags, vec![FLAG_LOW_CONFIDENCE]);
        assert!(report.needs_review);
        assert!((report.adjusted_confidence - 0.15).abs() < 1e-9);

        let report = check(&tx(Intent::Expense, 25000.0, "makan", 0.5));
        assert_eq!(report.flags, vec![FLAG_MODERATE_CONFIDENCE]);

        let report = check(&tx(Intent::Expense, 25000.0, "makan", 0.6));
        assert!(report.flags.is_empty());
    }

    #[test]
    fn test_flags_never_raise_confidence() {
        let clean = check(&tx(Intent::Expense, 25000.0, "makan", 0.5));
        let flagged = check(&tx(Intent::Expense, 0.0, "makan", 0.5));
        assert!(flagged.flags.len() > clean.flags.len());
        assert!(flagged.adjusted_confidence < clean.adjusted_confidence);

        let floor = check(&tx(Intent::Expense, 0.0, "makan", 0.02));
        assert_eq!(floor.adjusted_confidence, 0.0);
    }

    #[test]
    fn test_category_mapping() {
        let report = check(&tx(Intent::Expense, 100000.0, "Bensin", 0.9));
        assert_eq!(report.normalized_category, "transportasi");
        assert_eq!(report.warnings.len(), 1);
        assert!(!report.needs_review);

        let report = check(&tx(Intent::Expense, 100000.0, "spaceship", 0.9));
        assert_eq!(report.normalized_category, UNCATEGORIZED);
        assert!(report.warnings[0].contains("spaceship"));

        let report = check(&tx(Intent::Expense, 100000.0, "", 0.9));
        assert_eq!(report.normalized_category, UNCATEGORIZED);
    }

    #[test]
    fn test_amount_warnings() {
        let report = check(&tx(Intent::Expense, 500.0, "makan", 0.9));
        assert!(!report.needs_review);
        assert_eq!(report.warnings.len(), 1);

        let report = check(&tx(Intent::Income, 5000.0, "gaji", 0.9));
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("income"));

        let report = check(&tx(Intent::Expense, 15_000_000.0, "belanja", 0.9));
        assert!(report.warnings[0].contains("expense"));

        let report = check(&tx(Intent::Expense, 2_000_000_000.0, "belanja", 0.9));
        assert_eq!(report.flags, vec![FLAG_HIGH_AMOUNT]);
    }

    #[test]
    fn test_date_rules() {
        let mut parsed = tx(Intent::Expense, 25000.0, "makan", 0.9);

        parsed.date = Some("01/12/2024".to_string());
        let report = check(&parsed);
        assert_eq!(report.normalized_date, NaiveDate::from_ymd_opt(2024, 12, 1));
        assert!(report.flags.is_empty());

        parsed.date = Some("2025-01-01".to_string());
        assert_eq!(check(&parsed).flags, vec![FLAG_FUTURE_DATE]);

        parsed.date = Some("1 Des 2022".to_string());
        assert_eq!(check(&parsed).flags, vec![FLAG_OLD_DATE]);

        parsed.date = Some("kemarin".to_string());
        let report = check(&parsed);
        assert!(report.flags.is_empty());
        assert_eq!(report.normalized_date, None);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_normalize_date_forms() {
        let expected = NaiveDate::from_ymd_opt(2024, 12, 1);
        for raw in [
            "2024-12-01",
            "01/12/2024",
            "01-12-2024",
            "1 Des 2024",
            "1 December 2024",
            "01 desember, 2024",
            "2024-12-01T08:30:00",
        ] {
            assert_eq!(normalize_date(raw), expected, "{}", raw);
        }
        assert_eq!(normalize_date("31 Feb 2024"), None);
        assert_eq!(normalize_date("besok"), None);
    }

    #[test]
    fn test_flags_in_rule_order() {
        let mut parsed = tx(Intent::Expense, 0.0, "makan", 0.1);
        parsed.date = Some("2030-01-01".to_string());
        let report = check(&parsed);
        assert_eq!(
            report.flags,
            vec![FLAG_INVALID_AMOUNT, FLAG_LOW_CONFIDENCE, FLAG_FUTURE_DATE]
        );
        assert_eq!(report.adjusted_confidence, 0.0);
    }
}
