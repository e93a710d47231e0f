//! Parser for tesseract's TSV output.
//!
//! Columns: `level page_num block_num par_num line_num word_num left top
//! width height conf text`. Only level-5 rows are words; other levels carry
//! a confidence of -1.

use serde::Deserialize;

use super::RecognizedWord;

const WORD_LEVEL: u8 = 5;

#[derive(Debug, Deserialize)]
struct TsvRow {
    level: u8,
    left: u32,
    top: u32,
    width: u32,
    height: u32,
    conf: f32,
    #[serde(default)]
    text: String,
}

/// Extract recognized words with their boxes and confidences, in reading order.
pub fn parse_words(tsv: &str) -> Vec<RecognizedWord> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .flexible(true)
        .has_headers(true)
        .from_reader(tsv.as_bytes());

    reader
        .deserialize::<TsvRow>()
        .filter_map(|row| match row {
            Ok(row) => Some(row),
            Err(e) => {
                tracing::trace!("Skipping TSV row: {}", e);
                None
            }
        })
        .filter(|row| row.level == WORD_LEVEL)
        .filter_map(|row| {
            let text = row.text.trim();
            if text.is_empty() {
                return None;
            }
            Some(RecognizedWord {
                text: text.to_string(),
                confidence: row.conf,
                left: row.left,
                top: row.top,
                width: row.width,
                height: row.height,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    const SAMPLE: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t800\t1200\t-1\t
2\t1\t1\t0\t0\t0\t40\t30\t500\t60\t-1\t
5\t1\t1\t1\t1\t1\t40\t30\t120\t30\t91.5\tINDOMARET
5\t1\t1\t1\t1\t2\t170\t30\t80\t30\t88\tPOINT
5\t1\t1\t1\t2\t1\t40\t70\t80\t30\t-1\t
5\t1\t1\t1\t2\t2\t130\t70\t100\t30\t62.25\t25.000
";

    #[test]
    fn test_parses_word_rows_only() {
        let words = parse_words(SAMPLE);
        let texts: Vec<&str> = words.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["INDOMARET", "POINT", "25.000"]);
        assert_eq!(words[0].confidence, 91.5);
        assert_eq!(words[2].confidence, 62.25);
    }

    #[test]
    fn test_word_boxes() {
        let words = parse_words(SAMPLE);
        let total = &words[2];
        assert_eq!(
            (total.left, total.top, total.width, total.height),
            (130, 70, 100, 30)
        );
        assert_eq!((words[1].left, words[1].top), (170, 30));
    }

    #[test]
    fn test_quotes_are_literal_text() {
        let tsv = format!("{}\n5\t1\t1\t1\t1\t1\t10\t20\t30\t40\t77\t\"Kopi\n", HEADER);
        let words = parse_words(&tsv);
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].text, "\"Kopi");
    }

    #[test]
    fn test_malformed_rows_skipped() {
        let tsv = format!(
            "{}\n5\t1\t1\nnot a row\n5\t1\t1\t1\t1\t1\t0\t0\t1\t1\tabc\tword\n5\t1\t1\t1\t1\t2\t0\t0\t1\t1\t80\tok\n",
            HEADER
        );
        let words = parse_words(&tsv);
        let texts: Vec<&str> = words.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["ok"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_words("").is_empty());
    }
}
