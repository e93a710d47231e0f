//! Extraction prompt for the LLM.
//!
//! The prompt is a fixed rule block, a fixed set of worked examples, then the
//! caller's text verbatim. Rendering is deterministic so identical input always
//! yields an identical prompt.

use crate::taxonomy::CATEGORIES;

/// System message sent alongside the prompt.
pub const SYSTEM_MESSAGE: &str =
    "You are a finance transaction parser. Extract intent, amount, category, date clearly.";

const RULES_HEADER: &str = r#"Kamu adalah asisten keuangan yang mengekstrak informasi transaksi dari pesan chat atau teks struk (hasil OCR).
Analisis teks dan hasilkan SATU objek JSON dengan format berikut:

{"intent": "income|expense", "amount": <angka>, "currency": "IDR", "date": "YYYY-MM-DD" atau null, "category": "<kategori>", "note": "<catatan singkat>", "confidence": <0.0-1.0>}

Aturan intent:
- income: uang masuk (gaji, bonus, transfer masuk, hasil jualan)
- expense: uang keluar (belanja, makan, bayar tagihan, transfer keluar)
"#;

const RULES_FOOTER: &str = r#"Aturan nominal:
- "rb", "ribu", "k" = x1.000 (contoh: 25rb = 25000)
- "jt", "juta" = x1.000.000 (contoh: 5jt = 5000000)
- "miliar", "milyar" = x1.000.000.000
- amount selalu angka bulat positif tanpa pemisah ribuan
- currency selalu "IDR" kecuali mata uang lain disebut jelas

Aturan confidence:
- 0.9-1.0: nominal, intent, dan kategori jelas
- 0.6-0.8: ada sedikit ambiguitas
- di bawah 0.6: ambigu, butuh konfirmasi pengguna

Kasus khusus:
- Jika tidak ada nominal: amount = 0 dan confidence di bawah 0.3
- Jika bahasa campur (Indonesia + Inggris): tetap ekstrak
- Jika teks struk berantakan: ambil TOTAL saja
- Jika ada beberapa item: gunakan total keseluruhan

HANYA keluarkan JSON, tanpa penjelasan.
"#;

/// Worked examples as (input, expected output).
const FEW_SHOT_EXAMPLES: &[(&str, &str)] = &[
    (
        "makan siang 25rb",
        r#"{"intent": "expense", "amount": 25000, "currency": "IDR", "date": null, "category": "makan", "note": "makan siang", "confidence": 0.95}"#,
    ),
    (
        "gaji masuk 5jt",
        r#"{"intent": "income", "amount": 5000000, "currency": "IDR", "date": null, "category": "gaji", "note": "gaji bulanan", "confidence": 0.95}"#,
    ),
    (
        "bayar listrik 350000",
        r#"{"intent": "expense", "amount": 350000, "currency": "IDR", "date": null, "category": "tagihan", "note": "bayar listrik", "confidence": 0.9}"#,
    ),
    (
        "beli buku 50rb tgl 5 desember 2024",
        r#"{"intent": "expense", "amount": 50000, "currency": "IDR", "date": "2024-12-05", "category": "pendidikan", "note": "beli buku", "confidence": 0.9}"#,
    ),
    (
        "INDOMARET\nAQUA 600ML 3.500\nROTI TAWAR 15.000\nTOTAL 18.500\nTUNAI 20.000\nKEMBALI 1.500",
        r#"{"intent": "expense", "amount": 18500, "currency": "IDR", "date": null, "category": "belanja", "note": "belanja Indomaret", "confidence": 0.85}"#,
    ),
    (
        "isi bensin pertalite 100k",
        r#"{"intent": "expense", "amount": 100000, "currency": "IDR", "date": null, "category": "transportasi", "note": "isi bensin", "confidence": 0.9}"#,
    ),
    (
        "tadi ada yang transfer",
        r#"{"intent": "income", "amount": 0, "currency": "IDR", "date": null, "category": "transfer", "note": "transfer masuk tanpa nominal", "confidence": 0.2}"#,
    ),
];

/// Render the full prompt for `input_text`. The input is appended unmodified.
pub fn build_prompt(input_text: &str) -> String {
    let mut prompt = String::with_capacity(4096 + input_text.len());
    prompt.push_str(RULES_HEADER);
    prompt.push('\n');

    prompt.push_str("Kategori yang valid:\n");
    for category in CATEGORIES {
        prompt.push_str(&format!("- {}: {}\n", category.name, category.description));
    }
    prompt.push('\n');
    prompt.push_str(RULES_FOOTER);
    prompt.push('\n');

    prompt.push_str("Contoh:\n\n");
    for (input, output) in FEW_SHOT_EXAMPLES {
        prompt.push_str(&format!("Input: \"{}\"\nOutput: {}\n\n", input, output));
    }

    prompt.push_str("Sekarang analisis input berikut:\n");
    prompt.push_str(&format!("Input: \"{}\"\nOutput:", input_text));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    #[test]
    fn test_deterministic() {
        assert_eq!(build_prompt("kopi 18rb"), build_prompt("kopi 18rb"));
        assert_ne!(build_prompt("kopi 18rb"), build_prompt("kopi 19rb"));
    }

    #[test]
    fn test_input_appended_verbatim() {
        let input = "  Makan siang \"warteg\" {25rb}\n";
        let prompt = build_prompt(input);
        assert!(prompt.ends_with(&format!("Input: \"{}\"\nOutput:", input)));
    }

    #[test]
    fn test_contains_rules_and_taxonomy() {
        let prompt = build_prompt("x");
        for category in CATEGORIES {
            assert!(prompt.contains(&format!("- {}:", category.name)));
        }
        assert!(prompt.contains("\"jt\", \"juta\""));
        assert!(prompt.contains("\"rb\", \"ribu\", \"k\""));
        assert!(prompt.contains("income|expense"));
    }

    #[test]
    fn test_few_shot_outputs_are_parseable() {
        for (_, output) in FEW_SHOT_EXAMPLES {
            parser::parse(output).unwrap_or_else(|e| panic!("{}: {}", output, e));
        }
    }
}
