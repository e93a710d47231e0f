//! Transaction category taxonomy shared by the prompt and the sanity checks.

/// Fallback for anything that can't be classified.
pub const UNCATEGORIZED: &str = "lainnya";

pub struct Category {
    pub name: &'static str,
    pub description: &'static str,
}

/// Canonical categories, in the order they are presented to the model.
pub const CATEGORIES: &[Category] = &[
    Category {
        name: "makan",
        description: "makanan, snack, restoran, warung",
    },
    Category {
        name: "minuman",
        description: "kopi, teh, minuman",
    },
    Category {
        name: "belanja",
        description: "groceries, minimarket, shopping",
    },
    Category {
        name: "transportasi",
        description: "bensin, parkir, tol, grab, gojek",
    },
    Category {
        name: "tagihan",
        description: "listrik, air, internet, pulsa, sewa",
    },
    Category {
        name: "hiburan",
        description: "nonton, game, langganan streaming, liburan",
    },
    Category {
        name: "kesehatan",
        description: "obat, dokter, apotek",
    },
    Category {
        name: "pendidikan",
        description: "buku, kursus, sekolah, kuliah",
    },
    Category {
        name: "gaji",
        description: "gaji bulanan, bonus, THR, komisi",
    },
    Category {
        name: "transfer",
        description: "transfer masuk atau keluar",
    },
    Category {
        name: UNCATEGORIZED,
        description: "tidak terklasifikasi",
    },
];

/// Synonyms, English equivalents and common misspellings.
const SYNONYMS: &[(&str, &str)] = &[
    // makan
    ("makanan", "makan"),
    ("food", "makan"),
    ("meal", "makan"),
    ("snack", "makan"),
    ("jajan", "makan"),
    ("restoran", "makan"),
    ("restaurant", "makan"),
    ("warteg", "makan"),
    ("makn", "makan"),
    ("maka", "makan"),
    // minuman
    ("minum", "minuman"),
    ("drink", "minuman"),
    ("drinks", "minuman"),
    ("kopi", "minuman"),
    ("coffee", "minuman"),
    ("minuma", "minuman"),
    // belanja
    ("shopping", "belanja"),
    ("groceries", "belanja"),
    ("grocery", "belanja"),
    ("minimarket", "belanja"),
    ("supermarket", "belanja"),
    ("belanjaan", "belanja"),
    ("blanja", "belanja"),
    // transportasi
    ("transport", "transportasi"),
    ("transportation", "transportasi"),
    ("bensin", "transportasi"),
    ("bbm", "transportasi"),
    ("parkir", "transportasi"),
    ("ojek", "transportasi"),
    ("ojol", "transportasi"),
    ("grab", "transportasi"),
    ("gojek", "transportasi"),
    ("tol", "transportasi"),
    ("transportsi", "transportasi"),
    ("trasportasi", "transportasi"),
    // tagihan
    ("bills", "tagihan"),
    ("bill", "tagihan"),
    ("utilities", "tagihan"),
    ("listrik", "tagihan"),
    ("pulsa", "tagihan"),
    ("internet", "tagihan"),
    ("sewa", "tagihan"),
    ("tagihn", "tagihan"),
    // hiburan
    ("entertainment", "hiburan"),
    ("nonton", "hiburan"),
    ("bioskop", "hiburan"),
    ("game", "hiburan"),
    ("streaming", "hiburan"),
    ("liburan", "hiburan"),
    ("hiburn", "hiburan"),
    // kesehatan
    ("health", "kesehatan"),
    ("obat", "kesehatan"),
    ("dokter", "kesehatan"),
    ("apotek", "kesehatan"),
    ("medical", "kesehatan"),
    ("kesehatn", "kesehatan"),
    // pendidikan
    ("education", "pendidikan"),
    ("buku", "pendidikan"),
    ("kursus", "pendidikan"),
    ("sekolah", "pendidikan"),
    ("kuliah", "pendidikan"),
    ("pendidkan", "pendidikan"),
    // gaji
    ("salary", "gaji"),
    ("upah", "gaji"),
    ("bonus", "gaji"),
    ("thr", "gaji"),
    ("income", "gaji"),
    ("komisi", "gaji"),
    // transfer
    ("tf", "transfer"),
    ("trf", "transfer"),
    ("trasfer", "transfer"),
    // lainnya
    ("other", UNCATEGORIZED),
    ("others", UNCATEGORIZED),
    ("lain-lain", UNCATEGORIZED),
    ("lain", UNCATEGORIZED),
    ("misc", UNCATEGORIZED),
];

pub fn is_canonical(category: &str) -> bool {
    CATEGORIES.iter().any(|c| c.name == category)
}

/// Look up a synonym or known misspelling.
pub fn synonym(category: &str) -> Option<&'static str> {
    SYNONYMS
        .iter()
        .find(|(alias, _)| *alias == category)
        .map(|(_, canonical)| *canonical)
}
