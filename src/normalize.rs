use unicode_normalization::UnicodeNormalization;

/// Canonically decomposes `raw`, drops combining diacritical marks and trims
/// surrounding whitespace.
///
/// Titles and queries both go through this function so that the keys stored
/// in the index and the strings compared against them always agree. Case is
/// left untouched; the fuzzy index lowercases internally.
pub fn normalize_title(raw: &str) -> String {
    let stripped: String = raw.nfd().filter(|c| !is_combining_mark(*c)).collect();
    stripped.trim().to_string()
}

/// Number of characters in an already normalized string.
pub fn char_len(normalized: &str) -> usize {
    normalized.chars().count()
}

fn is_combining_mark(c: char) -> bool {
    ('\u{0300}'..='\u{036F}').contains(&c)
}
