//! Unicode-range language detection.

use crate::types::Language;

/// How many leading characters are sampled. Long documents settle well
/// before this.
const SAMPLE_CHARS: usize = 2000;

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'      // CJK Unified Ideographs
        | '\u{3400}'..='\u{4DBF}'    // Extension A
        | '\u{F900}'..='\u{FAFF}'    // Compatibility Ideographs
    )
}

fn is_latin_letter(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c, '\u{00C0}'..='\u{024F}')
}

/// Classify a text sample by the fraction of CJK vs Latin code points.
///
/// Chinese wins when CJK outweighs Latin and covers more than 10% of the
/// sample; English wins when Latin covers more than 30%. Anything else gets
/// `ambiguous_default` — a tunable, not a rule about the languages.
pub fn detect_language(text: &str, ambiguous_default: Language) -> Language {
    let mut total = 0usize;
    let mut cjk = 0usize;
    let mut latin = 0usize;

    for c in text.chars().take(SAMPLE_CHARS) {
        if c.is_whitespace() {
            continue;
        }
        total += 1;
        if is_cjk(c) {
            cjk += 1;
        } else if is_latin_letter(c) {
            latin += 1;
        }
    }

    if total == 0 {
        return ambiguous_default;
    }

    let cjk_ratio = cjk as f32 / total as f32;
    let latin_ratio = latin as f32 / total as f32;

    if cjk_ratio > latin_ratio && cjk_ratio > 0.1 {
        Language::Chinese
    } else if latin_ratio > 0.3 {
        Language::English
    } else {
        ambiguous_default
    }
}
