//! Bibliographic-noise filter.
//!
//! Reference sections, citation markers, DOIs, and bare URLs add nothing to
//! retrieval and pollute embeddings. Segments matching any pattern are
//! flagged, logged for audit, and excluded from embedding and storage. A
//! segment whose body ends in a bracketed citation counts as reference in
//! full — the filter works at segment granularity, not sentence granularity.

use regex::Regex;
use std::sync::LazyLock;

static BRACKET_CITATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\d+\]").expect("bracket citation regex is valid"));

static REFERENCE_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(References\b|参考文献)").expect("reference heading regex is valid")
});

static DOI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bdoi:\s*\S+").expect("doi regex is valid"));

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("url regex is valid"));

/// True when the segment is bibliographic rather than content. Pure and
/// idempotent: re-running the filter never changes the verdict.
pub fn is_reference(text: &str) -> bool {
    BRACKET_CITATION_RE.is_match(text)
        || REFERENCE_HEADING_RE.is_match(text)
        || DOI_RE.is_match(text)
        || URL_RE.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bracketed_citation_marks_reference() {
        assert!(is_reference("高血压患者应注意低盐饮食 [3]"));
        assert!(is_reference("as shown in prior work [12], the effect holds"));
    }

    #[test]
    fn reference_heading_marks_reference() {
        assert!(is_reference("参考文献: 王等(2020)"));
        assert!(is_reference("  References\nSmith J. et al."));
        // "References" must start the segment, not merely appear inside it
        assert!(!is_reference("the guideline references several cohort studies"));
    }

    #[test]
    fn doi_and_url_mark_reference() {
        assert!(is_reference("doi:10.1001/jama.2020.1585"));
        assert!(is_reference("DOI: 10.1056/NEJMoa2034577"));
        assert!(is_reference("见 https://www.who.int/zh/news-room 上的说明"));
    }

    #[test]
    fn plain_content_passes() {
        assert!(!is_reference("高血压患者应注意低盐饮食，每日食盐摄入不超过5克。"));
        assert!(!is_reference("A balanced diet includes vegetables and whole grains."));
    }

    #[test]
    fn filter_is_idempotent() {
        for text in ["参考文献: 王等(2020)", "每日步行三十分钟有益心血管健康"] {
            let first = is_reference(text);
            let second = is_reference(text);
            assert_eq!(first, second);
        }
    }
}
