use crate::processing::reference_filter::is_reference;
use crate::types::Segment;

/// Splits parsed text into passages on structural boundaries.
///
/// Paragraphs (blank-line separated, as emitted by the parsing service) are
/// packed into segments close to the target length; oversized paragraphs are
/// broken at sentence boundaries. All length accounting is in characters,
/// not bytes — CJK text is three bytes per character and byte budgets would
/// cut segments to a third of the intended size.
pub struct SegmentChunker {
    target_chars: usize,
    min_chars: usize,
}

impl SegmentChunker {
    pub fn new(target_chars: usize, min_chars: usize) -> Self {
        Self { target_chars, min_chars }
    }

    /// Split `text` into ordered segments attributed to `source`. Each
    /// segment is run through the reference filter as it is created.
    pub fn split(&self, source: &str, text: &str) -> Vec<Segment> {
        let mut pieces: Vec<String> = Vec::new();
        let mut current = String::new();

        for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            // bibliographic lines stay standalone so they never drag a
            // content segment down with them
            if is_reference(paragraph) {
                if !current.is_empty() {
                    pieces.push(std::mem::take(&mut current));
                }
                pieces.push(paragraph.to_string());
                continue;
            }
            for block in self.split_oversized(paragraph) {
                let current_len = current.chars().count();
                if current_len > 0 && current_len + block.chars().count() > self.target_chars {
                    pieces.push(std::mem::take(&mut current));
                }
                if !current.is_empty() {
                    current.push('\n');
                }
                current.push_str(&block);
            }
        }
        if !current.is_empty() {
            pieces.push(current);
        }

        // tiny fragments are noise, but short reference lines are kept so
        // the filtered set stays auditable
        pieces.retain(|p| p.chars().count() >= self.min_chars || is_reference(p));

        pieces
            .into_iter()
            .enumerate()
            .map(|(index, body)| {
                let mut segment = Segment::new(source, index, body);
                segment.is_reference = is_reference(&segment.text);
                segment
            })
            .collect()
    }

    /// Break a paragraph longer than the target at sentence boundaries.
    fn split_oversized(&self, paragraph: &str) -> Vec<String> {
        if paragraph.chars().count() <= self.target_chars {
            return vec![paragraph.to_string()];
        }

        let mut out = Vec::new();
        let mut current = String::new();
        for sentence in split_sentences(paragraph) {
            let sentence_len = sentence.chars().count();
            if !current.is_empty()
                && current.chars().count() + sentence_len > self.target_chars
            {
                out.push(std::mem::take(&mut current));
            }
            if sentence_len > self.target_chars * 2 {
                // Unbroken run with no sentence punctuation — hard split so
                // no segment blows past the embedding input limit.
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
                out.extend(hard_split(sentence, self.target_chars));
            } else {
                current.push_str(sentence);
            }
        }
        if !current.is_empty() {
            out.push(current);
        }
        out
    }
}

/// Split on sentence-ending punctuation (CJK and Latin), keeping the
/// terminator with its sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for (idx, c) in text.char_indices() {
        if matches!(c, '。' | '！' | '？' | '.' | '!' | '?' | ';' | '；' | '\n') {
            let end = idx + c.len_utf8();
            if end > start {
                out.push(&text[start..end]);
            }
            start = end;
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

fn hard_split(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|c| c.iter().collect::<String>())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> SegmentChunker {
        SegmentChunker::new(400, 10)
    }

    #[test]
    fn short_text_is_one_segment() {
        let segments = chunker().split("/docs/diet.txt", "低盐饮食有助于控制血压，建议每日食盐摄入不超过五克。");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].index, 0);
        assert!(!segments[0].is_reference);
    }

    #[test]
    fn paragraphs_pack_up_to_target() {
        let para = "规律运动对心血管健康十分重要。".repeat(10);
        let text = format!("{}\n\n{}\n\n{}", para, para, para);
        let segments = chunker().split("/docs/exercise.txt", &text);
        assert!(segments.len() >= 2);
        for (i, s) in segments.iter().enumerate() {
            assert_eq!(s.index, i);
            assert!(s.text.chars().count() <= 800);
        }
    }

    #[test]
    fn oversized_paragraph_breaks_at_sentences() {
        let text = "患者应保持均衡饮食。".repeat(100);
        let segments = chunker().split("/docs/long.txt", &text);
        assert!(segments.len() > 1);
        for s in &segments {
            assert!(s.text.chars().count() <= 400);
        }
    }

    #[test]
    fn tiny_fragments_are_dropped() {
        let segments = chunker().split("/docs/frag.txt", "短。\n\n这一段足够长可以作为独立的检索片段保留下来。");
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn reference_segments_are_flagged() {
        // Both halves of the worked example: the first because of the
        // bracketed citation, the second because of the heading prefix.
        let text = "高血压患者应注意低盐饮食 [3]\n\n参考文献: 王等(2020)年度综述内容";
        let segments = SegmentChunker::new(400, 5).split("/docs/cited.txt", &text);
        assert_eq!(segments.len(), 2);
        assert!(segments[0].is_reference);
        assert!(segments[1].is_reference);
    }

    #[test]
    fn reference_line_never_merges_into_content() {
        // even though all three paragraphs would fit one target-sized
        // segment, the citation line stays isolated
        let text = "低盐饮食有助于控制血压，这是长期随访研究的一致结论。\n\n\
                    参考文献: 王等(2020)\n\n\
                    规律运动同样能够显著改善心血管健康水平。";
        let segments = chunker().split("/docs/mixed.txt", &text);
        assert_eq!(segments.len(), 3);
        assert!(!segments[0].is_reference);
        assert!(segments[1].is_reference);
        assert!(!segments[2].is_reference);
    }
}
