//! Response post-processing
//!
//! Language mirroring and the text-side half of auto-continuation: deciding
//! whether an answer looks truncated and merging continuation chunks without
//! duplicating the seam.

use crate::prompt::{Lang, contains_arabic};

/// Maximum overlap (in characters) deduplicated at a continuation seam
pub const OVERLAP_WINDOW: usize = 200;

/// Prefix a notice when the produced text does not match the target language
///
/// This is a cautionary patch, not a re-generation: the original text is
/// preserved verbatim after the notice.
pub fn mirror_language(lang: Lang, text: String) -> String {
    if text.trim().is_empty() {
        return text;
    }
    let mismatch = match lang {
        Lang::Ar => !contains_arabic(&text),
        Lang::En => contains_arabic(&text),
    };
    if !mismatch {
        return text;
    }

    let notice = match lang {
        Lang::Ar => "ملاحظة: وردت الإجابة أدناه بلغة مختلفة عن لغة سؤالك.",
        Lang::En => "Note: the answer below came back in a different language than your question.",
    };
    format!("{notice}\n\n{text}")
}

/// Heuristic: does this answer look cut off mid-thought?
pub fn looks_truncated(text: &str) -> bool {
    let trimmed = text.trim_end();
    if trimmed.is_empty() {
        return false;
    }

    if trimmed.ends_with("...") || trimmed.ends_with('…') {
        return true;
    }

    // Dangling hyphen, as in a word split at a line break
    if trimmed.ends_with('-') && !trimmed.ends_with("--") {
        return true;
    }

    let lower = trimmed.to_lowercase();
    lower.ends_with("to be continued")
        || lower.ends_with("(continued)")
        || trimmed.ends_with("يتبع")
        || trimmed.ends_with("(يتبع)")
}

/// Instruction sent as the continuation user turn
pub fn continuation_instruction(lang: Lang) -> &'static str {
    match lang {
        Lang::Ar => "أكمل من حيث توقفت الإجابة السابقة تمامًا، دون تكرار أي شيء سبق كتابته.",
        Lang::En => {
            "Continue exactly where the previous answer stopped. Do not repeat anything already written."
        }
    }
}

/// Concatenate a continuation chunk onto the accumulated answer
///
/// If the head of `next` repeats the tail of `prev` (up to
/// [`OVERLAP_WINDOW`] characters), the repeated prefix is dropped so the
/// seam contains no duplicated text.
pub fn merge_continuation(prev: &str, next: &str) -> String {
    let tail: String = {
        let chars: Vec<char> = prev.chars().collect();
        let start = chars.len().saturating_sub(OVERLAP_WINDOW);
        chars[start..].iter().collect()
    };
    let head: Vec<char> = next.chars().take(OVERLAP_WINDOW).collect();

    for overlap in (1..=head.len()).rev() {
        let prefix: String = head[..overlap].iter().collect();
        if tail.ends_with(&prefix) {
            let drop_bytes: usize = head[..overlap].iter().map(|c| c.len_utf8()).sum();
            return format!("{}{}", prev, &next[drop_bytes..]);
        }
    }

    format!("{prev}{next}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arabic_target_without_arabic_gets_notice() {
        let out = mirror_language(Lang::Ar, "This is English.".to_string());
        assert!(contains_arabic(&out));
        assert!(out.ends_with("This is English."));
    }

    #[test]
    fn arabic_target_with_arabic_untouched() {
        let text = "هذه إجابة عربية.".to_string();
        assert_eq!(mirror_language(Lang::Ar, text.clone()), text);
    }

    #[test]
    fn english_target_with_arabic_gets_notice() {
        let out = mirror_language(Lang::En, "إجابة بالعربية".to_string());
        assert!(out.starts_with("Note:"));
        assert!(out.ends_with("إجابة بالعربية"));
    }

    #[test]
    fn english_target_with_english_untouched() {
        let text = "Plain English answer.".to_string();
        assert_eq!(mirror_language(Lang::En, text.clone()), text);
    }

    #[test]
    fn empty_text_never_prefixed() {
        assert_eq!(mirror_language(Lang::Ar, "  ".to_string()), "  ");
    }

    #[test]
    fn truncation_markers_detected() {
        assert!(looks_truncated("and then..."));
        assert!(looks_truncated("and then…"));
        assert!(looks_truncated("inter-"));
        assert!(looks_truncated("The story so far. To be continued"));
        assert!(looks_truncated("الجزء الأول يتبع"));
        assert!(looks_truncated("trailing whitespace...   "));
    }

    #[test]
    fn complete_answers_not_flagged() {
        assert!(!looks_truncated("A complete sentence."));
        assert!(!looks_truncated("A horizontal rule --"));
        assert!(!looks_truncated(""));
        assert!(!looks_truncated("   "));
    }

    #[test]
    fn merge_drops_duplicated_seam() {
        let prev = "The quick brown fox jumps over";
        let next = "jumps over the lazy dog";
        assert_eq!(
            merge_continuation(prev, next),
            "The quick brown fox jumps over the lazy dog"
        );
    }

    #[test]
    fn merge_without_overlap_concatenates() {
        assert_eq!(merge_continuation("first half ", "second half"), "first half second half");
    }

    #[test]
    fn merge_prefers_longest_overlap() {
        let prev = "aaa bbb aaa";
        let next = "bbb aaa ccc";
        // "bbb aaa" (7 chars) must win over the shorter "aaa" suffix match
        assert_eq!(merge_continuation(prev, next), "aaa bbb aaa ccc");
    }

    #[test]
    fn merge_handles_multibyte_overlap() {
        let prev = "النص الأول يتبع";
        let next = "يتبع النص الثاني";
        assert_eq!(merge_continuation(prev, next), "النص الأول يتبع النص الثاني");
    }

    #[test]
    fn merge_overlap_bounded_by_window() {
        let repeated = "r".repeat(OVERLAP_WINDOW + 100);
        let merged = merge_continuation(&repeated, &repeated);
        // Only up to OVERLAP_WINDOW chars of the head may be dropped
        assert_eq!(merged.len(), repeated.len() * 2 - OVERLAP_WINDOW);
    }
}
