//! Source classification and response cleanup.
//! The native script is CJK Unified Ideographs (U+4E00..=U+9FFF): any text
//! containing one of those codepoints is treated as already readable.

use std::sync::OnceLock;

use regex::Regex;

fn native_script() -> &'static Regex {
    static NATIVE: OnceLock<Regex> = OnceLock::new();
    NATIVE.get_or_init(|| Regex::new(r"[\x{4E00}-\x{9FFF}]").expect("valid native-script pattern"))
}

/// False iff `text` contains at least one native-script codepoint.
/// Empty input is the caller's concern and returns true.
pub fn needs_translation(text: &str) -> bool {
    !native_script().is_match(text)
}

/// Trim the model output and remove the first matching label prefix, if any.
/// Only one prefix is removed.
pub fn strip_label_prefix<S: AsRef<str>>(raw: &str, prefixes: &[S]) -> String {
    let trimmed = raw.trim();
    for prefix in prefixes {
        if let Some(rest) = trimmed.strip_prefix(prefix.as_ref()) {
            return rest.trim().to_string();
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_STRIP_PREFIXES;

    #[test]
    fn native_only_text_is_skipped() {
        assert!(!needs_translation("世界你好"));
    }

    #[test]
    fn latin_and_mixed_text() {
        assert!(needs_translation("hello"));
        // Any native codepoint means the text is already readable.
        assert!(!needs_translation("hello世界"));
    }

    #[test]
    fn range_bounds_are_inclusive() {
        assert!(!needs_translation("\u{4E00}"));
        assert!(!needs_translation("\u{9FFF}"));
        assert!(needs_translation("\u{4DFF}"));
        assert!(needs_translation("\u{A000}"));
        // Hiragana is outside the range.
        assert!(needs_translation("こんにちは"));
    }

    #[test]
    fn strips_first_matching_prefix_only() {
        assert_eq!(strip_label_prefix("  译文: 早上好 ", DEFAULT_STRIP_PREFIXES), "早上好");
        assert_eq!(
            strip_label_prefix("Here is the translation: 译文: 早上好", DEFAULT_STRIP_PREFIXES),
            "译文: 早上好"
        );
    }

    #[test]
    fn leaves_unlabelled_output_alone() {
        assert_eq!(strip_label_prefix("\n早上好\n", DEFAULT_STRIP_PREFIXES), "早上好");
        let none: [&str; 0] = [];
        assert_eq!(strip_label_prefix("译文: x", &none), "译文: x");
    }
}
