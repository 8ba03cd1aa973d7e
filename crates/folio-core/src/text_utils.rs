use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// NFKC-normalize text so ligatures, full-width digits and compatibility
/// characters match the ASCII patterns.
pub fn normalize_text(text: &str) -> String {
    text.nfkc().collect()
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
    WS_RE.replace_all(text.trim(), " ").into_owned()
}

/// Number of non-whitespace characters.
pub fn non_whitespace_len(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

/// First `max_chars` characters of `text` (UTF-8 safe).
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Comparison key: lowercase, whitespace collapsed, surrounding punctuation
/// removed.
pub fn comparison_key(text: &str) -> String {
    collapse_whitespace(&normalize_text(text))
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nfkc_folds_ligatures_and_fullwidth() {
        assert_eq!(normalize_text("ﬁnance ２０２３"), "finance 2023");
    }

    #[test]
    fn collapse() {
        assert_eq!(collapse_whitespace("  Vol.\n 4,\tNo. 2 "), "Vol. 4, No. 2");
    }

    #[test]
    fn non_whitespace_count() {
        assert_eq!(non_whitespace_len(" a b\n\tc "), 3);
        assert_eq!(non_whitespace_len(""), 0);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("añoño", 3), "año");
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn comparison_key_ignores_case_and_punctuation() {
        assert_eq!(comparison_key(" The  Annual Report. "), "the annual report");
        assert_eq!(comparison_key("Vol. 4, No. 2"), "vol. 4, no. 2");
    }
}
