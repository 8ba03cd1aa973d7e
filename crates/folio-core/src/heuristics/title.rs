//! Title selection from the first page that has text.
//!
//! With font sizes from the text layer, the largest line wins and adjacent
//! lines at that size are joined (titles often wrap). Without them, the
//! longest candidate line wins.

use once_cell::sync::Lazy;
use regex::Regex;

use super::config::ParserConfig;
use super::date::find_dates;
use super::volume::find_volume_issues;
use crate::model::{Confidence, Field, Page, PageText, Source};
use crate::text_utils::{collapse_whitespace, comparison_key, normalize_text};

/// Font sizes closer than this are the same size.
const FONT_EPSILON: f32 = 0.5;

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:https?://|www\.|\S+@\S+\.\w+)").unwrap());

struct TitleRules {
    masthead_keys: Vec<String>,
    reject: Vec<Regex>,
    min_chars: usize,
    max_chars: usize,
    scan_lines: usize,
}

impl TitleRules {
    fn new(config: &ParserConfig) -> Self {
        Self {
            masthead_keys: config
                .mastheads()
                .iter()
                .map(|m| comparison_key(m))
                .collect(),
            reject: config.title_reject_patterns(),
            min_chars: config.min_title_chars,
            max_chars: config.max_title_chars,
            scan_lines: config.title_scan_lines,
        }
    }

    /// Clean a raw line into a title candidate, or reject it.
    fn candidate(&self, line: &str) -> Option<String> {
        let text = normalize_text(line);
        if URL_RE.is_match(&text) {
            return None;
        }

        let cleaned = collapse_whitespace(strip_edge_metadata(&text));

        let len = cleaned.chars().count();
        if len < self.min_chars || len > self.max_chars {
            return None;
        }
        if self.reject.iter().any(|re| re.is_match(&cleaned)) {
            return None;
        }

        let visible = cleaned.chars().filter(|c| !c.is_whitespace()).count();
        let letters = cleaned.chars().filter(|c| c.is_alphabetic()).count();
        if letters * 10 < visible * 6 {
            return None;
        }

        if self.is_masthead(&cleaned) {
            return None;
        }
        Some(cleaned)
    }

    fn is_masthead(&self, text: &str) -> bool {
        let key = comparison_key(text);
        self.masthead_keys.iter().any(|m| *m == key)
    }
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | ';' | ':' | '-' | '–' | '—' | '|' | '•' | '·' | '/' | '.')
}

/// Peel dates and volume/issue text off both ends of a line. A match inside
/// the line is part of the title ("Plan for 2024-2030"), and so is a bare
/// year unless nothing else is left.
fn strip_edge_metadata(text: &str) -> &str {
    let spans: Vec<(usize, usize)> = find_dates(text)
        .into_iter()
        .filter(|d| d.specificity >= 2)
        .map(|d| (d.start, d.end))
        .chain(find_volume_issues(text).into_iter().map(|v| (v.start, v.end)))
        .collect();

    let mut lo = 0;
    let mut hi = text.len();
    loop {
        let rest = text[lo..hi].trim_start_matches(is_separator);
        lo = hi - rest.len();
        hi = lo + rest.trim_end_matches(is_separator).len();
        if let Some(&(_, end)) = spans.iter().find(|&&(start, end)| start == lo && end <= hi) {
            lo = end;
        } else if let Some(&(start, _)) = spans.iter().find(|&&(start, end)| end == hi && start >= lo) {
            hi = start;
        } else {
            break;
        }
    }
    &text[lo..hi]
}

/// Choose the title from the first page with text.
pub(crate) fn find_title(pages: &PageText, config: &ParserConfig) -> Field {
    let Some(page) = pages.pages().iter().find(|p| !p.is_blank()) else {
        return Field::empty();
    };
    let rules = TitleRules::new(config);

    let guess = if page.lines.is_empty() {
        by_length(page, &rules)
    } else {
        by_font_size(page, &rules).or_else(|| by_length(page, &rules))
    };

    let Some((title, unambiguous)) = guess else {
        return Field::empty();
    };

    let confidence = if unambiguous && page.index == 0 && !page.from_ocr() {
        Confidence::High
    } else {
        Confidence::Low
    };
    tracing::debug!(title = %title, confidence = confidence.as_str(), page = page.index, "title selected");
    Field::found(title, confidence, Source::heuristic(page.from_ocr()))
}

/// Longest candidate among the first lines. Unambiguous only when it is the
/// sole candidate.
fn by_length(page: &Page, rules: &TitleRules) -> Option<(String, bool)> {
    let candidates: Vec<String> = page
        .text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(rules.scan_lines)
        .filter_map(|l| rules.candidate(l))
        .collect();

    let mut best: Option<&String> = None;
    for c in &candidates {
        if best.is_none_or(|b| c.chars().count() > b.chars().count()) {
            best = Some(c);
        }
    }
    best.map(|b| (b.clone(), candidates.len() == 1))
}

/// Largest-font candidate, with adjacent lines of the same size joined.
/// Unambiguous only when no other line on the page shares that size.
fn by_font_size(page: &Page, rules: &TitleRules) -> Option<(String, bool)> {
    let lines: Vec<_> = page
        .lines
        .iter()
        .filter(|l| !l.text.trim().is_empty())
        .take(rules.scan_lines)
        .collect();

    let candidates: Vec<(usize, String, f32)> = lines
        .iter()
        .enumerate()
        .filter_map(|(i, l)| rules.candidate(&l.text).map(|c| (i, c, l.font_size)))
        .collect();

    if candidates.is_empty() {
        return None;
    }
    let largest = candidates
        .iter()
        .map(|(_, _, size)| *size)
        .fold(f32::MIN, f32::max);
    let same_size = |size: f32| (size - largest).abs() < FONT_EPSILON;

    // First run of consecutive lines at the largest size.
    let mut run: Vec<&(usize, String, f32)> = Vec::new();
    for candidate in candidates.iter().filter(|(_, _, size)| same_size(*size)) {
        match run.last() {
            Some((prev, _, _)) if candidate.0 != prev + 1 => break,
            _ => run.push(candidate),
        }
    }

    let mut title = String::new();
    for (_, text, _) in &run {
        let joined_len = title.chars().count() + 1 + text.chars().count();
        if !title.is_empty() && joined_len > rules.max_chars {
            break;
        }
        if !title.is_empty() {
            title.push(' ');
        }
        title.push_str(text);
    }

    let run_lines = run.len();
    let lines_at_size = page
        .lines
        .iter()
        .filter(|l| !l.text.trim().is_empty() && same_size(l.font_size))
        .count();
    Some((title, lines_at_size == run_lines))
}
