//! Rule-based recovery of title, date and volume/issue.
//!
//! Every field is resolved from candidates gathered across the extracted
//! pages. The most specific candidate wins (earliest page, then earliest
//! offset, breaks ties). A field is `high` only when the winner sits on the
//! document's first page, came from the embedded text layer, and no other
//! candidate contradicts it. A candidate that is a coarser form of the winner
//! (`2023` next to `2023-03-15`, `Vol. 4` next to `Vol. 4, No. 2`) does not
//! contradict it.

pub mod config;
pub mod date;
pub mod title;
pub mod volume;

pub use config::{ListOverride, ParserConfig, ParserConfigBuilder};
pub use date::normalize_date_str;

use crate::model::{Confidence, Field, PageText, PartialResult, Source};
use crate::text_utils::normalize_text;

/// A value found by a pattern rule, with where it was found.
#[derive(Debug, Clone)]
struct Candidate {
    value: String,
    /// Comparison form; coarser values are `-`-separated prefixes of finer ones.
    key: String,
    specificity: u8,
    page: usize,
    offset: usize,
    from_ocr: bool,
}

fn compatible(a: &str, b: &str) -> bool {
    let refines = |fine: &str, coarse: &str| {
        fine.len() > coarse.len()
            && fine.starts_with(coarse)
            && fine.as_bytes()[coarse.len()] == b'-'
    };
    a == b || refines(a, b) || refines(b, a)
}

fn resolve(field: &str, mut candidates: Vec<Candidate>) -> Field {
    candidates.sort_by(|a, b| {
        b.specificity
            .cmp(&a.specificity)
            .then(a.page.cmp(&b.page))
            .then(a.offset.cmp(&b.offset))
    });
    let Some(winner) = candidates.first() else {
        return Field::empty();
    };

    let conflicts = candidates
        .iter()
        .filter(|c| !compatible(&c.key, &winner.key))
        .count();
    let confidence = if conflicts == 0 && winner.page == 0 && !winner.from_ocr {
        Confidence::High
    } else {
        Confidence::Low
    };
    tracing::debug!(
        field,
        value = %winner.value,
        candidates = candidates.len(),
        conflicts,
        confidence = confidence.as_str(),
        "field resolved"
    );
    Field::found(
        winner.value.clone(),
        confidence,
        Source::heuristic(winner.from_ocr),
    )
}

/// Pattern-based parser for the bibliographic fields.
///
/// Never fails: a field with no matching rule comes back empty with `none`
/// confidence.
#[derive(Debug, Clone, Default)]
pub struct HeuristicParser {
    config: ParserConfig,
}

impl HeuristicParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn parse(&self, pages: &PageText) -> PartialResult {
        let mut dates = Vec::new();
        let mut volumes = Vec::new();

        for page in pages.pages().iter().filter(|p| !p.is_blank()) {
            let text = normalize_text(&page.text);
            let from_ocr = page.from_ocr();
            dates.extend(date::find_dates(&text).into_iter().map(|d| Candidate {
                key: d.value.clone(),
                value: d.value,
                specificity: d.specificity,
                page: page.index,
                offset: d.start,
                from_ocr,
            }));
            volumes.extend(
                volume::find_volume_issues(&text)
                    .into_iter()
                    .map(|v| Candidate {
                        value: v.value,
                        key: v.key,
                        specificity: v.specificity,
                        page: page.index,
                        offset: v.start,
                        from_ocr,
                    }),
            );
        }

        PartialResult {
            title: title::find_title(pages, &self.config),
            date: resolve("date", dates),
            volume_issue: resolve("volume_issue", volumes),
        }
    }
}
