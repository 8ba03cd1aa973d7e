//! Record types shared by every pipeline stage.
//!
//! Each extracted field is a [`Field`]: a nullable value tagged with a
//! [`Confidence`] and a [`Source`]. The constructors keep the pairing
//! consistent, so a `high` field always has a value and a `none` field never
//! does.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{PipelineError, Warning};
use crate::text_utils::truncate_chars;

/// Trust level of an extracted field.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    #[default]
    None,
    Low,
    High,
}

impl Confidence {
    /// Fields below `high` are eligible for the LLM fallback.
    pub fn needs_fallback(self) -> bool {
        self != Confidence::High
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::None => "none",
            Confidence::Low => "low",
            Confidence::High => "high",
        }
    }
}

/// Technique (or combination) that produced a field's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "heuristic")]
    Heuristic,
    #[serde(rename = "llm")]
    Llm,
    #[serde(rename = "ocr+heuristic")]
    OcrHeuristic,
    #[serde(rename = "ocr+llm")]
    OcrLlm,
}

impl Source {
    pub fn heuristic(from_ocr: bool) -> Self {
        if from_ocr {
            Source::OcrHeuristic
        } else {
            Source::Heuristic
        }
    }

    pub fn llm(from_ocr: bool) -> Self {
        if from_ocr { Source::OcrLlm } else { Source::Llm }
    }

    pub fn is_ocr_derived(self) -> bool {
        matches!(self, Source::OcrHeuristic | Source::OcrLlm)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Source::Heuristic => "heuristic",
            Source::Llm => "llm",
            Source::OcrHeuristic => "ocr+heuristic",
            Source::OcrLlm => "ocr+llm",
        }
    }
}

/// A single extracted value with its confidence and provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawField")]
pub struct Field {
    value: Option<String>,
    confidence: Confidence,
    source: Option<Source>,
}

/// Wire shape of a [`Field`]; converted through the checked constructors.
#[derive(Deserialize)]
struct RawField {
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    confidence: Confidence,
    #[serde(default)]
    source: Option<Source>,
}

impl From<RawField> for Field {
    fn from(raw: RawField) -> Self {
        match (raw.value, raw.source) {
            (Some(value), Some(source)) => Field::found(value, raw.confidence, source),
            _ => Field::empty(),
        }
    }
}

impl Default for Field {
    fn default() -> Self {
        Self::empty()
    }
}

impl Field {
    /// The explicit "nothing extracted" field: null value, `none` confidence.
    pub fn empty() -> Self {
        Self {
            value: None,
            confidence: Confidence::None,
            source: None,
        }
    }

    /// A populated field. A blank value collapses to [`Field::empty`], and a
    /// value is never stored at `none` confidence (it is raised to `low`).
    pub fn found(value: impl Into<String>, confidence: Confidence, source: Source) -> Self {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Self::empty();
        }
        let confidence = match confidence {
            Confidence::None => Confidence::Low,
            other => other,
        };
        Self {
            value: Some(trimmed.to_string()),
            confidence,
            source: Some(source),
        }
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn confidence(&self) -> Confidence {
        self.confidence
    }

    pub fn source(&self) -> Option<Source> {
        self.source
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    /// Raise a populated field to `high` after an independent signal agreed
    /// with it. Empty fields are returned unchanged.
    pub fn corroborated(mut self) -> Self {
        if self.value.is_some() {
            self.confidence = Confidence::High;
        }
        self
    }
}

/// The fields the heuristic and fallback stages work on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldName {
    Title,
    Date,
    VolumeIssue,
}

impl FieldName {
    pub const ALL: [FieldName; 3] = [FieldName::Title, FieldName::Date, FieldName::VolumeIssue];

    /// JSON key used in records and in LLM prompts.
    pub fn key(self) -> &'static str {
        match self {
            FieldName::Title => "title",
            FieldName::Date => "date",
            FieldName::VolumeIssue => "volume_issue",
        }
    }
}

/// Title, date and volume/issue as produced by the heuristic parser and
/// refined by the LLM fallback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialResult {
    pub title: Field,
    pub date: Field,
    pub volume_issue: Field,
}

impl PartialResult {
    pub fn get(&self, name: FieldName) -> &Field {
        match name {
            FieldName::Title => &self.title,
            FieldName::Date => &self.date,
            FieldName::VolumeIssue => &self.volume_issue,
        }
    }

    pub fn set(&mut self, name: FieldName, field: Field) {
        match name {
            FieldName::Title => self.title = field,
            FieldName::Date => self.date = field,
            FieldName::VolumeIssue => self.volume_issue = field,
        }
    }

    /// Fields whose confidence is below `high`, in declaration order.
    pub fn pending_fields(&self) -> Vec<FieldName> {
        FieldName::ALL
            .into_iter()
            .filter(|name| self.get(*name).confidence().needs_fallback())
            .collect()
    }
}

/// The complete per-document output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub title: Field,
    pub date: Field,
    pub volume_issue: Field,
    pub description: Field,
}

impl ExtractionResult {
    pub fn from_parts(partial: PartialResult, description: Field) -> Self {
        Self {
            title: partial.title,
            date: partial.date,
            volume_issue: partial.volume_issue,
            description,
        }
    }

    pub fn fields(&self) -> [(&'static str, &Field); 4] {
        [
            ("title", &self.title),
            ("date", &self.date),
            ("volume_issue", &self.volume_issue),
            ("description", &self.description),
        ]
    }
}

/// Where a page's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Embedded,
    Ocr,
}

/// A line of embedded text with its rendered font size.
#[derive(Debug, Clone, PartialEq)]
pub struct StyledLine {
    pub text: String,
    pub font_size: f32,
}

/// Text of one page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// 0-based page index within the document.
    pub index: usize,
    pub text: String,
    pub provenance: Provenance,
    /// Set when OCR was required for this page and did not produce text.
    pub ocr_failed: bool,
    /// Structural hints from the text layer; empty for OCR pages.
    pub lines: Vec<StyledLine>,
}

impl Page {
    pub fn embedded(index: usize, text: impl Into<String>, lines: Vec<StyledLine>) -> Self {
        Self {
            index,
            text: text.into(),
            provenance: Provenance::Embedded,
            ocr_failed: false,
            lines,
        }
    }

    pub fn ocr(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
            provenance: Provenance::Ocr,
            ocr_failed: false,
            lines: Vec::new(),
        }
    }

    /// An OCR page that produced nothing.
    pub fn ocr_failed(index: usize) -> Self {
        Self {
            ocr_failed: true,
            ..Self::ocr(index, String::new())
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn from_ocr(&self) -> bool {
        self.provenance == Provenance::Ocr
    }
}

/// Capped text handed to the LLM stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContext {
    pub text: String,
    /// True when any non-blank page that contributed text came from OCR.
    pub from_ocr: bool,
}

/// Per-page text for the first pages of a document, in page order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageText {
    pages: Vec<Page>,
}

impl PageText {
    pub fn new(pages: Vec<Page>) -> Self {
        Self { pages }
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// No page produced any text: the document is wholly unextractable.
    pub fn is_blank(&self) -> bool {
        self.pages.iter().all(Page::is_blank)
    }

    /// Text of at most `max_pages` pages, joined by blank lines and cut to
    /// `max_chars` characters.
    pub fn context(&self, max_pages: usize, max_chars: usize) -> PromptContext {
        let mut text = String::new();
        let mut from_ocr = false;
        for page in self.pages.iter().take(max_pages) {
            if page.is_blank() {
                continue;
            }
            if text.chars().count() >= max_chars {
                break;
            }
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(page.text.trim());
            from_ocr |= page.from_ocr();
        }
        let text = truncate_chars(&text, max_chars).to_string();
        PromptContext { text, from_ocr }
    }
}

/// One input PDF, identified by the hash of its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub path: PathBuf,
    pub fingerprint: String,
    pub page_count: usize,
}

/// SHA-256 of the file contents, hex encoded.
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// One line of batch output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub path: PathBuf,
    pub fingerprint: Option<String>,
    pub page_count: Option<usize>,
    #[serde(flatten)]
    pub result: ExtractionResult,
    #[serde(default)]
    pub cached: bool,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    /// Machine-readable failure reason; `None` on success.
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl DocumentRecord {
    pub fn completed(
        document: &Document,
        result: ExtractionResult,
        cached: bool,
        warnings: Vec<Warning>,
    ) -> Self {
        Self {
            path: document.path.clone(),
            fingerprint: Some(document.fingerprint.clone()),
            page_count: Some(document.page_count),
            result,
            cached,
            warnings,
            error: None,
            error_detail: None,
        }
    }

    pub fn failed(
        path: &Path,
        fingerprint: Option<String>,
        error: &PipelineError,
        warnings: Vec<Warning>,
    ) -> Self {
        Self {
            path: path.to_path_buf(),
            fingerprint,
            page_count: None,
            result: ExtractionResult::default(),
            cached: false,
            warnings,
            error: Some(error.reason().to_string()),
            error_detail: Some(error.to_string()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_value_collapses_to_empty() {
        let field = Field::found("   ", Confidence::High, Source::Heuristic);
        assert!(field.is_empty());
        assert_eq!(field.confidence(), Confidence::None);
        assert_eq!(field.source(), None);
    }

    #[test]
    fn value_never_carries_none_confidence() {
        let field = Field::found("Annual Report", Confidence::None, Source::Llm);
        assert_eq!(field.value(), Some("Annual Report"));
        assert_eq!(field.confidence(), Confidence::Low);
    }

    #[test]
    fn corroborated_empty_field_stays_none() {
        let field = Field::empty().corroborated();
        assert_eq!(field.confidence(), Confidence::None);
    }

    #[test]
    fn field_serializes_as_tagged_object() {
        let field = Field::found("2023-03-15", Confidence::High, Source::OcrHeuristic);
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(json["value"], "2023-03-15");
        assert_eq!(json["confidence"], "high");
        assert_eq!(json["source"], "ocr+heuristic");

        let empty = serde_json::to_value(Field::empty()).unwrap();
        assert!(empty["value"].is_null());
        assert_eq!(empty["confidence"], "none");
        assert!(empty["source"].is_null());
    }

    #[test]
    fn inconsistent_wire_field_is_repaired() {
        let field: Field =
            serde_json::from_str(r#"{"value":"x","confidence":"high","source":null}"#).unwrap();
        assert!(field.is_empty());
        let field: Field =
            serde_json::from_str(r#"{"value":"","confidence":"high","source":"llm"}"#).unwrap();
        assert!(field.is_empty());
    }

    #[test]
    fn pending_fields_skip_high() {
        let partial = PartialResult {
            title: Field::found("A Title", Confidence::Low, Source::Heuristic),
            date: Field::found("2023", Confidence::High, Source::Heuristic),
            volume_issue: Field::empty(),
        };
        assert_eq!(
            partial.pending_fields(),
            vec![FieldName::Title, FieldName::VolumeIssue]
        );
    }

    #[test]
    fn context_respects_page_and_char_caps() {
        let pages = PageText::new(vec![
            Page::embedded(0, "a".repeat(10), vec![]),
            Page::ocr_failed(1),
            Page::ocr(2, "b".repeat(10)),
            Page::embedded(3, "c".repeat(10), vec![]),
        ]);
        let ctx = pages.context(3, 15);
        assert_eq!(ctx.text.chars().count(), 15);
        assert!(ctx.text.starts_with("aaaaaaaaaa\n\nbbb"));
        assert!(ctx.from_ocr);

        let ctx = pages.context(1, 3000);
        assert_eq!(ctx.text, "a".repeat(10));
        assert!(!ctx.from_ocr);
    }

    #[test]
    fn blank_page_text() {
        let pages = PageText::new(vec![Page::ocr_failed(0), Page::embedded(1, " \n", vec![])]);
        assert!(pages.is_blank());
        assert!(PageText::default().is_blank());
    }

    #[test]
    fn fingerprint_depends_only_on_bytes() {
        assert_eq!(fingerprint(b"same"), fingerprint(b"same"));
        assert_ne!(fingerprint(b"same"), fingerprint(b"other"));
        assert_eq!(fingerprint(b"").len(), 64);
    }

    #[test]
    fn failed_record_has_reason_and_null_fields() {
        let record = DocumentRecord::failed(
            Path::new("/tmp/broken.pdf"),
            Some("abc".into()),
            &PipelineError::UnreadableDocument("not a PDF".into()),
            vec![],
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["error"], "unreadable_document");
        assert_eq!(json["fingerprint"], "abc");
        assert!(json["title"]["value"].is_null());
        assert_eq!(json["description"]["confidence"], "none");
    }
}
