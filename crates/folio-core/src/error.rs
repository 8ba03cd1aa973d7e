use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Conditions that end a document's job without a result.
///
/// Everything else that can go wrong while processing a document is absorbed
/// by the owning stage and surfaces as a [`Warning`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("unreadable document: {0}")]
    UnreadableDocument(String),
    #[error("batch cancelled before the document was processed")]
    Cancelled,
    #[error("worker task panicked: {0}")]
    WorkerPanicked(String),
}

impl PipelineError {
    /// Short machine-readable reason written to the record's `error` field.
    pub fn reason(&self) -> &'static str {
        match self {
            PipelineError::UnreadableDocument(_) => "unreadable_document",
            PipelineError::Cancelled => "cancelled",
            PipelineError::WorkerPanicked(_) => "worker_panicked",
        }
    }
}

/// Non-fatal conditions recorded on a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// A page needed OCR and produced no text, or the whole document
    /// yielded none.
    PageExtractionDegraded,
    /// An LLM call was skipped or failed; the field kept its prior value.
    FallbackUnavailable,
    /// A cached entry from another pipeline version was ignored.
    CacheStale,
    /// The cache write failed after one retry.
    CacheWriteConflict,
}

impl WarningKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WarningKind::PageExtractionDegraded => "page_extraction_degraded",
            WarningKind::FallbackUnavailable => "fallback_unavailable",
            WarningKind::CacheStale => "cache_stale",
            WarningKind::CacheWriteConflict => "cache_write_conflict",
        }
    }

    /// Whether the warning is about the extracted content itself rather
    /// than the cache lookup or write of this particular run.
    pub fn describes_content(self) -> bool {
        matches!(
            self,
            WarningKind::PageExtractionDegraded | WarningKind::FallbackUnavailable
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            page: None,
        }
    }

    pub fn on_page(mut self, page: usize) -> Self {
        self.page = Some(page);
        self
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.page {
            Some(page) => write!(
                f,
                "{} (page {}): {}",
                self.kind.as_str(),
                page + 1,
                self.message
            ),
            None => write!(f, "{}: {}", self.kind.as_str(), self.message),
        }
    }
}
