//! Per-page text extraction with OCR fallback.
//!
//! Each of the first `max_pages` pages is read from the embedded text layer.
//! A page with fewer than `ocr_trigger_chars` non-whitespace characters is
//! treated as image-only and sent through OCR on its own; the other pages
//! keep their embedded text. OCR failures leave an empty page flagged
//! `ocr_failed` and never fail the document.

use std::path::Path;
use std::sync::Arc;

use crate::Config;
use crate::backend::{BackendError, PdfBackend, PdfDocument};
use crate::error::{Warning, WarningKind};
use crate::model::{Page, PageText};
use crate::ocr::OcrPipeline;
use crate::text_utils::{non_whitespace_len, truncate_chars};

/// Limits applied by [`TextExtractor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractSettings {
    /// Pages read from the start of the document.
    pub max_pages: usize,
    /// Pages with fewer non-whitespace characters than this go to OCR.
    pub ocr_trigger_chars: usize,
    /// Per-page cap on stored text, in characters.
    pub max_page_chars: usize,
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self {
            max_pages: 3,
            ocr_trigger_chars: 20,
            max_page_chars: 20_000,
        }
    }
}

impl ExtractSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_pages: config.max_pages.max(1),
            ocr_trigger_chars: config.ocr_trigger_chars,
            max_page_chars: config.max_page_chars.max(1),
        }
    }
}

/// Output of [`TextExtractor::extract`].
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Total pages in the document, not only the ones read.
    pub page_count: usize,
    pub pages: PageText,
    pub warnings: Vec<Warning>,
}

pub struct TextExtractor {
    backend: Arc<dyn PdfBackend>,
    ocr: Option<OcrPipeline>,
    settings: ExtractSettings,
}

impl TextExtractor {
    pub fn new(
        backend: Arc<dyn PdfBackend>,
        ocr: Option<OcrPipeline>,
        settings: ExtractSettings,
    ) -> Self {
        Self {
            backend,
            ocr,
            settings,
        }
    }

    /// Extract text from the first pages of `path`.
    ///
    /// Only a document that cannot be opened is an error. Blocking: call from
    /// a blocking context.
    pub fn extract(&self, path: &Path) -> Result<Extraction, BackendError> {
        let document = self.backend.open(path)?;
        let page_count = document.page_count();
        let limit = page_count.min(self.settings.max_pages);

        let mut warnings = Vec::new();
        let pages: Vec<Page> = (0..limit)
            .map(|index| self.extract_page(path, document.as_ref(), index, &mut warnings))
            .collect();
        let pages = PageText::new(pages);

        if page_count == 0 {
            tracing::warn!(path = %path.display(), "document has no pages");
            warnings.push(Warning::new(
                WarningKind::PageExtractionDegraded,
                "document has no pages",
            ));
        } else if pages.is_blank() {
            tracing::warn!(
                path = %path.display(),
                pages = limit,
                "no text recovered from any page"
            );
            warnings.push(Warning::new(
                WarningKind::PageExtractionDegraded,
                format!("no text recovered from any of the first {limit} page(s)"),
            ));
        }

        Ok(Extraction {
            page_count,
            pages,
            warnings,
        })
    }

    fn extract_page(
        &self,
        path: &Path,
        document: &dyn PdfDocument,
        index: usize,
        warnings: &mut Vec<Warning>,
    ) -> Page {
        let embedded = match document.page_text(index) {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(path = %path.display(), page = index, error = %e, "text layer unreadable");
                String::new()
            }
        };

        let chars = non_whitespace_len(&embedded);
        if chars >= self.settings.ocr_trigger_chars {
            let lines = document.page_lines(index).unwrap_or_else(|e| {
                tracing::debug!(page = index, error = %e, "no line structure");
                Vec::new()
            });
            return Page::embedded(index, self.cap(embedded), lines);
        }

        tracing::debug!(
            path = %path.display(),
            page = index,
            chars,
            threshold = self.settings.ocr_trigger_chars,
            "page below text threshold, running OCR"
        );

        let Some(ocr) = &self.ocr else {
            warnings.push(
                Warning::new(
                    WarningKind::PageExtractionDegraded,
                    "page has no usable text layer and OCR is disabled",
                )
                .on_page(index),
            );
            return Page::ocr_failed(index);
        };

        match ocr.recognize_page(path, index) {
            Ok(text) if !text.trim().is_empty() => Page::ocr(index, self.cap(text)),
            Ok(_) => {
                tracing::warn!(path = %path.display(), page = index, "OCR produced no text");
                warnings.push(
                    Warning::new(WarningKind::PageExtractionDegraded, "OCR produced no text")
                        .on_page(index),
                );
                Page::ocr_failed(index)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), page = index, error = %e, "OCR failed");
                warnings.push(
                    Warning::new(WarningKind::PageExtractionDegraded, e.to_string())
                        .on_page(index),
                );
                Page::ocr_failed(index)
            }
        }
    }

    fn cap(&self, text: String) -> String {
        if text.chars().count() <= self.settings.max_page_chars {
            text
        } else {
            truncate_chars(&text, self.settings.max_page_chars).to_string()
        }
    }
}
