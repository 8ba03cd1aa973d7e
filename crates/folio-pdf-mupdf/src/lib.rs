use std::path::Path;

use mupdf::{Document, TextPageFlags};

use folio_core::model::StyledLine;
use folio_core::{BackendError, PdfBackend, PdfDocument};

/// MuPDF-based implementation of [`PdfBackend`].
///
/// This crate is the sole AGPL island: it isolates the mupdf dependency
/// (which is AGPL-3.0) so that the rest of the workspace does not
/// transitively depend on it.
///
/// Header and footer bands can be excluded from the text layer. Both are
/// kept by default because cover pages often carry the masthead, date or
/// volume line in exactly those bands.
#[derive(Debug, Clone, Default)]
pub struct MupdfBackend {
    /// Fraction of page height from bottom to exclude as footer (0.0–1.0).
    footer_exclusion_ratio: Option<f32>,
    /// Fraction of page height from top to exclude as header (0.0–1.0).
    header_exclusion_ratio: Option<f32>,
}

impl MupdfBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the footer exclusion ratio. Pass `0.0` to disable.
    pub fn with_footer_exclusion(mut self, ratio: f32) -> Self {
        self.footer_exclusion_ratio = (ratio > 0.0).then_some(ratio.min(1.0));
        self
    }

    /// Set the header exclusion ratio. Pass `0.0` to disable.
    pub fn with_header_exclusion(mut self, ratio: f32) -> Self {
        self.header_exclusion_ratio = (ratio > 0.0).then_some(ratio.min(1.0));
        self
    }
}

impl PdfBackend for MupdfBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn PdfDocument>, BackendError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| BackendError::OpenError("invalid path encoding".into()))?;

        let document =
            Document::open(path_str).map_err(|e| BackendError::OpenError(e.to_string()))?;
        let page_count = document
            .page_count()
            .map_err(|e| BackendError::OpenError(e.to_string()))?;
        let page_count = usize::try_from(page_count).unwrap_or(0);

        tracing::trace!(path = %path.display(), page_count, "opened PDF");
        Ok(Box::new(MupdfDocument {
            document,
            page_count,
            footer_exclusion_ratio: self.footer_exclusion_ratio,
            header_exclusion_ratio: self.header_exclusion_ratio,
        }))
    }
}

struct MupdfDocument {
    document: Document,
    page_count: usize,
    footer_exclusion_ratio: Option<f32>,
    header_exclusion_ratio: Option<f32>,
}

impl MupdfDocument {
    /// Lines of one page with the largest glyph size on each line.
    fn read_lines(&self, index: usize) -> Result<Vec<StyledLine>, BackendError> {
        let page_error = |message: String| BackendError::PageError {
            page: index,
            message,
        };
        let page_no = i32::try_from(index).map_err(|e| page_error(e.to_string()))?;
        let page = self
            .document
            .load_page(page_no)
            .map_err(|e| page_error(e.to_string()))?;
        let text_page = page
            .to_text_page(TextPageFlags::empty())
            .map_err(|e| page_error(e.to_string()))?;

        // Get page bounds for header/footer exclusion
        let page_bounds = page.bounds().map_err(|e| page_error(e.to_string()))?;
        let page_height = page_bounds.y1 - page_bounds.y0;
        let header_threshold = self
            .header_exclusion_ratio
            .map(|r| page_bounds.y0 + page_height * r);
        let footer_threshold = self
            .footer_exclusion_ratio
            .map(|r| page_bounds.y1 - page_height * r);

        let mut lines = Vec::new();
        for block in text_page.blocks() {
            let block_bounds = block.bounds();
            if header_threshold.is_some_and(|t| block_bounds.y1 <= t) {
                continue;
            }
            if footer_threshold.is_some_and(|t| block_bounds.y0 >= t) {
                continue;
            }

            for line in block.lines() {
                let mut text = String::new();
                let mut font_size = 0.0f32;
                for c in line.chars() {
                    text.push(c.char().unwrap_or('\u{FFFD}'));
                    font_size = font_size.max(c.size());
                }
                lines.push(StyledLine { text, font_size });
            }
        }
        Ok(lines)
    }
}

impl PdfDocument for MupdfDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn page_text(&self, index: usize) -> Result<String, BackendError> {
        let mut text = String::new();
        for line in self.read_lines(index)? {
            text.push_str(&line.text);
            text.push('\n');
        }
        Ok(text)
    }

    fn page_lines(&self, index: usize) -> Result<Vec<StyledLine>, BackendError> {
        Ok(self
            .read_lines(index)?
            .into_iter()
            .filter(|l| !l.text.trim().is_empty())
            .collect())
    }
}
