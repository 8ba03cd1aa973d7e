use std::path::Path;

use thiserror::Error;

use crate::model::StyledLine;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("failed to open PDF: {0}")]
    OpenError(String),
    #[error("failed to extract text from page {page}: {message}")]
    PageError { page: usize, message: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Text-layer extraction library.
///
/// Implementors only read what the PDF already contains; OCR and all
/// decisions about which text to trust live in
/// [`TextExtractor`](crate::extract::TextExtractor).
pub trait PdfBackend: Send + Sync {
    /// Open a document. Failure here means the file is unreadable (missing,
    /// corrupt, or not a PDF).
    fn open(&self, path: &Path) -> Result<Box<dyn PdfDocument>, BackendError>;
}

/// An opened PDF. Used from a single thread for the duration of one
/// extraction, so it need not be `Send`.
pub trait PdfDocument {
    fn page_count(&self) -> usize;

    /// Embedded text of one page (0-based).
    fn page_text(&self, index: usize) -> Result<String, BackendError>;

    /// Lines with font sizes, when the backend can provide them.
    fn page_lines(&self, _index: usize) -> Result<Vec<StyledLine>, BackendError> {
        Ok(Vec::new())
    }
}
