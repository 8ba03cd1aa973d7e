//! Mock PDF and OCR collaborators for tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::{BackendError, PdfBackend, PdfDocument};
use crate::model::StyledLine;
use crate::ocr::{OcrEngine, OcrError, OcrPipeline, PageImage, PageRasterizer};

/// One page of a [`MockPdfBackend`] document.
#[derive(Clone, Debug)]
pub struct MockPage {
    pub text: String,
    pub lines: Vec<StyledLine>,
    /// Reading this page's text layer fails.
    pub fail: bool,
}

impl MockPage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            lines: Vec::new(),
            fail: false,
        }
    }

    /// A page whose text layer reports per-line font sizes.
    pub fn styled(lines: &[(&str, f32)]) -> Self {
        let lines: Vec<StyledLine> = lines
            .iter()
            .map(|(text, font_size)| StyledLine {
                text: text.to_string(),
                font_size: *font_size,
            })
            .collect();
        let text = lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            text,
            lines,
            fail: false,
        }
    }

    /// A page with no text layer (a scan).
    pub fn image_only() -> Self {
        Self::text("")
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::text("")
        }
    }
}

#[derive(Clone, Debug)]
enum MockPdf {
    Pages(Vec<MockPage>),
    Corrupt(String),
}

/// In-memory [`PdfBackend`] keyed by path. Unknown paths fail to open.
#[derive(Default)]
pub struct MockPdfBackend {
    documents: HashMap<PathBuf, MockPdf>,
    opens: AtomicUsize,
    page_reads: Arc<Mutex<Vec<(PathBuf, usize)>>>,
}

impl MockPdfBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, path: impl Into<PathBuf>, pages: Vec<MockPage>) -> Self {
        self.documents.insert(path.into(), MockPdf::Pages(pages));
        self
    }

    pub fn with_corrupt(mut self, path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        self.documents
            .insert(path.into(), MockPdf::Corrupt(message.into()));
        self
    }

    /// How many times `open()` has been called.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Every `(path, page)` whose text layer was read, in call order.
    pub fn pages_read(&self) -> Vec<(PathBuf, usize)> {
        self.page_reads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl PdfBackend for MockPdfBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn PdfDocument>, BackendError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match self.documents.get(path) {
            Some(MockPdf::Pages(pages)) => Ok(Box::new(MockDocument {
                path: path.to_path_buf(),
                pages: pages.clone(),
                reads: Arc::clone(&self.page_reads),
            })),
            Some(MockPdf::Corrupt(message)) => Err(BackendError::OpenError(message.clone())),
            None => Err(BackendError::OpenError(format!(
                "no mock document for {}",
                path.display()
            ))),
        }
    }
}

struct MockDocument {
    path: PathBuf,
    pages: Vec<MockPage>,
    reads: Arc<Mutex<Vec<(PathBuf, usize)>>>,
}

impl PdfDocument for MockDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_text(&self, index: usize) -> Result<String, BackendError> {
        self.reads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((self.path.clone(), index));
        let page = self.pages.get(index).ok_or_else(|| BackendError::PageError {
            page: index,
            message: "page out of range".into(),
        })?;
        if page.fail {
            return Err(BackendError::PageError {
                page: index,
                message: "damaged content stream".into(),
            });
        }
        Ok(page.text.clone())
    }

    fn page_lines(&self, index: usize) -> Result<Vec<StyledLine>, BackendError> {
        Ok(self
            .pages
            .get(index)
            .map(|p| p.lines.clone())
            .unwrap_or_default())
    }
}

/// Rasterizer that "renders" by pointing at the PDF itself.
#[derive(Debug, Default)]
pub struct MockRasterizer;

impl PageRasterizer for MockRasterizer {
    fn rasterize(&self, pdf_path: &Path, page_index: usize) -> Result<PageImage, OcrError> {
        Ok(PageImage::new(pdf_path, page_index))
    }
}

/// OCR engine answering per page index, with a fallback response.
pub struct MockOcr {
    by_page: HashMap<usize, Result<String, String>>,
    fallback: Result<String, String>,
    calls: Mutex<Vec<usize>>,
}

impl MockOcr {
    /// Recognize every page as `text`.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            by_page: HashMap::new(),
            fallback: Ok(text.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail on every page.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fallback: Err(message.into()),
            ..Self::new("")
        }
    }

    pub fn with_page(mut self, page_index: usize, text: impl Into<String>) -> Self {
        self.by_page.insert(page_index, Ok(text.into()));
        self
    }

    pub fn with_page_failure(mut self, page_index: usize, message: impl Into<String>) -> Self {
        self.by_page.insert(page_index, Err(message.into()));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Page indexes passed to `recognize()`, in call order.
    pub fn pages_recognized(&self) -> Vec<usize> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl OcrEngine for MockOcr {
    fn name(&self) -> &str {
        "mock"
    }

    fn recognize(&self, image: &PageImage) -> Result<String, OcrError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(image.page_index);
        match self.by_page.get(&image.page_index).unwrap_or(&self.fallback) {
            Ok(text) => Ok(text.clone()),
            Err(message) => Err(OcrError::OcrFailed(message.clone())),
        }
    }
}

/// Wrap a shared [`MockOcr`] into an [`OcrPipeline`] with [`MockRasterizer`].
pub fn mock_ocr_pipeline(engine: Arc<MockOcr>) -> OcrPipeline {
    OcrPipeline::new(Arc::new(MockRasterizer), engine)
}
