//! OCR collaborators: rendering a PDF page to an image and recognizing text
//! in that image.
//!
//! The default implementations shell out to `pdftoppm` (poppler-utils) and
//! `tesseract`. Both run synchronously and are only called from the blocking
//! thread pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use thiserror::Error;

pub mod pdftoppm;
pub mod tesseract;

pub use pdftoppm::PdftoppmRasterizer;
pub use tesseract::TesseractEngine;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("OCR backend not available: {0}")]
    BackendNotAvailable(String),
    #[error("page rendering failed: {0}")]
    RenderFailed(String),
    #[error("OCR failed: {0}")]
    OcrFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A rendered page on disk. When the image lives in a temp directory the
/// directory is removed when the image is dropped.
#[derive(Debug)]
pub struct PageImage {
    pub path: PathBuf,
    pub page_index: usize,
    _workdir: Option<TempDir>,
}

impl PageImage {
    pub fn new(path: impl Into<PathBuf>, page_index: usize) -> Self {
        Self {
            path: path.into(),
            page_index,
            _workdir: None,
        }
    }

    pub fn in_temp_dir(workdir: TempDir, path: PathBuf, page_index: usize) -> Self {
        Self {
            path,
            page_index,
            _workdir: Some(workdir),
        }
    }
}

/// Renders one page of a PDF to an image.
pub trait PageRasterizer: Send + Sync {
    fn rasterize(&self, pdf_path: &Path, page_index: usize) -> Result<PageImage, OcrError>;
}

/// Recognizes text in a page image.
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    fn recognize(&self, image: &PageImage) -> Result<String, OcrError>;
}

/// Rasterizer and engine used together for per-page OCR.
#[derive(Clone)]
pub struct OcrPipeline {
    pub rasterizer: Arc<dyn PageRasterizer>,
    pub engine: Arc<dyn OcrEngine>,
}

impl OcrPipeline {
    pub fn new(rasterizer: Arc<dyn PageRasterizer>, engine: Arc<dyn OcrEngine>) -> Self {
        Self { rasterizer, engine }
    }

    /// Render and recognize a single page.
    pub fn recognize_page(&self, pdf_path: &Path, page_index: usize) -> Result<String, OcrError> {
        let image = self.rasterizer.rasterize(pdf_path, page_index)?;
        self.engine.recognize(&image)
    }
}

impl std::fmt::Debug for OcrPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcrPipeline")
            .field("engine", &self.engine.name())
            .finish()
    }
}

/// Whether a command-line tool can be spawned.
pub(crate) fn check_binary(name: &str) -> bool {
    std::process::Command::new(name)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok()
}
