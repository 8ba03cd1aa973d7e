use std::path::{Path, PathBuf};
use std::process::Command;

use super::{OcrError, PageImage, PageRasterizer, check_binary};

const PDFTOPPM_NOT_FOUND: &str = "pdftoppm not found (install poppler-utils)";

/// Renders pages with poppler's `pdftoppm` at a fixed resolution.
#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    dpi: u32,
}

impl Default for PdftoppmRasterizer {
    fn default() -> Self {
        Self { dpi: 300 }
    }
}

impl PdftoppmRasterizer {
    pub fn new(dpi: u32) -> Self {
        Self { dpi: dpi.max(72) }
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }

    pub fn is_available() -> bool {
        check_binary("pdftoppm")
    }
}

impl PageRasterizer for PdftoppmRasterizer {
    fn rasterize(&self, pdf_path: &Path, page_index: usize) -> Result<PageImage, OcrError> {
        let workdir = tempfile::Builder::new().prefix("folio-ocr-").tempdir()?;
        // pdftoppm numbers pages from 1
        let page = (page_index + 1).to_string();
        let dpi = self.dpi.to_string();
        let prefix = workdir.path().join("page");

        let output = Command::new("pdftoppm")
            .args(["-png", "-r", &dpi, "-f", &page, "-l", &page])
            .arg(pdf_path)
            .arg(&prefix)
            .output();

        match output {
            Ok(out) if out.status.success() => {
                let image = find_page_image(workdir.path(), page_index + 1).ok_or_else(|| {
                    OcrError::RenderFailed(format!("no image generated for page {}", page))
                })?;
                Ok(PageImage::in_temp_dir(workdir, image, page_index))
            }
            Ok(out) => Err(OcrError::RenderFailed(format!(
                "pdftoppm exited with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                OcrError::BackendNotAvailable(PDFTOPPM_NOT_FOUND.to_string()),
            ),
            Err(e) => Err(OcrError::Io(e)),
        }
    }
}

/// pdftoppm zero-pads the page number to the width of the document's page
/// count (`page-1.png`, `page-01.png`, `page-001.png`, ...).
fn find_page_image(dir: &Path, page_number: usize) -> Option<PathBuf> {
    (1..=5)
        .map(|width| dir.join(format!("page-{:0width$}.png", page_number, width = width)))
        .find(|path| path.exists())
}
