use std::process::Command;

use super::{OcrEngine, OcrError, PageImage, check_binary};

/// Page segmentation modes tried in order: uniform block, automatic,
/// single column, sparse text.
const DEFAULT_PSM_MODES: &[u8] = &[6, 3, 4, 11];

/// Tesseract via its command-line interface.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    language: String,
    psm_modes: Vec<u8>,
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new("spa+eng")
    }
}

impl TesseractEngine {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            psm_modes: DEFAULT_PSM_MODES.to_vec(),
        }
    }

    /// Override the page segmentation modes to try.
    pub fn with_psm_modes(mut self, modes: Vec<u8>) -> Self {
        if !modes.is_empty() {
            self.psm_modes = modes;
        }
        self
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn is_available() -> bool {
        check_binary("tesseract")
    }

    fn run(&self, image: &PageImage, psm: u8) -> Result<String, OcrError> {
        let output = Command::new("tesseract")
            .arg(&image.path)
            .arg("stdout")
            .args(["-l", &self.language])
            .args(["--psm", &psm.to_string()])
            .output();

        match output {
            Ok(output) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(output) => Err(OcrError::OcrFailed(format!(
                "tesseract failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                OcrError::BackendNotAvailable("tesseract not found (install tesseract-ocr)".into()),
            ),
            Err(e) => Err(OcrError::Io(e)),
        }
    }
}

impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    /// Returns the first non-empty result across the configured modes. An
    /// engine that is missing fails immediately; other errors move on to the
    /// next mode and the last one is reported.
    fn recognize(&self, image: &PageImage) -> Result<String, OcrError> {
        let mut last_err = None;
        for &psm in &self.psm_modes {
            match self.run(image, psm) {
                Ok(text) if !text.trim().is_empty() => return Ok(text),
                Ok(_) => {
                    tracing::debug!(page = image.page_index, psm, "tesseract returned no text");
                }
                Err(e @ OcrError::BackendNotAvailable(_)) => return Err(e),
                Err(e) => {
                    tracing::debug!(page = image.page_index, psm, error = %e, "tesseract mode failed");
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_language_and_modes() {
        let engine = TesseractEngine::default();
        assert_eq!(engine.language(), "spa+eng");
        assert_eq!(engine.psm_modes, vec![6, 3, 4, 11]);
    }

    #[test]
    fn empty_mode_override_is_ignored() {
        let engine = TesseractEngine::new("eng").with_psm_modes(vec![]);
        assert_eq!(engine.psm_modes, vec![6, 3, 4, 11]);
        let engine = TesseractEngine::new("eng").with_psm_modes(vec![3]);
        assert_eq!(engine.psm_modes, vec![3]);
    }
}
