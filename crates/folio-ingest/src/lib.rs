use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use folio_core::ocr::{OcrPipeline, PdftoppmRasterizer, TesseractEngine};
use folio_core::{AdaptiveLimiter, Config, OpenAiClient, Orchestrator, PdfBackend};

pub mod discover;

pub use discover::{discover, is_pdf_path};
// Re-export domain types for convenience
pub use folio_core::{DocumentRecord, ExtractionResult};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("input is neither a file nor a directory: {0}")]
    UnsupportedInput(PathBuf),
    #[cfg(not(feature = "pdf"))]
    #[error("PDF support not compiled in (enable the `pdf` feature of folio-ingest)")]
    NoPdfSupport,
}

/// The text-layer backend compiled into this build.
#[cfg(feature = "pdf")]
pub fn default_backend() -> Result<Arc<dyn PdfBackend>, IngestError> {
    Ok(Arc::new(folio_pdf_mupdf::MupdfBackend::default()))
}

#[cfg(not(feature = "pdf"))]
pub fn default_backend() -> Result<Arc<dyn PdfBackend>, IngestError> {
    Err(IngestError::NoPdfSupport)
}

/// Orchestrator with the compiled-in PDF backend and every collaborator
/// `config` enables.
pub fn build_orchestrator(config: &Config) -> Result<Orchestrator, IngestError> {
    Ok(build_orchestrator_with_backend(default_backend()?, config))
}

/// Wire `backend` together with OCR, the LLM client and the result cache as
/// configured. Collaborators that are enabled but unavailable (missing OCR
/// tools, no API key) are left out with a warning; the pipeline then records
/// the affected pages and fields as degraded.
pub fn build_orchestrator_with_backend(backend: Arc<dyn PdfBackend>, config: &Config) -> Orchestrator {
    let mut orchestrator = Orchestrator::new(backend);

    if config.ocr_enabled {
        match ocr_pipeline(config) {
            Some(ocr) => orchestrator = orchestrator.with_ocr(ocr),
            None => tracing::warn!(
                "pdftoppm or tesseract not found; image-only pages will not be OCRed"
            ),
        }
    }

    if config.llm_enabled {
        match config.llm_api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            Some(key) => {
                let client = OpenAiClient::new(
                    http_client(config),
                    key,
                    config.llm_endpoint.as_deref(),
                    config.llm_model.as_deref(),
                );
                let limiter = AdaptiveLimiter::per_second(config.llm_requests_per_second);
                orchestrator = orchestrator.with_llm(Arc::new(client), Some(Arc::new(limiter)));
            }
            None => tracing::warn!(
                "no LLM API key configured; fallback and descriptions are disabled"
            ),
        }
    }

    let cache = folio_core::build_result_cache(config.cache_path.as_deref(), &config.pipeline_version);
    orchestrator.with_cache(cache)
}

fn ocr_pipeline(config: &Config) -> Option<OcrPipeline> {
    if !PdftoppmRasterizer::is_available() || !TesseractEngine::is_available() {
        return None;
    }
    Some(OcrPipeline::new(
        Arc::new(PdftoppmRasterizer::new(config.ocr_dpi)),
        Arc::new(TesseractEngine::new(config.ocr_language.clone())),
    ))
}

fn http_client(config: &Config) -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(2)
        .pool_idle_timeout(Duration::from_secs(30))
        // The per-call timeout is enforced around each request; this only
        // bounds a stuck connection.
        .connect_timeout(Duration::from_secs(config.llm_timeout_secs.max(1)))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::mock::MockPdfBackend;

    fn offline_config() -> Config {
        Config {
            ocr_enabled: false,
            ..Config::default()
        }
    }

    #[test]
    fn no_api_key_means_no_llm() {
        let orch = build_orchestrator_with_backend(Arc::new(MockPdfBackend::new()), &offline_config());
        let dbg = format!("{orch:?}");
        assert!(dbg.contains("llm: None"), "{dbg}");
        assert!(orch.cache().is_some());
    }

    #[test]
    fn api_key_wires_openai_client() {
        let config = Config {
            llm_api_key: Some("sk-test".into()),
            llm_model: Some("gpt-4o-mini".into()),
            ..offline_config()
        };
        let orch = build_orchestrator_with_backend(Arc::new(MockPdfBackend::new()), &config);
        let dbg = format!("{orch:?}");
        assert!(dbg.contains("gpt-4o-mini"), "{dbg}");
        assert!(!dbg.contains("sk-test"));
    }

    #[test]
    fn blank_api_key_is_ignored() {
        let config = Config {
            llm_api_key: Some("   ".into()),
            ..offline_config()
        };
        let orch = build_orchestrator_with_backend(Arc::new(MockPdfBackend::new()), &config);
        assert!(format!("{orch:?}").contains("llm: None"));
    }

    #[test]
    fn cache_uses_configured_version_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            cache_path: Some(dir.path().join("folio").join("results.db")),
            pipeline_version: "test-7".into(),
            ..offline_config()
        };
        let orch = build_orchestrator_with_backend(Arc::new(MockPdfBackend::new()), &config);
        let cache = orch.cache().unwrap();
        assert!(cache.has_persistence());
        assert_eq!(cache.version(), "test-7");
    }
}
