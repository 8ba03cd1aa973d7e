use std::path::PathBuf;
use std::sync::Arc;

pub mod backend;
pub mod batch;
pub mod cache;
pub mod config_file;
pub mod describe;
pub mod error;
pub mod extract;
pub mod fallback;
pub mod heuristics;
pub mod llm;
pub mod mock;
pub mod model;
pub mod ocr;
pub mod orchestrator;
pub mod pool;
pub mod text_utils;

// Re-export for convenience
pub use backend::{BackendError, PdfBackend, PdfDocument};
pub use batch::{BatchSummary, process_documents, run_batch};
pub use cache::{CacheError, CacheLookup, CacheStats, ResultCache};
pub use error::{PipelineError, Warning, WarningKind};
pub use heuristics::{HeuristicParser, ParserConfig, ParserConfigBuilder};
pub use llm::{AdaptiveLimiter, LlmClient, LlmError, OpenAiClient};
pub use model::{
    Confidence, Document, DocumentRecord, ExtractionResult, Field, FieldName, Page, PageText,
    Provenance, Source,
};
pub use ocr::{OcrEngine, OcrError, OcrPipeline, PageRasterizer};
pub use orchestrator::{DocState, JobContext, Orchestrator, ProgressEvent};
pub use pool::{BatchJob, BatchPool};

/// Version tag stamped on every cached result. Bump whenever a change to
/// extraction, parsing or prompting can change a result for the same file.
pub const PIPELINE_VERSION: &str = "folio-1";

/// Configuration for the extraction pipeline.
#[derive(Clone)]
pub struct Config {
    pub num_workers: usize,
    /// Pages read per document, from the first.
    pub max_pages: usize,
    /// Non-whitespace characters below which a page is sent to OCR.
    pub ocr_trigger_chars: usize,
    pub max_page_chars: usize,
    pub ocr_enabled: bool,
    pub ocr_language: String,
    pub ocr_dpi: u32,
    pub llm_enabled: bool,
    pub llm_api_key: Option<String>,
    /// Base URL of an OpenAI-compatible API. `None` uses the public endpoint.
    pub llm_endpoint: Option<String>,
    pub llm_model: Option<String>,
    pub llm_timeout_secs: u64,
    pub llm_max_tokens: u32,
    pub llm_temperature: f32,
    pub description_max_tokens: u32,
    pub llm_context_pages: usize,
    pub llm_context_chars: usize,
    pub llm_requests_per_second: u32,
    /// Path to the persistent SQLite result cache. `None` keeps results in
    /// memory for the current run only.
    pub cache_path: Option<PathBuf>,
    /// Skip cache reads; results are still written.
    pub refresh: bool,
    pub pipeline_version: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("num_workers", &self.num_workers)
            .field("max_pages", &self.max_pages)
            .field("ocr_trigger_chars", &self.ocr_trigger_chars)
            .field("max_page_chars", &self.max_page_chars)
            .field("ocr_enabled", &self.ocr_enabled)
            .field("ocr_language", &self.ocr_language)
            .field("ocr_dpi", &self.ocr_dpi)
            .field("llm_enabled", &self.llm_enabled)
            .field("llm_api_key", &self.llm_api_key.as_ref().map(|_| "***"))
            .field("llm_endpoint", &self.llm_endpoint)
            .field("llm_model", &self.llm_model)
            .field("llm_timeout_secs", &self.llm_timeout_secs)
            .field("llm_max_tokens", &self.llm_max_tokens)
            .field("llm_temperature", &self.llm_temperature)
            .field("description_max_tokens", &self.description_max_tokens)
            .field("llm_context_pages", &self.llm_context_pages)
            .field("llm_context_chars", &self.llm_context_chars)
            .field("llm_requests_per_second", &self.llm_requests_per_second)
            .field("cache_path", &self.cache_path)
            .field("refresh", &self.refresh)
            .field("pipeline_version", &self.pipeline_version)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_workers: 4,
            max_pages: 3,
            ocr_trigger_chars: 20,
            max_page_chars: 20_000,
            ocr_enabled: true,
            ocr_language: "spa+eng".to_string(),
            ocr_dpi: 300,
            llm_enabled: true,
            llm_api_key: None,
            llm_endpoint: None,
            llm_model: None,
            llm_timeout_secs: 30,
            llm_max_tokens: 300,
            llm_temperature: 0.1,
            description_max_tokens: 200,
            llm_context_pages: 3,
            llm_context_chars: 3000,
            llm_requests_per_second: 2,
            cache_path: None,
            refresh: false,
            pipeline_version: PIPELINE_VERSION.to_string(),
        }
    }
}

/// Build a [`ResultCache`] from configuration.
///
/// If `cache_path` is set, opens a persistent SQLite-backed cache.
/// Otherwise, returns an in-memory-only cache.
pub fn build_result_cache(cache_path: Option<&std::path::Path>, version: &str) -> Arc<ResultCache> {
    if let Some(path) = cache_path {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match ResultCache::open(path, version) {
            Ok(cache) => {
                tracing::info!(path = %path.display(), version, "opened persistent result cache");
                return Arc::new(cache);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to open cache, falling back to in-memory");
            }
        }
    }
    Arc::new(ResultCache::in_memory(version))
}

#[cfg(test)]
mod build_cache_tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    fn temp_path() -> PathBuf {
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir()
            .join(format!(
                "folio_build_cache_test_{}_{}",
                std::process::id(),
                id,
            ))
            .join("results.db")
    }

    #[test]
    fn none_path_returns_in_memory() {
        let cache = build_result_cache(None, PIPELINE_VERSION);
        assert!(!cache.has_persistence());
        assert_eq!(cache.version(), PIPELINE_VERSION);
    }

    #[test]
    fn creates_parent_directory() {
        let path = temp_path();
        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
        let cache = build_result_cache(Some(&path), "v1");
        assert!(cache.has_persistence());
        assert!(path.parent().unwrap().exists());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unopenable_path_falls_back_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the database file should be.
        let path = dir.path().join("results.db");
        std::fs::create_dir_all(&path).unwrap();
        let cache = build_result_cache(Some(&path), "v1");
        assert!(!cache.has_persistence());
    }

    #[test]
    fn debug_masks_api_key() {
        let config = Config {
            llm_api_key: Some("sk-secret".into()),
            ..Config::default()
        };
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("***"));
    }
}
