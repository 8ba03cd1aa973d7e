//! Per-document pipeline.
//!
//! ```text
//! Pending -> CacheCheck -> CacheHit -> Done
//!                       \-> Extracting -> Parsing -> Fallback -> Describing -> Caching -> Done
//! ```
//!
//! `Failed` is reachable only when the file cannot be read or opened at all.
//! Every other problem is absorbed by the stage that hit it and recorded as
//! a [`Warning`] on the document.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::{CacheLookup, CachedRecord, ResultCache};
use crate::describe::DescriptionGenerator;
use crate::error::{PipelineError, Warning, WarningKind};
use crate::extract::{ExtractSettings, TextExtractor};
use crate::fallback::LlmFallbackExtractor;
use crate::heuristics::{HeuristicParser, ParserConfig};
use crate::llm::{AdaptiveLimiter, LlmClient, LlmSettings};
use crate::model::{Document, DocumentRecord, ExtractionResult, fingerprint};
use crate::ocr::OcrPipeline;
use crate::{Config, backend::PdfBackend};

/// Pipeline state of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocState {
    Pending,
    CacheCheck,
    CacheHit,
    Extracting,
    Parsing,
    Fallback,
    Describing,
    Caching,
    Done,
    Failed,
}

impl DocState {
    pub fn as_str(self) -> &'static str {
        match self {
            DocState::Pending => "pending",
            DocState::CacheCheck => "cache-check",
            DocState::CacheHit => "cache-hit",
            DocState::Extracting => "extracting",
            DocState::Parsing => "parsing",
            DocState::Fallback => "fallback",
            DocState::Describing => "describing",
            DocState::Caching => "caching",
            DocState::Done => "done",
            DocState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DocState::Done | DocState::Failed)
    }
}

impl std::fmt::Display for DocState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress events emitted while a batch runs.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started {
        index: usize,
        total: usize,
        path: PathBuf,
    },
    Stage {
        index: usize,
        path: PathBuf,
        state: DocState,
    },
    Warning {
        index: usize,
        path: PathBuf,
        warning: Warning,
    },
    Finished {
        index: usize,
        total: usize,
        record: Box<DocumentRecord>,
    },
}

pub type ProgressFn = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Position of a document in its batch plus the progress callback.
#[derive(Clone)]
pub struct JobContext {
    pub index: usize,
    pub total: usize,
    pub progress: ProgressFn,
}

impl JobContext {
    pub fn new(index: usize, total: usize, progress: ProgressFn) -> Self {
        Self {
            index,
            total,
            progress,
        }
    }

    /// A context that discards events, for single-document use.
    pub fn silent() -> Self {
        Self::new(0, 1, Arc::new(|_| {}))
    }

    fn stage(&self, path: &Path, state: DocState) {
        tracing::debug!(path = %path.display(), state = %state, "stage");
        (self.progress)(ProgressEvent::Stage {
            index: self.index,
            path: path.to_path_buf(),
            state,
        });
    }

    fn warn(&self, path: &Path, warning: &Warning) {
        (self.progress)(ProgressEvent::Warning {
            index: self.index,
            path: path.to_path_buf(),
            warning: warning.clone(),
        });
    }
}

/// Owns the collaborators and runs the pipeline for one document at a time.
/// Cheap to share behind an `Arc`; holds no per-document state.
#[derive(Clone)]
pub struct Orchestrator {
    backend: Arc<dyn PdfBackend>,
    ocr: Option<OcrPipeline>,
    llm: Option<Arc<dyn LlmClient>>,
    limiter: Option<Arc<AdaptiveLimiter>>,
    cache: Option<Arc<ResultCache>>,
    parser: HeuristicParser,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn PdfBackend>) -> Self {
        Self {
            backend,
            ocr: None,
            llm: None,
            limiter: None,
            cache: None,
            parser: HeuristicParser::default(),
        }
    }

    pub fn with_ocr(mut self, ocr: OcrPipeline) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn with_llm(
        mut self,
        client: Arc<dyn LlmClient>,
        limiter: Option<Arc<AdaptiveLimiter>>,
    ) -> Self {
        self.llm = Some(client);
        self.limiter = limiter;
        self
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_parser_config(mut self, config: ParserConfig) -> Self {
        self.parser = HeuristicParser::new(config);
        self
    }

    pub fn cache(&self) -> Option<&Arc<ResultCache>> {
        self.cache.as_ref()
    }

    /// Tag naming every setting that changes what a run produces for a
    /// given file. Cached results are keyed by fingerprint and this tag, so
    /// a run with a different page limit, OCR setup or model never reuses
    /// another configuration's output.
    pub fn cache_settings(&self, config: &Config) -> String {
        let extract = ExtractSettings::from_config(config);
        let mut tag = format!(
            "pages={};ocr_trigger={};page_chars={}",
            extract.max_pages, extract.ocr_trigger_chars, extract.max_page_chars
        );
        match self.ocr.as_ref().filter(|_| config.ocr_enabled) {
            Some(ocr) => tag.push_str(&format!(
                ";ocr={}:{}:{}",
                ocr.engine.name(),
                config.ocr_language,
                config.ocr_dpi
            )),
            None => tag.push_str(";ocr=off"),
        }
        match self.llm.as_ref().filter(|_| config.llm_enabled) {
            Some(client) => {
                let llm = LlmSettings::from_config(config);
                tag.push_str(&format!(
                    ";llm={}:{}:{}",
                    client.name(),
                    llm.context_pages,
                    llm.context_chars
                ));
            }
            None => tag.push_str(";llm=off"),
        }
        let parser = fingerprint(format!("{:?}", self.parser.config()).as_bytes());
        tag.push_str(&format!(";parser={}", &parser[..12]));
        tag
    }

    /// Run the full pipeline for `path`. Always returns a record; failures
    /// are carried in its `error` field.
    pub async fn process(&self, path: &Path, config: &Config, ctx: &JobContext) -> DocumentRecord {
        (ctx.progress)(ProgressEvent::Started {
            index: ctx.index,
            total: ctx.total,
            path: path.to_path_buf(),
        });
        ctx.stage(path, DocState::Pending);

        let mut warnings = Vec::new();
        let outcome = self.run(path, config, ctx, &mut warnings).await;
        for warning in &warnings {
            ctx.warn(path, warning);
        }

        match outcome {
            Ok(record) => {
                ctx.stage(path, DocState::Done);
                DocumentRecord { warnings, ..record }
            }
            Err((error, fp)) => {
                tracing::warn!(path = %path.display(), error = %error, "document failed");
                ctx.stage(path, DocState::Failed);
                DocumentRecord::failed(path, fp, &error, warnings)
            }
        }
    }

    async fn run(
        &self,
        path: &Path,
        config: &Config,
        ctx: &JobContext,
        warnings: &mut Vec<Warning>,
    ) -> Result<DocumentRecord, (PipelineError, Option<String>)> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| (PipelineError::UnreadableDocument(e.to_string()), None))?;
        let fp = fingerprint(&bytes);
        drop(bytes);

        ctx.stage(path, DocState::CacheCheck);
        let cache_settings = self.cache.as_ref().map(|_| self.cache_settings(config));
        if let (Some(cache), Some(settings)) = (&self.cache, &cache_settings)
            && !config.refresh
        {
            match cache.lookup(&fp, settings) {
                CacheLookup::Hit(hit) => {
                    ctx.stage(path, DocState::CacheHit);
                    warnings.extend(hit.warnings);
                    let document = Document {
                        path: path.to_path_buf(),
                        fingerprint: fp,
                        page_count: hit.page_count,
                    };
                    return Ok(DocumentRecord::completed(&document, hit.result, true, Vec::new()));
                }
                CacheLookup::Stale { found_version } => warnings.push(Warning::new(
                    WarningKind::CacheStale,
                    format!(
                        "cached result from pipeline version {found_version} ignored (current {})",
                        cache.version()
                    ),
                )),
                CacheLookup::Miss => {}
            }
        }

        ctx.stage(path, DocState::Extracting);
        let extractor = TextExtractor::new(
            self.backend.clone(),
            self.ocr.clone().filter(|_| config.ocr_enabled),
            ExtractSettings::from_config(config),
        );
        let owned_path = path.to_path_buf();
        let extraction = match tokio::task::spawn_blocking(move || extractor.extract(&owned_path))
            .await
        {
            Ok(result) => result,
            // Re-raised so the pool's per-job task records it.
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                return Err((PipelineError::WorkerPanicked(e.to_string()), Some(fp)));
            }
        }
        .map_err(|e| (PipelineError::UnreadableDocument(e.to_string()), Some(fp.clone())))?;
        warnings.extend(extraction.warnings);
        let pages = extraction.pages;

        ctx.stage(path, DocState::Parsing);
        let partial = self.parser.parse(&pages);

        let llm = self.llm.clone().filter(|_| config.llm_enabled);
        let settings = LlmSettings::from_config(config);
        // Whether a model call will actually be attempted for this document.
        let model_called = llm.is_some()
            && !pages
                .context(settings.context_pages, settings.context_chars)
                .text
                .trim()
                .is_empty();

        ctx.stage(path, DocState::Fallback);
        let fallback = LlmFallbackExtractor::new(llm.clone(), self.limiter.clone(), settings.clone());
        let (partial, fallback_warnings) = fallback.fallback(&pages, partial).await;
        warnings.extend(fallback_warnings);

        ctx.stage(path, DocState::Describing);
        let describer = DescriptionGenerator::new(llm, self.limiter.clone(), settings);
        let (description, describe_warnings) = describer.describe(&pages).await;
        warnings.extend(describe_warnings);

        let result = ExtractionResult::from_parts(partial, description);

        if let (Some(cache), Some(settings)) = (&self.cache, &cache_settings) {
            ctx.stage(path, DocState::Caching);
            // A model that was configured but failed may answer next time.
            let model_failed = model_called
                && warnings
                    .iter()
                    .any(|w| w.kind == WarningKind::FallbackUnavailable);
            if model_failed {
                tracing::debug!(path = %path.display(), "model call failed; result not cached");
            } else {
                let record = CachedRecord {
                    result: result.clone(),
                    page_count: extraction.page_count,
                    warnings: warnings
                        .iter()
                        .filter(|w| w.kind.describes_content())
                        .cloned()
                        .collect(),
                };
                if let Err(e) = cache.put(&fp, settings, &record) {
                    tracing::warn!(path = %path.display(), error = %e, "cache write failed");
                    warnings.push(Warning::new(
                        WarningKind::CacheWriteConflict,
                        format!("result not persisted: {e}"),
                    ));
                }
            }
        }

        let document = Document {
            path: path.to_path_buf(),
            fingerprint: fp,
            page_count: extraction.page_count,
        };
        Ok(DocumentRecord::completed(&document, result, false, Vec::new()))
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("ocr", &self.ocr.as_ref().map(|o| o.engine.name().to_string()))
            .field("llm", &self.llm.as_ref().map(|c| c.name().to_string()))
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{MockLlm, MockReply};
    use crate::mock::{MockOcr, MockPage, MockPdfBackend, mock_ocr_pipeline};
    use crate::model::Confidence;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn write_pdf(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn recording() -> (JobContext, Arc<Mutex<Vec<ProgressEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let ctx = JobContext::new(
            0,
            1,
            Arc::new(move |e| sink.lock().unwrap().push(e)),
        );
        (ctx, events)
    }

    fn states(events: &[ProgressEvent]) -> Vec<DocState> {
        events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Stage { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn full_path_visits_every_stage() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pdf(&dir, "a.pdf", b"doc-a");
        let backend = MockPdfBackend::new()
            .with_document(&path, vec![MockPage::text("Annual Report, March 15, 2023")]);
        let orch = Orchestrator::new(Arc::new(backend))
            .with_llm(Arc::new(MockLlm::text("A report.")), None)
            .with_cache(Arc::new(ResultCache::in_memory("t")));
        let (ctx, events) = recording();

        let record = orch.process(&path, &Config::default(), &ctx).await;
        assert!(!record.is_failed());
        assert_eq!(
            states(&events.lock().unwrap()),
            vec![
                DocState::Pending,
                DocState::CacheCheck,
                DocState::Extracting,
                DocState::Parsing,
                DocState::Fallback,
                DocState::Describing,
                DocState::Caching,
                DocState::Done,
            ]
        );
    }

    #[tokio::test]
    async fn second_run_is_a_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pdf(&dir, "a.pdf", b"doc-a");
        let backend = Arc::new(
            MockPdfBackend::new()
                .with_document(&path, vec![MockPage::text("Annual Report, March 15, 2023")]),
        );
        let orch = Orchestrator::new(backend.clone())
            .with_cache(Arc::new(ResultCache::in_memory("t")));

        let first = orch.process(&path, &Config::default(), &JobContext::silent()).await;
        let (ctx, events) = recording();
        let second = orch.process(&path, &Config::default(), &ctx).await;

        assert!(second.cached);
        assert_eq!(first.result, second.result);
        assert_eq!(backend.open_count(), 1);
        assert!(states(&events.lock().unwrap()).contains(&DocState::CacheHit));
    }

    #[tokio::test]
    async fn refresh_skips_cache_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pdf(&dir, "a.pdf", b"doc-a");
        let backend = Arc::new(
            MockPdfBackend::new().with_document(&path, vec![MockPage::text("Quarterly Report of the Ministry, 2020")]),
        );
        let orch = Orchestrator::new(backend.clone())
            .with_cache(Arc::new(ResultCache::in_memory("t")));
        let config = Config {
            refresh: true,
            ..Config::default()
        };
        orch.process(&path, &config, &JobContext::silent()).await;
        let again = orch.process(&path, &config, &JobContext::silent()).await;
        assert!(!again.cached);
        assert_eq!(backend.open_count(), 2);
    }

    #[tokio::test]
    async fn missing_file_fails_without_fingerprint() {
        let orch = Orchestrator::new(Arc::new(MockPdfBackend::new()));
        let (ctx, events) = recording();
        let record = orch
            .process(Path::new("/nonexistent/x.pdf"), &Config::default(), &ctx)
            .await;
        assert_eq!(record.error.as_deref(), Some("unreadable_document"));
        assert!(record.fingerprint.is_none());
        assert_eq!(states(&events.lock().unwrap()).last(), Some(&DocState::Failed));
    }

    #[tokio::test]
    async fn corrupt_pdf_fails_with_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pdf(&dir, "bad.pdf", b"garbage");
        let backend = MockPdfBackend::new().with_corrupt(&path, "no xref table");
        let orch = Orchestrator::new(Arc::new(backend));
        let record = orch.process(&path, &Config::default(), &JobContext::silent()).await;
        assert!(record.is_failed());
        assert_eq!(record.fingerprint, Some(fingerprint(b"garbage")));
        assert!(record.result.title.is_empty());
    }

    #[tokio::test]
    async fn ocr_disabled_by_config_is_not_called() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pdf(&dir, "scan.pdf", b"scan");
        let backend = MockPdfBackend::new().with_document(&path, vec![MockPage::image_only()]);
        let ocr = Arc::new(MockOcr::new("Boletín 1999"));
        let orch = Orchestrator::new(Arc::new(backend)).with_ocr(mock_ocr_pipeline(ocr.clone()));
        let config = Config {
            ocr_enabled: false,
            ..Config::default()
        };
        let record = orch.process(&path, &config, &JobContext::silent()).await;
        assert_eq!(ocr.call_count(), 0);
        assert!(
            record
                .warnings
                .iter()
                .any(|w| w.kind == WarningKind::PageExtractionDegraded)
        );
    }

    #[tokio::test]
    async fn stale_entry_is_recomputed_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pdf(&dir, "a.pdf", b"doc-a");
        let db = dir.path().join("results.db");
        let backend = Arc::new(
            MockPdfBackend::new()
                .with_document(&path, vec![MockPage::text("Annual Report, March 15, 2023")]),
        );
        let settings = Orchestrator::new(backend.clone()).cache_settings(&Config::default());
        let old = ResultCache::open(&db, "old").unwrap();
        let stored = CachedRecord {
            result: ExtractionResult::default(),
            page_count: 1,
            warnings: Vec::new(),
        };
        old.put(&fingerprint(b"doc-a"), &settings, &stored).unwrap();
        drop(old);

        let cache = Arc::new(ResultCache::open(&db, "new").unwrap());
        let orch = Orchestrator::new(backend).with_cache(cache.clone());
        let record = orch.process(&path, &Config::default(), &JobContext::silent()).await;

        assert!(!record.cached);
        assert!(record.warnings.iter().any(|w| w.kind == WarningKind::CacheStale));
        assert_eq!(record.result.date.confidence(), Confidence::High);
        assert!(cache.get(&fingerprint(b"doc-a"), &settings).is_some());
    }

    #[test]
    fn settings_tag_tracks_what_changes_results() {
        let backend: Arc<dyn PdfBackend> = Arc::new(MockPdfBackend::new());
        let plain = Orchestrator::new(backend.clone());
        let with_llm = Orchestrator::new(backend)
            .with_llm(Arc::new(MockLlm::text("A report.")), None);
        let config = Config::default();
        let offline = Config {
            llm_enabled: false,
            ..Config::default()
        };
        let more_pages = Config {
            max_pages: config.max_pages + 2,
            ..Config::default()
        };

        assert_ne!(with_llm.cache_settings(&config), plain.cache_settings(&config));
        assert_eq!(with_llm.cache_settings(&offline), plain.cache_settings(&config));
        assert_ne!(plain.cache_settings(&more_pages), plain.cache_settings(&config));
        assert!(with_llm.cache_settings(&config).contains("llm=mock"));
    }

    #[tokio::test]
    async fn hit_returns_stored_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pdf(&dir, "scan.pdf", b"scan");
        let backend = MockPdfBackend::new().with_document(
            &path,
            vec![MockPage::text("Boletín Oficial, 12 de marzo de 2021"), MockPage::image_only()],
        );
        let orch = Orchestrator::new(Arc::new(backend))
            .with_cache(Arc::new(ResultCache::in_memory("t")));
        let config = Config {
            ocr_enabled: false,
            ..Config::default()
        };

        let first = orch.process(&path, &config, &JobContext::silent()).await;
        let second = orch.process(&path, &config, &JobContext::silent()).await;

        assert!(second.cached);
        assert!(!first.warnings.is_empty());
        assert_eq!(second.warnings, first.warnings);
    }

    #[tokio::test]
    async fn failed_model_call_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pdf(&dir, "a.pdf", b"doc-a");
        let backend = MockPdfBackend::new()
            .with_document(&path, vec![MockPage::text("Annual Report, March 15, 2023")]);
        let down = Arc::new(AtomicBool::new(true));
        let flag = down.clone();
        let llm = Arc::new(MockLlm::responder(move |prompt| {
            if flag.load(Ordering::SeqCst) {
                MockReply::Api(401, "invalid api key".into())
            } else if prompt.starts_with("Extract the following metadata") {
                MockReply::Text(r#"{"title": null, "volume_issue": null}"#.into())
            } else {
                MockReply::Text("A report.".into())
            }
        }));
        let cache = Arc::new(ResultCache::in_memory("t"));
        let orch = Orchestrator::new(Arc::new(backend))
            .with_llm(llm, None)
            .with_cache(cache.clone());

        let first = orch.process(&path, &Config::default(), &JobContext::silent()).await;
        assert!(first.result.description.is_empty());
        assert!(cache.is_empty());

        down.store(false, Ordering::SeqCst);
        let second = orch.process(&path, &Config::default(), &JobContext::silent()).await;
        assert!(!second.cached);
        assert_eq!(second.result.description.value(), Some("A report."));
    }
}
