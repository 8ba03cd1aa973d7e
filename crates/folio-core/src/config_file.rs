use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Config;

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub llm: Option<LlmSection>,
    pub extraction: Option<ExtractionSection>,
    pub concurrency: Option<ConcurrencySection>,
    pub cache: Option<CacheSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmSection {
    pub enabled: Option<bool>,
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub description_max_tokens: Option<u32>,
    pub context_pages: Option<usize>,
    pub context_chars: Option<usize>,
    pub requests_per_second: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSection {
    pub max_pages: Option<usize>,
    pub ocr_trigger_chars: Option<usize>,
    pub max_page_chars: Option<usize>,
    pub ocr_enabled: Option<bool>,
    pub ocr_language: Option<String>,
    pub ocr_dpi: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencySection {
    pub num_workers: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSection {
    pub path: Option<String>,
    pub pipeline_version: Option<String>,
}

/// Platform config directory path: `<config_dir>/folio/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("folio").join("config.toml"))
}

/// Load config by cascading CWD `.folio.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".folio.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config file");
            None
        }
    }
}

/// Per-field overlay of two optional sections.
macro_rules! overlay_section {
    ($base:expr, $over:expr, $ty:ident { $($field:ident),* $(,)? }) => {{
        let base = $base.unwrap_or_default();
        let over = $over.unwrap_or_default();
        let merged = $ty {
            $($field: over.$field.or(base.$field),)*
        };
        if merged == $ty::default() { None } else { Some(merged) }
    }};
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        llm: overlay_section!(
            base.llm,
            overlay.llm,
            LlmSection {
                enabled,
                api_key,
                endpoint,
                model,
                timeout_secs,
                max_tokens,
                temperature,
                description_max_tokens,
                context_pages,
                context_chars,
                requests_per_second,
            }
        ),
        extraction: overlay_section!(
            base.extraction,
            overlay.extraction,
            ExtractionSection {
                max_pages,
                ocr_trigger_chars,
                max_page_chars,
                ocr_enabled,
                ocr_language,
                ocr_dpi,
            }
        ),
        concurrency: overlay_section!(
            base.concurrency,
            overlay.concurrency,
            ConcurrencySection { num_workers }
        ),
        cache: overlay_section!(
            base.cache,
            overlay.cache,
            CacheSection {
                path,
                pipeline_version
            }
        ),
    }
}

impl ConfigFile {
    /// Write every value present in the file onto `config`.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(llm) = &self.llm {
            set(&mut config.llm_enabled, llm.enabled);
            if llm.api_key.is_some() {
                config.llm_api_key = llm.api_key.clone();
            }
            if llm.endpoint.is_some() {
                config.llm_endpoint = llm.endpoint.clone();
            }
            if llm.model.is_some() {
                config.llm_model = llm.model.clone();
            }
            set(&mut config.llm_timeout_secs, llm.timeout_secs);
            set(&mut config.llm_max_tokens, llm.max_tokens);
            set(&mut config.llm_temperature, llm.temperature);
            set(&mut config.description_max_tokens, llm.description_max_tokens);
            set(&mut config.llm_context_pages, llm.context_pages);
            set(&mut config.llm_context_chars, llm.context_chars);
            set(&mut config.llm_requests_per_second, llm.requests_per_second);
        }
        if let Some(ext) = &self.extraction {
            set(&mut config.max_pages, ext.max_pages);
            set(&mut config.ocr_trigger_chars, ext.ocr_trigger_chars);
            set(&mut config.max_page_chars, ext.max_page_chars);
            set(&mut config.ocr_enabled, ext.ocr_enabled);
            set(&mut config.ocr_language, ext.ocr_language.clone());
            set(&mut config.ocr_dpi, ext.ocr_dpi);
        }
        if let Some(conc) = &self.concurrency {
            set(&mut config.num_workers, conc.num_workers);
        }
        if let Some(cache) = &self.cache {
            if let Some(path) = &cache.path {
                config.cache_path = Some(PathBuf::from(path));
            }
            set(&mut config.pipeline_version, cache.pipeline_version.clone());
        }
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}
