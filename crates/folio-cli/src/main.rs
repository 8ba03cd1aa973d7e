use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use folio_core::{Config, ProgressEvent, ResultCache};

mod output;

use output::{ColorMode, OutputFormat, RecordWriter};

/// Folio - Extract title, date, volume/issue and a description from PDFs
#[derive(Parser, Debug)]
#[command(name = "folio", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract metadata from a PDF or a directory of PDFs
    Extract(ExtractArgs),

    /// Inspect or empty the result cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,

        /// Path to the cache database
        #[arg(long, global = true)]
        cache: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Show where the cache lives and how many results it holds
    Stats,
    /// Delete every cached result
    Clear,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// PDF file or directory to process
    input: PathBuf,

    /// Write records to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Number of documents processed concurrently
    #[arg(short, long)]
    workers: Option<usize>,

    /// Descend into subdirectories
    #[arg(long)]
    recursive: bool,

    /// Pages read per document
    #[arg(long)]
    max_pages: Option<usize>,

    /// Pages with fewer non-whitespace characters than this are OCRed
    #[arg(long)]
    ocr_threshold: Option<usize>,

    /// Never run OCR
    #[arg(long)]
    no_ocr: bool,

    /// Tesseract language(s), e.g. "spa+eng"
    #[arg(long)]
    ocr_lang: Option<String>,

    /// Never call the language model
    #[arg(long)]
    no_llm: bool,

    /// Language model name
    #[arg(long)]
    model: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long)]
    llm_endpoint: Option<String>,

    /// Path to the cache database
    #[arg(long, conflicts_with = "no_cache")]
    cache: Option<PathBuf>,

    /// Keep results in memory for this run only
    #[arg(long)]
    no_cache: bool,

    /// Recompute every document, ignoring cached results
    #[arg(long)]
    refresh: bool,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// No progress bar or summary
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Extract(args) => {
            let log_file = args
                .log_file
                .clone()
                .or_else(|| env_var("FOLIO_LOG_FILE").map(PathBuf::from));
            let _guard = init_tracing(log_file.as_deref())?;
            extract(args).await
        }
        Command::Cache { action, cache } => {
            let _guard = init_tracing(None)?;
            cache_command(action, cache)
        }
    }
}

/// Install the stderr log layer and, when `log_file` is set, a plain-text
/// file layer. The returned guard flushes the file writer on drop.
fn init_tracing(
    log_file: Option<&Path>,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let Some(file_name) = path.file_name() else {
                anyhow::bail!("log file path has no file name: {}", path.display());
            };
            std::fs::create_dir_all(&dir)?;
            let appender = tracing_appender::rolling::never(&dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(file_filter);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(guard)
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn default_cache_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("folio").join("results.db"))
}

/// Environment overrides, read through `lookup` so tests need not touch the
/// process environment.
fn apply_env(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(key) = lookup("FOLIO_LLM_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
        config.llm_api_key = Some(key);
    }
    if let Some(model) = lookup("FOLIO_LLM_MODEL") {
        config.llm_model = Some(model);
    }
    if let Some(endpoint) = lookup("FOLIO_LLM_ENDPOINT") {
        config.llm_endpoint = Some(endpoint);
    }
    if let Some(workers) = lookup("FOLIO_WORKERS").and_then(|v| v.parse().ok()) {
        config.num_workers = workers;
    }
    if let Some(path) = lookup("FOLIO_CACHE_PATH") {
        config.cache_path = Some(PathBuf::from(path));
    }
    if let Some(version) = lookup("FOLIO_PIPELINE_VERSION") {
        config.pipeline_version = version;
    }
}

fn apply_args(config: &mut Config, args: &ExtractArgs) {
    if let Some(workers) = args.workers {
        config.num_workers = workers.max(1);
    }
    if let Some(pages) = args.max_pages {
        config.max_pages = pages.max(1);
    }
    if let Some(threshold) = args.ocr_threshold {
        config.ocr_trigger_chars = threshold;
    }
    if args.no_ocr {
        config.ocr_enabled = false;
    }
    if let Some(lang) = &args.ocr_lang {
        config.ocr_language = lang.clone();
    }
    if args.no_llm {
        config.llm_enabled = false;
    }
    if let Some(model) = &args.model {
        config.llm_model = Some(model.clone());
    }
    if let Some(endpoint) = &args.llm_endpoint {
        config.llm_endpoint = Some(endpoint.clone());
    }
    if let Some(path) = &args.cache {
        config.cache_path = Some(path.clone());
    }
    config.refresh = args.refresh;
}

/// Configuration: CLI flags > env vars > config file > defaults.
fn resolve_config(args: &ExtractArgs) -> Config {
    let mut config = Config::default();
    folio_core::config_file::load_config().apply_to(&mut config);
    apply_env(&mut config, env_var);
    apply_args(&mut config, args);

    if args.no_cache {
        config.cache_path = None;
    } else if config.cache_path.is_none() {
        config.cache_path = default_cache_path();
    }
    config
}

async fn extract(args: ExtractArgs) -> anyhow::Result<()> {
    let config = resolve_config(&args);
    tracing::debug!(?config, "resolved configuration");

    let paths = folio_ingest::discover(&args.input, args.recursive)?;
    if paths.is_empty() {
        anyhow::bail!("No PDF files found in {}", args.input.display());
    }

    let orchestrator = std::sync::Arc::new(folio_ingest::build_orchestrator(&config)?);
    let cache = orchestrator.cache().cloned();

    let color = ColorMode(!args.no_color && std::io::stderr().is_terminal());
    let sink: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(std::io::BufWriter::new(std::fs::File::create(path)?)),
        None => Box::new(std::io::stdout().lock()),
    };
    let mut writer = RecordWriter::new(sink, args.format);
    writer.begin()?;

    let bar = if args.quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::with_draw_target(
            Some(paths.len() as u64),
            ProgressDrawTarget::stderr(),
        );
        if let Ok(style) =
            ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {elapsed_precise} {msg}")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    };

    let progress_cb = {
        let bar = bar.clone();
        let quiet = args.quiet;
        move |event: ProgressEvent| match event {
            ProgressEvent::Started { path, .. } => {
                bar.set_message(
                    path.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                );
            }
            ProgressEvent::Warning { path, warning, .. } if !quiet => {
                bar.println(output::format_warning(&path, &warning, color));
            }
            ProgressEvent::Finished { record, .. } => {
                if !quiet && let Some(line) = output::format_failure(&record, color) {
                    bar.println(line);
                }
                bar.inc(1);
            }
            _ => {}
        }
    };

    let cancel = CancellationToken::new();

    // Set up Ctrl+C handler
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_clone.cancel();
        }
    });

    let started = Instant::now();
    let mut write_error: Option<std::io::Error> = None;
    let summary = folio_core::run_batch(
        paths,
        config,
        orchestrator,
        progress_cb,
        cancel.clone(),
        |record| {
            if write_error.is_none()
                && let Err(e) = writer.write(&record)
            {
                write_error = Some(e);
            }
        },
    )
    .await;
    bar.finish_and_clear();

    // Close the document before reporting anything else.
    let closed = writer.finish();
    if let Some(e) = write_error {
        anyhow::bail!("failed writing results: {e}");
    }
    closed?;

    if !args.quiet {
        let mut err = std::io::stderr().lock();
        if cancel.is_cancelled() {
            writeln!(err, "Interrupted; unfinished documents were recorded as cancelled.")?;
        }
        let stats = cache.as_ref().map(|c| c.stats());
        output::print_summary(&mut err, &summary, stats.as_ref(), started.elapsed(), color)?;
    }
    Ok(())
}

fn cache_command(action: CacheAction, cache: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = Config::default();
    folio_core::config_file::load_config().apply_to(&mut config);
    apply_env(&mut config, env_var);

    let Some(path) = cache.or(config.cache_path).or_else(default_cache_path) else {
        anyhow::bail!("No cache location configured; pass --cache <PATH>");
    };
    let color = ColorMode(std::io::stdout().is_terminal());
    let mut out = std::io::stdout().lock();

    if !path.exists() {
        writeln!(out, "No cache at {}", path.display())?;
        return Ok(());
    }

    let cache = ResultCache::open(&path, config.pipeline_version.clone())?;
    match action {
        CacheAction::Stats => {
            output::print_cache_stats(&mut out, &path, cache.version(), &cache.stats(), color)?;
        }
        CacheAction::Clear => {
            let removed = cache
                .clear()
                .with_context(|| format!("failed to clear {}", path.display()))?;
            writeln!(out, "Removed {removed} cached result(s) from {}", path.display())?;
        }
    }
    Ok(())
}
