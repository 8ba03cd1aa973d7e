use std::io::Write;
use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use folio_core::{BatchSummary, CacheStats, DocumentRecord, Warning};
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One JSON array holding every record
    Json,
    /// One record per line
    Ndjson,
}

/// Streams records as they complete.
///
/// In `json` mode the array is opened by [`RecordWriter::begin`] and closed by
/// [`RecordWriter::finish`], so the output stays a valid document as long as
/// `finish` runs, however many records were written.
pub struct RecordWriter<W: Write> {
    inner: W,
    format: OutputFormat,
    written: usize,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W, format: OutputFormat) -> Self {
        Self {
            inner,
            format,
            written: 0,
        }
    }

    pub fn begin(&mut self) -> std::io::Result<()> {
        if self.format == OutputFormat::Json {
            self.inner.write_all(b"[")?;
        }
        Ok(())
    }

    pub fn write(&mut self, record: &DocumentRecord) -> std::io::Result<()> {
        match self.format {
            OutputFormat::Json => {
                let sep: &[u8] = if self.written == 0 { b"\n" } else { b",\n" };
                self.inner.write_all(sep)?;
                serde_json::to_writer_pretty(&mut self.inner, record)?;
            }
            OutputFormat::Ndjson => {
                serde_json::to_writer(&mut self.inner, record)?;
                self.inner.write_all(b"\n")?;
            }
        }
        self.written += 1;
        self.inner.flush()
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn finish(mut self) -> std::io::Result<W> {
        if self.format == OutputFormat::Json {
            if self.written > 0 {
                self.inner.write_all(b"\n")?;
            }
            self.inner.write_all(b"]\n")?;
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// One line for a warning raised while a document was processed.
pub fn format_warning(path: &Path, warning: &Warning, color: ColorMode) -> String {
    let line = format!("{}: {}", file_label(path), warning);
    if color.enabled() {
        format!("{} {}", "warning:".yellow().bold(), line)
    } else {
        format!("warning: {line}")
    }
}

/// One line for a document that produced no result.
pub fn format_failure(record: &DocumentRecord, color: ColorMode) -> Option<String> {
    let reason = record.error.as_deref()?;
    let detail = record.error_detail.as_deref().unwrap_or(reason);
    let line = format!("{}: {}", file_label(&record.path), detail);
    Some(if color.enabled() {
        format!("{} {}", "error:".red().bold(), line)
    } else {
        format!("error: {line}")
    })
}

/// Print the end-of-run summary.
pub fn print_summary(
    w: &mut dyn Write,
    summary: &BatchSummary,
    cache: Option<&CacheStats>,
    elapsed: Duration,
    color: ColorMode,
) -> std::io::Result<()> {
    let heading = format!(
        "Processed {} document{} in {:.1}s",
        summary.total,
        if summary.total == 1 { "" } else { "s" },
        elapsed.as_secs_f64()
    );
    if color.enabled() {
        writeln!(w, "{}", heading.bold())?;
        writeln!(w, "  {} {}", "succeeded:".green(), summary.succeeded)?;
        if summary.failed > 0 {
            writeln!(w, "  {} {}", "failed:".red(), summary.failed)?;
        } else {
            writeln!(w, "  failed: 0")?;
        }
        if summary.cancelled > 0 {
            writeln!(w, "  {} {}", "cancelled:".yellow(), summary.cancelled)?;
        }
        if summary.with_warnings > 0 {
            writeln!(w, "  {} {}", "with warnings:".yellow(), summary.with_warnings)?;
        }
    } else {
        writeln!(w, "{heading}")?;
        writeln!(w, "  succeeded: {}", summary.succeeded)?;
        writeln!(w, "  failed: {}", summary.failed)?;
        if summary.cancelled > 0 {
            writeln!(w, "  cancelled: {}", summary.cancelled)?;
        }
        if summary.with_warnings > 0 {
            writeln!(w, "  with warnings: {}", summary.with_warnings)?;
        }
    }

    let cache_line = match cache {
        Some(stats) => format!(
            "  cache: {} hit{}, {} miss{}, {} stale",
            stats.hits,
            if stats.hits == 1 { "" } else { "s" },
            stats.misses,
            if stats.misses == 1 { "" } else { "es" },
            stats.stale
        ),
        None => format!("  cache: {} from previous runs", summary.cached),
    };
    if color.enabled() {
        writeln!(w, "{}", cache_line.dimmed())?;
    } else {
        writeln!(w, "{cache_line}")?;
    }
    Ok(())
}

/// Print `folio cache stats`.
pub fn print_cache_stats(
    w: &mut dyn Write,
    path: &Path,
    version: &str,
    stats: &CacheStats,
    color: ColorMode,
) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(w, "{} {}", "Cache:".bold(), path.display())?;
    } else {
        writeln!(w, "Cache: {}", path.display())?;
    }
    writeln!(w, "  pipeline version: {version}")?;
    writeln!(w, "  stored results:   {}", stats.disk_entries)?;
    Ok(())
}
