use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::model::DocumentRecord;
use crate::orchestrator::{Orchestrator, ProgressEvent, ProgressFn};
use crate::pool::{BatchJob, BatchPool};
use crate::Config;

/// Process every path in `paths` and hand each record to `on_record` as it
/// completes.
///
/// Creates an internal [`BatchPool`] with `config.num_workers` workers.
/// Records arrive in completion order, not submission order. Exactly one
/// record is produced per input path, including after cancellation.
pub async fn run_batch(
    paths: Vec<PathBuf>,
    config: Config,
    orchestrator: Arc<Orchestrator>,
    progress: impl Fn(ProgressEvent) + Send + Sync + 'static,
    cancel: CancellationToken,
    mut on_record: impl FnMut(DocumentRecord),
) -> BatchSummary {
    let total = paths.len();
    let mut summary = BatchSummary {
        total,
        ..BatchSummary::default()
    };
    if total == 0 {
        return summary;
    }

    let num_workers = config.num_workers.max(1);
    let config = Arc::new(config);
    let progress: ProgressFn = Arc::new(progress);

    let pool = BatchPool::new(orchestrator, cancel.clone(), num_workers);
    tracing::info!(documents = total, workers = num_workers, "batch started");

    let mut pending = FuturesUnordered::new();
    for (index, path) in paths.into_iter().enumerate() {
        let (result_tx, result_rx) = oneshot::channel();
        pool.submit(BatchJob {
            path: path.clone(),
            config: config.clone(),
            index,
            total,
            progress: progress.clone(),
            result_tx,
        })
        .await;
        pending.push(async move { (path, result_rx.await) });
    }

    while let Some((path, received)) = pending.next().await {
        let record = received.unwrap_or_else(|_| {
            // The worker dropped the job without answering.
            DocumentRecord::failed(
                &path,
                None,
                &PipelineError::WorkerPanicked("job dropped without a result".into()),
                Vec::new(),
            )
        });
        summary.record(&record);
        on_record(record);
    }

    pool.shutdown().await;
    tracing::info!(
        documents = summary.total,
        failed = summary.failed,
        cached = summary.cached,
        cancelled = summary.cancelled,
        "batch finished"
    );
    summary
}

/// Process every path and collect the records in completion order.
pub async fn process_documents(
    paths: Vec<PathBuf>,
    config: Config,
    orchestrator: Arc<Orchestrator>,
    progress: impl Fn(ProgressEvent) + Send + Sync + 'static,
    cancel: CancellationToken,
) -> Vec<DocumentRecord> {
    let mut records = Vec::with_capacity(paths.len());
    run_batch(paths, config, orchestrator, progress, cancel, |r| {
        records.push(r)
    })
    .await;
    records
}

/// Counts for the end-of-run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub cached: usize,
    pub with_warnings: usize,
}

impl BatchSummary {
    fn record(&mut self, record: &DocumentRecord) {
        match record.error.as_deref() {
            None => self.succeeded += 1,
            Some(reason) if reason == PipelineError::Cancelled.reason() => self.cancelled += 1,
            Some(_) => self.failed += 1,
        }
        if record.cached {
            self.cached += 1;
        }
        if !record.warnings.is_empty() {
            self.with_warnings += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockPage, MockPdfBackend};

    #[tokio::test]
    async fn empty_input_returns_immediately() {
        let orch = Arc::new(Orchestrator::new(Arc::new(MockPdfBackend::new())));
        let records =
            process_documents(vec![], Config::default(), orch, |_| {}, CancellationToken::new())
                .await;
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn summary_counts_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.pdf");
        let bad = dir.path().join("bad.pdf");
        std::fs::write(&good, b"good").unwrap();
        std::fs::write(&bad, b"bad").unwrap();
        let backend = MockPdfBackend::new()
            .with_document(&good, vec![MockPage::text("Annual Report, March 15, 2023")])
            .with_corrupt(&bad, "not a PDF");
        let orch = Arc::new(Orchestrator::new(Arc::new(backend)));

        let mut seen = Vec::new();
        let summary = run_batch(
            vec![good.clone(), bad.clone()],
            Config::default(),
            orch,
            |_| {},
            CancellationToken::new(),
            |r| seen.push(r.path),
        )
        .await;

        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        seen.sort();
        let mut expected = vec![good, bad];
        expected.sort();
        assert_eq!(seen, expected);
    }
}
