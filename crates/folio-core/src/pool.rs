//! Fixed-size worker pool for document jobs.
//!
//! Workers pull [`BatchJob`]s from a shared MPMC queue. Each job runs inside
//! its own spawned task, so a panic while processing one document becomes a
//! `worker_panicked` record for that document and the worker moves on.

use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::model::DocumentRecord;
use crate::orchestrator::{JobContext, Orchestrator, ProgressEvent, ProgressFn};
use crate::Config;

/// One document submitted to the pool, with the configuration snapshot it
/// runs under.
pub struct BatchJob {
    pub path: PathBuf,
    pub config: Arc<Config>,
    pub index: usize,
    pub total: usize,
    pub progress: ProgressFn,
    pub result_tx: oneshot::Sender<DocumentRecord>,
}

/// A pool of worker tasks processing [`BatchJob`]s.
///
/// Submit jobs via [`submit()`](BatchPool::submit), receive results via the
/// oneshot receiver sent with each job.
pub struct BatchPool {
    job_tx: async_channel::Sender<BatchJob>,
    pool_handle: JoinHandle<()>,
}

impl BatchPool {
    /// Create a new pool with `num_workers` worker tasks (at least one).
    ///
    /// After `cancel` fires, workers keep draining the queue but answer every
    /// job they have not started with a `cancelled` record.
    pub fn new(orchestrator: Arc<Orchestrator>, cancel: CancellationToken, num_workers: usize) -> Self {
        let (job_tx, job_rx) = async_channel::unbounded::<BatchJob>();

        let pool_handle = tokio::spawn(async move {
            let mut handles = Vec::with_capacity(num_workers.max(1));
            for worker in 0..num_workers.max(1) {
                handles.push(tokio::spawn(worker_loop(
                    worker,
                    job_rx.clone(),
                    orchestrator.clone(),
                    cancel.clone(),
                )));
            }

            // Workers hold the only receivers now; they exit once the
            // sender side closes and the queue is empty.
            drop(job_rx);

            for h in handles {
                let _ = h.await;
            }
        });

        Self {
            job_tx,
            pool_handle,
        }
    }

    /// Get a cloneable sender for submitting jobs from multiple tasks.
    pub fn sender(&self) -> async_channel::Sender<BatchJob> {
        self.job_tx.clone()
    }

    /// Submit a job to the pool.
    pub async fn submit(&self, job: BatchJob) {
        if let Err(async_channel::SendError(job)) = self.job_tx.send(job).await {
            // Only possible after shutdown; answer instead of dropping.
            let record = DocumentRecord::failed(&job.path, None, &PipelineError::Cancelled, Vec::new());
            let _ = job.result_tx.send(record);
        }
    }

    /// Close the queue and wait for every worker to finish.
    pub async fn shutdown(self) {
        self.job_tx.close();
        let _ = self.pool_handle.await;
    }
}

async fn worker_loop(
    worker: usize,
    rx: async_channel::Receiver<BatchJob>,
    orchestrator: Arc<Orchestrator>,
    cancel: CancellationToken,
) {
    while let Ok(job) = rx.recv().await {
        let BatchJob {
            path,
            config,
            index,
            total,
            progress,
            result_tx,
        } = job;

        let record = if cancel.is_cancelled() {
            tracing::debug!(worker, path = %path.display(), "skipping: cancelled");
            DocumentRecord::failed(&path, None, &PipelineError::Cancelled, Vec::new())
        } else {
            let ctx = JobContext::new(index, total, progress.clone());
            run_isolated(orchestrator.clone(), path.clone(), config, ctx).await
        };

        progress(ProgressEvent::Finished {
            index,
            total,
            record: Box::new(record.clone()),
        });
        let _ = result_tx.send(record);
    }
    tracing::trace!(worker, "worker exiting");
}

/// Run one document in its own task so a panic stays contained.
async fn run_isolated(
    orchestrator: Arc<Orchestrator>,
    path: PathBuf,
    config: Arc<Config>,
    ctx: JobContext,
) -> DocumentRecord {
    let task_path = path.clone();
    let handle =
        tokio::spawn(async move { orchestrator.process(&task_path, &config, &ctx).await });
    match handle.await {
        Ok(record) => record,
        Err(e) => {
            let error = PipelineError::WorkerPanicked(join_error_message(e));
            tracing::error!(path = %path.display(), error = %error, "document task aborted");
            DocumentRecord::failed(&path, None, &error, Vec::new())
        }
    }
}

fn join_error_message(e: JoinError) -> String {
    if e.is_panic() {
        panic_message(e.into_panic())
    } else {
        e.to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, PdfBackend, PdfDocument};
    use crate::mock::{MockPage, MockPdfBackend};
    use std::path::Path;
    use std::sync::Mutex;

    /// Backend that panics on open, standing in for a buggy native library.
    struct PanickingBackend;

    impl PdfBackend for PanickingBackend {
        fn open(&self, _path: &Path) -> Result<Box<dyn PdfDocument>, BackendError> {
            panic!("simulated backend crash");
        }
    }

    fn job(
        path: PathBuf,
        index: usize,
        total: usize,
        progress: ProgressFn,
    ) -> (BatchJob, oneshot::Receiver<DocumentRecord>) {
        let (result_tx, result_rx) = oneshot::channel();
        (
            BatchJob {
                path,
                config: Arc::new(Config::default()),
                index,
                total,
                progress,
                result_tx,
            },
            result_rx,
        )
    }

    fn noop() -> ProgressFn {
        Arc::new(|_| {})
    }

    #[test]
    fn panic_payloads_are_readable() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(42u8)), "unknown panic");
    }

    #[tokio::test]
    async fn processes_jobs_and_emits_finished() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.pdf");
        std::fs::write(&path, b"a").unwrap();
        let backend = MockPdfBackend::new()
            .with_document(&path, vec![MockPage::text("Annual Report, March 15, 2023")]);
        let pool = BatchPool::new(
            Arc::new(Orchestrator::new(Arc::new(backend))),
            CancellationToken::new(),
            2,
        );

        let finished = Arc::new(Mutex::new(0usize));
        let counter = finished.clone();
        let progress: ProgressFn = Arc::new(move |e| {
            if matches!(e, ProgressEvent::Finished { .. }) {
                *counter.lock().unwrap() += 1;
            }
        });

        let (job, rx) = job(path.clone(), 0, 1, progress);
        pool.submit(job).await;
        let record = rx.await.unwrap();
        pool.shutdown().await;

        assert!(!record.is_failed());
        assert_eq!(record.path, path);
        assert_eq!(*finished.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn panic_becomes_record_and_worker_survives() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.pdf");
        let b = dir.path().join("b.pdf");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();
        let pool = BatchPool::new(
            Arc::new(Orchestrator::new(Arc::new(PanickingBackend))),
            CancellationToken::new(),
            1,
        );

        let (job_a, rx_a) = job(a, 0, 2, noop());
        let (job_b, rx_b) = job(b, 1, 2, noop());
        pool.submit(job_a).await;
        pool.submit(job_b).await;

        let ra = rx_a.await.unwrap();
        let rb = rx_b.await.unwrap();
        pool.shutdown().await;

        assert_eq!(ra.error.as_deref(), Some("worker_panicked"));
        assert_eq!(rb.error.as_deref(), Some("worker_panicked"));
        assert!(ra.error_detail.unwrap().contains("simulated backend crash"));
    }

    #[tokio::test]
    async fn cancelled_pool_answers_every_job() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let backend = Arc::new(MockPdfBackend::new());
        let pool = BatchPool::new(
            Arc::new(Orchestrator::new(backend.clone())),
            cancel,
            2,
        );

        let mut receivers = Vec::new();
        for i in 0..5 {
            let (j, rx) = job(PathBuf::from(format!("/tmp/doc{i}.pdf")), i, 5, noop());
            pool.submit(j).await;
            receivers.push(rx);
        }
        for rx in receivers {
            let record = rx.await.unwrap();
            assert_eq!(record.error.as_deref(), Some("cancelled"));
        }
        pool.shutdown().await;
        assert_eq!(backend.open_count(), 0);
    }
}
