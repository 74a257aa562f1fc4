//! Asynchronous ingestion queue with debounced batch processing.
//!
//! Submissions are accepted from any number of concurrent producers; one
//! owned worker task coalesces bursts behind a debounce deadline and drains
//! the queue in bounded sequential batches, so a phone dumping forty photos
//! costs a handful of batch runs instead of forty. Jobs are transient: they
//! live in memory only, and a restart re-derives pending work from the
//! originals directory.

use crate::capture;
use crate::config::IngestConfig;
use crate::content_store::{ContentStore, StoreError};
use crate::identity::ContentIdentity;
use crate::library::PhotoLibrary;
use crate::metadata_store::ImageRecord;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Errors surfaced synchronously to submitters. Everything that happens
/// after acceptance is fire-and-forget from the producer's point of view.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("unsupported image format: {0:?}")]
    UnsupportedFormat(String),

    #[error("empty submission")]
    Empty,

    #[error("failed to persist raw submission: {0}")]
    Storage(#[from] std::io::Error),

    #[error("ingestion queue is shut down")]
    QueueClosed,
}

/// One queued submission, consumed exactly once by the batch worker.
#[derive(Debug, Clone)]
pub struct IngestionJob {
    /// Correlation id for log lines.
    pub id: Uuid,
    /// Raw bytes as persisted in the originals directory.
    pub raw_path: PathBuf,
    /// Label of the submitting source (upload or attachment file name).
    pub source_label: String,
    /// Subject line, possibly empty (email ingestion path).
    pub subject: String,
    pub submitted_at: DateTime<Utc>,
}

/// Snapshot of queue state for operational introspection.
#[derive(Debug, Clone)]
pub struct QueueStatus {
    pub queue_size: usize,
    pub is_processing: bool,
    pub upload_in_progress: bool,
    pub timer_active: bool,
    pub debounce: Duration,
    pub batch_size: usize,
}

struct QueueShared {
    pending: Mutex<VecDeque<IngestionJob>>,
    /// Number of raw-byte writes currently in flight. The worker defers a
    /// firing deadline while this is non-zero so it never reads a
    /// partially written source.
    uploads_active: AtomicUsize,
    processing: AtomicBool,
    timer_active: AtomicBool,
}

/// Producer handle for the ingestion queue. Cheap to clone; dropping the
/// last handle shuts the worker down after a final drain.
#[derive(Clone)]
pub struct IngestionQueue {
    shared: Arc<QueueShared>,
    originals_dir: PathBuf,
    debounce: Duration,
    batch_size: usize,
    wake: mpsc::UnboundedSender<()>,
}

impl IngestionQueue {
    /// Spawn the batch worker and return the producer handle.
    pub fn start(
        config: &IngestConfig,
        originals_dir: PathBuf,
        library: Arc<PhotoLibrary>,
    ) -> (Self, JoinHandle<()>) {
        let shared = Arc::new(QueueShared {
            pending: Mutex::new(VecDeque::new()),
            uploads_active: AtomicUsize::new(0),
            processing: AtomicBool::new(false),
            timer_active: AtomicBool::new(false),
        });

        let (wake, wake_rx) = mpsc::unbounded_channel();

        let worker = BatchWorker {
            shared: shared.clone(),
            library,
            debounce: config.debounce(),
            batch_size: config.batch_size,
            batch_pause: config.batch_pause(),
        };
        let handle = tokio::spawn(worker.run(wake_rx));

        let queue = Self {
            shared,
            originals_dir,
            debounce: config.debounce(),
            batch_size: config.batch_size,
            wake,
        };
        (queue, handle)
    }

    /// Submit raw image bytes for ingestion.
    ///
    /// Acceptance is synchronous: the raw bytes are durably written to the
    /// originals directory before this returns, and only queue-level
    /// failures (unsupported format, storage) are reported here. When an
    /// accepted submission later fails to materialize, it is logged and
    /// skipped without reaching the submitter.
    pub async fn submit(&self, bytes: Bytes, source_label: &str) -> Result<(), SubmitError> {
        self.submit_with_subject(bytes, source_label, "").await
    }

    /// Submit with a subject line (email ingestion path).
    pub async fn submit_with_subject(
        &self,
        bytes: Bytes,
        source_label: &str,
        subject: &str,
    ) -> Result<(), SubmitError> {
        if self.wake.is_closed() {
            return Err(SubmitError::QueueClosed);
        }
        if bytes.is_empty() {
            return Err(SubmitError::Empty);
        }
        if !ContentStore::is_supported(source_label) {
            return Err(SubmitError::UnsupportedFormat(source_label.to_string()));
        }

        // Mark the upload window so a firing debounce deadline defers to us.
        let _upload = UploadGuard::begin(&self.shared);
        let raw_path = self.write_raw(&bytes, source_label).await?;

        let job = IngestionJob {
            id: Uuid::new_v4(),
            raw_path,
            source_label: source_label.to_string(),
            subject: subject.to_string(),
            submitted_at: Utc::now(),
        };
        debug!(job = %job.id, source = %job.source_label, "submission accepted");

        self.enqueue(job)
    }

    /// Queue an already-persisted raw file without re-writing it (startup
    /// reconciliation of originals whose artifact is missing).
    pub fn enqueue_existing(
        &self,
        raw_path: PathBuf,
        source_label: &str,
    ) -> Result<(), SubmitError> {
        if self.wake.is_closed() {
            return Err(SubmitError::QueueClosed);
        }
        if !ContentStore::is_supported(source_label) {
            return Err(SubmitError::UnsupportedFormat(source_label.to_string()));
        }

        self.enqueue(IngestionJob {
            id: Uuid::new_v4(),
            raw_path,
            source_label: source_label.to_string(),
            subject: String::new(),
            submitted_at: Utc::now(),
        })
    }

    fn enqueue(&self, job: IngestionJob) -> Result<(), SubmitError> {
        self.shared.pending.lock().push_back(job);
        self.shared.timer_active.store(true, Ordering::SeqCst);
        self.wake.send(()).map_err(|_| SubmitError::QueueClosed)
    }

    /// Snapshot of the queue for status endpoints and diagnostics.
    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            queue_size: self.shared.pending.lock().len(),
            is_processing: self.shared.processing.load(Ordering::SeqCst),
            upload_in_progress: self.shared.uploads_active.load(Ordering::SeqCst) > 0,
            timer_active: self.shared.timer_active.load(Ordering::SeqCst),
            debounce: self.debounce,
            batch_size: self.batch_size,
        }
    }

    /// Persist raw bytes under a sanitized, collision-free name.
    async fn write_raw(&self, bytes: &[u8], source_label: &str) -> Result<PathBuf, std::io::Error> {
        tokio::fs::create_dir_all(&self.originals_dir).await?;

        let name = sanitize_file_name(source_label);
        let mut path = self.originals_dir.join(&name);

        // Distinct uploads that happen to share a name live side by side.
        let stem = Path::new(&name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("upload")
            .to_string();
        let ext = Path::new(&name)
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("bin")
            .to_string();
        let mut counter = 1u32;
        while tokio::fs::try_exists(&path).await.unwrap_or(false) {
            path = self.originals_dir.join(format!("{stem}_{counter}.{ext}"));
            counter += 1;
        }

        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

/// RAII marker for an in-flight raw-byte write.
struct UploadGuard<'a> {
    shared: &'a QueueShared,
}

impl<'a> UploadGuard<'a> {
    fn begin(shared: &'a QueueShared) -> Self {
        shared.uploads_active.fetch_add(1, Ordering::SeqCst);
        Self { shared }
    }
}

impl Drop for UploadGuard<'_> {
    fn drop(&mut self) {
        self.shared.uploads_active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Replace anything outside a conservative filename alphabet, keeping the
/// extension so format detection still works downstream.
fn sanitize_file_name(name: &str) -> String {
    let name = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");

    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

#[derive(Debug, Error)]
enum JobError {
    #[error("failed to read raw submission: {0}")]
    Read(std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The single batch-processing task. Only one batch runs at a time by
/// construction: this worker owns the drain loop outright.
struct BatchWorker {
    shared: Arc<QueueShared>,
    library: Arc<PhotoLibrary>,
    debounce: Duration,
    batch_size: usize,
    batch_pause: Duration,
}

impl BatchWorker {
    /// Worker loop. Every wake message resets the debounce deadline
    /// (cancel-then-restart); the queue is drained only once a full
    /// quiescence window passes with no new submissions.
    async fn run(self, mut wake: mpsc::UnboundedReceiver<()>) {
        info!(
            debounce_ms = self.debounce.as_millis() as u64,
            batch_size = self.batch_size,
            "ingestion worker started"
        );

        let mut deadline: Option<Instant> = None;
        loop {
            match deadline {
                None => match wake.recv().await {
                    Some(()) => deadline = Some(Instant::now() + self.debounce),
                    None => break,
                },
                Some(at) => {
                    tokio::select! {
                        msg = wake.recv() => match msg {
                            // A new submission pushes the run further out.
                            Some(()) => deadline = Some(Instant::now() + self.debounce),
                            None => break,
                        },
                        _ = sleep_until(at) => {
                            if self.shared.uploads_active.load(Ordering::SeqCst) > 0 {
                                // A raw write is mid-flight; wait out another
                                // full window rather than read a partial file.
                                debug!("upload in progress, deferring batch run");
                                deadline = Some(Instant::now() + self.debounce);
                            } else {
                                self.shared.timer_active.store(false, Ordering::SeqCst);
                                deadline = None;
                                self.drain().await;
                            }
                        }
                    }
                }
            }
        }

        // Producers are gone; settle whatever is left before exiting.
        self.drain().await;
        info!("ingestion worker stopped");
    }

    /// Drain the pending queue in bounded batches, pausing briefly between
    /// successive runs to bound burst CPU and I/O on constrained hardware.
    /// Jobs submitted while a batch is active land in a later run, never in
    /// the current one.
    async fn drain(&self) {
        loop {
            let batch: Vec<IngestionJob> = {
                let mut pending = self.shared.pending.lock();
                let take = pending.len().min(self.batch_size);
                pending.drain(..take).collect()
            };
            if batch.is_empty() {
                return;
            }

            self.shared.processing.store(true, Ordering::SeqCst);
            self.process_batch(batch).await;
            self.shared.processing.store(false, Ordering::SeqCst);

            if self.shared.pending.lock().is_empty() {
                return;
            }
            sleep(self.batch_pause).await;
        }
    }

    /// Process one batch sequentially, isolating per-item failures, then
    /// persist metadata and all indices once for the whole batch.
    async fn process_batch(&self, batch: Vec<IngestionJob>) {
        let batch_len = batch.len();
        let mut staged: Vec<(ContentIdentity, ImageRecord)> = Vec::with_capacity(batch_len);

        for job in batch {
            match self.process_job(&job).await {
                Ok(entry) => staged.push(entry),
                Err(e) => {
                    warn!(
                        job = %job.id,
                        source = %job.source_label,
                        error = %e,
                        "skipping failed submission"
                    );
                }
            }
        }

        info!(batch = batch_len, ingested = staged.len(), "batch settled");

        if let Err(e) = self.library.apply_batch(staged) {
            error!(error = %e, "failed to persist batch updates");
        }
    }

    async fn process_job(
        &self,
        job: &IngestionJob,
    ) -> Result<(ContentIdentity, ImageRecord), JobError> {
        let bytes = tokio::fs::read(&job.raw_path).await.map_err(JobError::Read)?;

        let materialized = self.library.content_store().materialize(&bytes)?;
        let attrs = capture::extract(&bytes);
        let record = ImageRecord::new(
            job.source_label.clone(),
            job.subject.clone(),
            job.submitted_at,
            attrs,
        );

        if materialized.created {
            debug!(job = %job.id, identity = %materialized.identity, "new artifact materialized");
        } else {
            debug!(job = %job.id, identity = %materialized.identity, "duplicate content, metadata refreshed");
        }

        Ok((materialized.identity, record))
    }
}
