//! Index coordinator: per-collection job queues, full and incremental runs.
//!
//! Every collection gets one worker task draining a FIFO channel, so two jobs
//! never write to the same collection at the same time while different
//! collections index in parallel. Job state lives in a [`JobRegistry`] and
//! per-file state in the change ledger; neither lock is held across a call
//! to the embedder or the vector store.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use quarry_llm::{EmbeddingProvider, LlmError};
use quarry_memory::{VectorPoint, VectorStore};
use serde::{Deserialize, Serialize};
use tokio::sync::{OnceCell, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::chunker::{Chunk, ChunkerConfig, chunk_file};
use crate::discovery::{FileFilter, normalize_relative};
use crate::error::{IndexError, Result};
use crate::jobs::{IndexReport, IndexingJob, JobRegistry, JobStatus, JobType};
use crate::keyword::KeywordIndexes;
use crate::points::{chunk_payload, point_id};
use crate::tracker::{ChangePolicy, ChangeTracker, LedgerStore, mtime_millis, sha256_hex};

/// Indexer configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Globs a file must match when non-empty.
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub max_file_size: u64,
    /// Chunks per embedding request.
    pub batch_size: usize,
    /// Collection dimension. Measured from one embedding when unset.
    pub vector_size: Option<u64>,
    pub change_policy: ChangePolicy,
    pub embed_timeout: Duration,
    pub store_timeout: Duration,
    /// How long a collection's worker waits for a job before exiting.
    pub worker_idle: Duration,
    pub chunker: ChunkerConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            max_file_size: 1024 * 1024,
            batch_size: 64,
            vector_size: None,
            change_policy: ChangePolicy::default(),
            embed_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(15),
            worker_idle: Duration::from_secs(60),
            chunker: ChunkerConfig::default(),
        }
    }
}

/// A normalized push or pull-request notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeEvent {
    pub repo: String,
    pub branch: String,
    pub commit: String,
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl ChangeEvent {
    /// `{repo}_{branch}`, with characters outside `[A-Za-z0-9_-]` replaced
    /// by `_`.
    #[must_use]
    pub fn default_collection(&self) -> String {
        format!("{}_{}", self.repo, self.branch)
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexingStats {
    pub total_files_indexed: usize,
    pub total_chunks_indexed: usize,
    pub queued_jobs: usize,
    pub active_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub collections: Vec<String>,
}

enum JobPlan {
    Full {
        repo_path: PathBuf,
        force_reindex: bool,
    },
    Incremental {
        repo_path: PathBuf,
        event: ChangeEvent,
    },
}

struct QueuedJob {
    job_id: String,
    collection: String,
    plan: JobPlan,
    cancel: CancellationToken,
}

struct Worker {
    id: u64,
    tx: mpsc::UnboundedSender<QueuedJob>,
    handle: JoinHandle<()>,
}

// Jobs are only sent while this lock is held.
type Workers = Arc<Mutex<HashMap<String, Worker>>>;

/// Schedules and runs indexing jobs.
pub struct IndexCoordinator {
    inner: Arc<Inner>,
    workers: Workers,
    closed: AtomicBool,
    seq: AtomicU64,
    worker_seq: AtomicU64,
}

struct Inner {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    tracker: ChangeTracker,
    jobs: Arc<dyn JobRegistry>,
    keyword: Arc<KeywordIndexes>,
    config: IndexerConfig,
    vector_size: OnceCell<u64>,
    cancels: Mutex<HashMap<String, CancellationToken>>,
    job_lock: tokio::sync::Mutex<()>,
    finished: watch::Sender<u64>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| IndexError::Other("coordinator lock poisoned".into()))
}

async fn timed<T, E, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    IndexError: From<E>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(IndexError::Timeout { operation }),
    }
}

impl IndexCoordinator {
    #[must_use]
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        ledger: Arc<dyn LedgerStore>,
        jobs: Arc<dyn JobRegistry>,
        keyword: Arc<KeywordIndexes>,
        config: IndexerConfig,
    ) -> Self {
        let (finished, _) = watch::channel(0);
        let tracker = ChangeTracker::new(ledger, config.change_policy);
        Self {
            inner: Arc::new(Inner {
                store,
                embedder,
                tracker,
                jobs,
                keyword,
                config,
                vector_size: OnceCell::new(),
                cancels: Mutex::new(HashMap::new()),
                job_lock: tokio::sync::Mutex::new(()),
                finished,
            }),
            workers: Arc::new(Mutex::new(HashMap::new())),
            closed: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            worker_seq: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn tracker(&self) -> &ChangeTracker {
        &self.inner.tracker
    }

    /// Queue a full index of `repo_path` into `collection`.
    ///
    /// With `force_reindex` the collection and its ledger entries are dropped
    /// first. Otherwise unchanged files are skipped and files that vanished
    /// since the last run are removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the job cannot be registered or the coordinator is
    /// shut down.
    pub async fn index_repository(
        &self,
        repo_path: impl AsRef<Path>,
        collection: &str,
        force_reindex: bool,
    ) -> Result<IndexingJob> {
        let mut job = self.new_job(collection, JobType::Full)?;
        job.repo = Some(repo_path.as_ref().display().to_string());
        let plan = JobPlan::Full {
            repo_path: repo_path.as_ref().to_path_buf(),
            force_reindex,
        };
        self.submit(job, plan).await
    }

    /// Queue an incremental update for a change event.
    ///
    /// `collection` defaults to [`ChangeEvent::default_collection`].
    ///
    /// # Errors
    ///
    /// Returns an error if the job cannot be registered or the coordinator is
    /// shut down.
    pub async fn incremental_index(
        &self,
        repo_path: impl AsRef<Path>,
        event: ChangeEvent,
        collection: Option<&str>,
    ) -> Result<IndexingJob> {
        let collection = collection.map_or_else(|| event.default_collection(), str::to_owned);
        let mut job = self.new_job(&collection, JobType::Incremental)?;
        job.repo = Some(event.repo.clone()).filter(|s| !s.is_empty());
        job.branch = Some(event.branch.clone()).filter(|s| !s.is_empty());
        job.commit = Some(event.commit.clone()).filter(|s| !s.is_empty());
        let plan = JobPlan::Incremental {
            repo_path: repo_path.as_ref().to_path_buf(),
            event,
        };
        self.submit(job, plan).await
    }

    /// # Errors
    ///
    /// Returns an error if the job registry cannot be read.
    pub async fn get_job_status(&self, job_id: &str) -> Result<Option<IndexingJob>> {
        self.inner.jobs.get(job_id).await
    }

    /// All jobs oldest first, or only queued and processing ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the job registry cannot be read.
    pub async fn list_jobs(&self, active_only: bool) -> Result<Vec<IndexingJob>> {
        let mut jobs = self.inner.jobs.list().await?;
        if active_only {
            jobs.retain(|j| !j.status.is_terminal());
        }
        Ok(jobs)
    }

    /// Cancel a job. A queued job fails immediately; a running job stops at
    /// its next file or batch boundary. Returns `false` for finished or
    /// unknown jobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the job registry cannot be accessed.
    pub async fn cancel_job(&self, job_id: &str) -> Result<bool> {
        let token = lock(&self.inner.cancels)?.get(job_id).cloned();
        let guard = self.inner.job_lock.lock().await;
        let Some(mut job) = self.inner.jobs.get(job_id).await? else {
            return Ok(false);
        };
        match job.status {
            JobStatus::Queued => {
                job.fail("cancelled".into(), IndexReport::default())?;
                self.inner.jobs.update(job).await?;
                drop(guard);
                if let Some(token) = token {
                    token.cancel();
                }
                self.inner.release(job_id);
                tracing::info!(job_id, "queued job cancelled");
                Ok(true)
            }
            JobStatus::Processing => {
                let Some(token) = token else {
                    return Ok(false);
                };
                token.cancel();
                tracing::info!(job_id, "cancellation requested");
                Ok(true)
            }
            JobStatus::Completed | JobStatus::Failed => Ok(false),
        }
    }

    /// Purge finished jobs older than `max_age`.
    ///
    /// # Errors
    ///
    /// Returns an error if the job registry cannot be updated.
    pub async fn cleanup_old_jobs(&self, max_age: Duration) -> Result<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| IndexError::Other(format!("invalid job retention: {e}")))?;
        let removed = self
            .inner
            .jobs
            .remove_finished_before(Utc::now() - max_age)
            .await?;
        if removed > 0 {
            tracing::info!(removed, "old jobs cleaned up");
        }
        Ok(removed)
    }

    /// # Errors
    ///
    /// Returns an error if the ledger or the job registry cannot be read.
    pub async fn stats(&self) -> Result<IndexingStats> {
        let summary = self.inner.tracker.ledger().summary().await?;
        let jobs = self.inner.jobs.list().await?;
        let count = |status: JobStatus| jobs.iter().filter(|j| j.status == status).count();
        Ok(IndexingStats {
            total_files_indexed: summary.files,
            total_chunks_indexed: summary.chunks,
            queued_jobs: count(JobStatus::Queued),
            active_jobs: count(JobStatus::Processing),
            completed_jobs: count(JobStatus::Completed),
            failed_jobs: count(JobStatus::Failed),
            collections: summary.collections,
        })
    }

    /// Resolve once the job has completed or failed.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::JobNotFound`] for unknown ids.
    pub async fn wait_for_job(&self, job_id: &str) -> Result<IndexingJob> {
        let mut finished = self.inner.finished.subscribe();
        loop {
            let job = self
                .get_job_status(job_id)
                .await?
                .ok_or_else(|| IndexError::JobNotFound(job_id.to_owned()))?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            if finished.changed().await.is_err() {
                return Err(IndexError::QueueClosed);
            }
        }
    }

    /// Fail jobs left queued or processing by a previous process.
    ///
    /// Call once at startup, before submitting new jobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the job registry cannot be accessed.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let mut recovered = 0;
        for mut job in self.list_jobs(true).await? {
            job.fail("interrupted by restart".into(), job.report.clone())?;
            self.inner.jobs.update(job).await?;
            recovered += 1;
        }
        if recovered > 0 {
            tracing::warn!(recovered, "interrupted jobs marked failed");
        }
        Ok(recovered)
    }

    /// Stop accepting jobs and wait for every queued job to finish.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let workers: Vec<(String, Worker)> = match self.workers.lock() {
            Ok(mut workers) => workers.drain().collect(),
            Err(_) => return,
        };
        for (collection, Worker { tx, handle, .. }) in workers {
            drop(tx);
            if let Err(e) = handle.await {
                tracing::warn!(collection, "collection worker ended abnormally: {e}");
            }
        }
        tracing::info!("index coordinator stopped");
    }

    fn new_job(&self, collection: &str, job_type: JobType) -> Result<IndexingJob> {
        if collection.trim().is_empty() {
            return Err(IndexError::Other("collection name must not be empty".into()));
        }
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let job_id = format!(
            "{}_{collection}_{}_{seq}",
            job_type.as_str(),
            Utc::now().timestamp_millis()
        );
        Ok(IndexingJob::new(job_id, collection.to_owned(), job_type))
    }

    async fn submit(&self, job: IndexingJob, plan: JobPlan) -> Result<IndexingJob> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(IndexError::QueueClosed);
        }
        self.inner.jobs.insert(job.clone()).await?;

        let cancel = CancellationToken::new();
        lock(&self.inner.cancels)?.insert(job.job_id.clone(), cancel.clone());

        let queued = QueuedJob {
            job_id: job.job_id.clone(),
            collection: job.collection.clone(),
            plan,
            cancel,
        };
        let sent = {
            let mut workers = lock(&self.workers)?;
            let worker = workers.entry(job.collection.clone()).or_insert_with(|| {
                spawn_worker(
                    Arc::clone(&self.inner),
                    Arc::clone(&self.workers),
                    job.collection.clone(),
                    self.worker_seq.fetch_add(1, Ordering::SeqCst),
                )
            });
            worker.tx.send(queued).is_ok()
        };
        if !sent {
            return Err(IndexError::QueueClosed);
        }

        tracing::info!(
            job_id = %job.job_id,
            collection = %job.collection,
            job_type = job.job_type.as_str(),
            "job queued"
        );
        Ok(job)
    }
}

fn spawn_worker(inner: Arc<Inner>, workers: Workers, collection: String, id: u64) -> Worker {
    let (tx, mut rx) = mpsc::unbounded_channel::<QueuedJob>();
    let idle = inner.config.worker_idle;
    let handle = tokio::spawn(async move {
        tracing::debug!(collection, "collection worker started");
        loop {
            match tokio::time::timeout(idle, rx.recv()).await {
                Ok(Some(job)) => inner.run_job(job).await,
                Ok(None) => break,
                Err(_) if retire(&workers, &collection, id, &rx) => break,
                Err(_) => {}
            }
        }
        tracing::debug!(collection, "collection worker stopped");
    });
    Worker { id, tx, handle }
}

/// Drop an idle worker's map entry so the next job spawns a fresh one.
///
/// Returns false when a job arrived in the meantime or the entry already
/// belongs to someone else (shutdown drained it, or a newer worker).
fn retire(
    workers: &Mutex<HashMap<String, Worker>>,
    collection: &str,
    id: u64,
    rx: &mpsc::UnboundedReceiver<QueuedJob>,
) -> bool {
    let Ok(mut workers) = workers.lock() else {
        return false;
    };
    if !rx.is_empty() || !workers.get(collection).is_some_and(|w| w.id == id) {
        return false;
    }
    workers.remove(collection);
    true
}

/// A file whose chunks are in flight. Its ledger record is written only once
/// every one of its batches has been stored.
struct PendingFile {
    rel_path: String,
    content_hash: String,
    mtime: i64,
    hashes: BTreeMap<String, String>,
    stale: Vec<String>,
    unflushed: usize,
    failed: bool,
}

/// Packs chunks from consecutive files into embedding batches.
struct BatchWriter<'a> {
    inner: &'a Inner,
    collection: &'a str,
    files: VecDeque<PendingFile>,
    /// Sequence number of `files[0]`.
    base: usize,
    buffer: Vec<(usize, Chunk)>,
}

impl<'a> BatchWriter<'a> {
    fn new(inner: &'a Inner, collection: &'a str) -> Self {
        Self {
            inner,
            collection,
            files: VecDeque::new(),
            base: 0,
            buffer: Vec::new(),
        }
    }

    async fn add(
        &mut self,
        mut file: PendingFile,
        to_embed: Vec<Chunk>,
        cancel: &CancellationToken,
        report: &mut IndexReport,
    ) -> Result<()> {
        let seq = self.base + self.files.len();
        file.unflushed = to_embed.len();
        self.files.push_back(file);
        for chunk in to_embed {
            self.buffer.push((seq, chunk));
            if self.buffer.len() >= self.inner.config.batch_size.max(1) {
                self.flush(cancel, report).await?;
            }
        }
        self.finalize_ready(report).await;
        Ok(())
    }

    async fn flush(&mut self, cancel: &CancellationToken, report: &mut IndexReport) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
        let batch = std::mem::take(&mut self.buffer);
        let chunks: Vec<&Chunk> = batch.iter().map(|(_, c)| c).collect();
        let outcome = self.inner.write_batch(self.collection, &chunks).await;

        if let Err(e) = &outcome {
            let mut files: Vec<&str> = batch.iter().map(|(_, c)| c.file_path.as_str()).collect();
            files.dedup();
            tracing::warn!(
                collection = self.collection,
                chunks = batch.len(),
                "batch failed: {e}"
            );
            report.errors.push(format!(
                "batch of {} chunks ({}): {e}",
                batch.len(),
                files.join(", ")
            ));
        } else {
            report.chunks_indexed += batch.len();
        }

        for (seq, _) in &batch {
            if let Some(file) = self.files.get_mut(seq - self.base) {
                file.unflushed = file.unflushed.saturating_sub(1);
                file.failed |= outcome.is_err();
            }
        }
        Ok(())
    }

    async fn finish(mut self, cancel: &CancellationToken, report: &mut IndexReport) -> Result<()> {
        self.flush(cancel, report).await?;
        self.finalize_ready(report).await;
        Ok(())
    }

    async fn finalize_ready(&mut self, report: &mut IndexReport) {
        while let Some(front) = self.files.front()
            && front.unflushed == 0
        {
            let Some(file) = self.files.pop_front() else {
                break;
            };
            self.base += 1;
            self.inner.finalize_file(self.collection, file, report).await;
        }
    }
}

impl Inner {
    async fn run_job(&self, queued: QueuedJob) {
        let QueuedJob {
            job_id,
            collection,
            plan,
            cancel,
        } = queued;

        if let Err(e) = self
            .update_job(&job_id, |j| j.transition(JobStatus::Processing))
            .await
        {
            tracing::debug!(job_id, "job not started: {e}");
            return;
        }
        tracing::info!(job_id, collection, "job started");

        let start = Instant::now();
        let mut report = IndexReport::default();
        let outcome = match &plan {
            JobPlan::Full {
                repo_path,
                force_reindex,
            } => {
                self.run_full(&job_id, &collection, repo_path, *force_reindex, &cancel, &mut report)
                    .await
            }
            JobPlan::Incremental { repo_path, event } => {
                self.run_incremental(&job_id, &collection, repo_path, event, &cancel, &mut report)
                    .await
            }
        };
        report.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let forced = matches!(plan, JobPlan::Full { force_reindex: true, .. });
        if forced || report.chunks_indexed > 0 || report.chunks_deleted > 0 {
            self.keyword.invalidate(&collection);
        }

        let recorded = match outcome {
            Ok(()) => {
                tracing::info!(
                    job_id,
                    collection,
                    files = report.files_indexed,
                    chunks = report.chunks_indexed,
                    deleted = report.chunks_deleted,
                    errors = report.errors.len(),
                    duration_ms = report.duration_ms,
                    "job completed"
                );
                self.update_job(&job_id, move |j| j.complete(report)).await
            }
            Err(e) => {
                tracing::warn!(job_id, collection, "job failed: {e}");
                let message = e.to_string();
                self.update_job(&job_id, move |j| j.fail(message, report)).await
            }
        };
        if let Err(e) = recorded {
            tracing::error!(job_id, "failed to record job outcome: {e}");
        }
        self.release(&job_id);
    }

    fn release(&self, job_id: &str) {
        if let Ok(mut cancels) = self.cancels.lock() {
            cancels.remove(job_id);
        }
        self.finished.send_modify(|n| *n = n.wrapping_add(1));
    }

    async fn update_job<F>(&self, job_id: &str, apply: F) -> Result<IndexingJob>
    where
        F: FnOnce(&mut IndexingJob) -> Result<()> + Send,
    {
        let _guard = self.job_lock.lock().await;
        let mut job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| IndexError::JobNotFound(job_id.to_owned()))?;
        apply(&mut job)?;
        self.jobs.update(job.clone()).await?;
        Ok(job)
    }

    async fn set_progress(&self, job_id: &str, done: usize, total: usize) {
        if done < total && done * 100 / total == (done - 1) * 100 / total {
            return;
        }
        let result = self
            .update_job(job_id, |j| {
                j.set_progress(done, total);
                Ok(())
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(job_id, "progress update failed: {e}");
        }
    }

    async fn vector_size(&self) -> Result<u64> {
        if let Some(size) = self.config.vector_size {
            return Ok(size);
        }
        let size = self
            .vector_size
            .get_or_try_init(|| async {
                let sample = timed(
                    "embedding dimension check",
                    self.config.embed_timeout,
                    self.embedder.embed_one("dimension"),
                )
                .await?;
                Ok::<u64, IndexError>(u64::try_from(sample.len())?)
            })
            .await?;
        Ok(*size)
    }

    async fn prepare_collection(&self, collection: &str) -> Result<()> {
        let size = self.vector_size().await?;
        timed(
            "ensure collection",
            self.config.store_timeout,
            self.store.ensure_collection(collection, size),
        )
        .await
    }

    fn file_filter(&self, repo_path: &Path) -> Result<FileFilter> {
        FileFilter::new(
            repo_path,
            &self.config.include,
            &self.config.exclude,
            self.config.max_file_size,
        )
    }

    async fn run_full(
        &self,
        job_id: &str,
        collection: &str,
        repo_path: &Path,
        force_reindex: bool,
        cancel: &CancellationToken,
        report: &mut IndexReport,
    ) -> Result<()> {
        let filter = self.file_filter(repo_path)?;
        let files = tokio::task::spawn_blocking(move || filter.discover())
            .await
            .map_err(|e| IndexError::Other(format!("discovery task failed: {e}")))??;
        report.files_scanned = files.len();
        tracing::info!(collection, files = files.len(), force_reindex, "full index started");

        if force_reindex {
            let exists = timed(
                "collection check",
                self.config.store_timeout,
                self.store.collection_exists(collection),
            )
            .await?;
            if exists {
                timed(
                    "delete collection",
                    self.config.store_timeout,
                    self.store.delete_collection(collection),
                )
                .await?;
            }
            let cleared = self.tracker.ledger().clear(collection).await?;
            tracing::debug!(collection, cleared, "collection reset");
        }
        self.prepare_collection(collection).await?;

        let total = files.len();
        let mut seen = HashSet::with_capacity(total);
        let mut writer = BatchWriter::new(self, collection);
        for (done, file) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            seen.insert(file.rel_path.as_str());
            self.process_file(&mut writer, collection, &file.rel_path, &file.abs_path, cancel, report)
                .await?;
            self.set_progress(job_id, done + 1, total).await;
        }
        writer.finish(cancel, report).await?;

        for record in self.tracker.ledger().list(collection).await? {
            if seen.contains(record.file_path.as_str()) {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            self.remove_file(collection, &record.file_path, report).await;
        }
        Ok(())
    }

    async fn run_incremental(
        &self,
        job_id: &str,
        collection: &str,
        repo_path: &Path,
        event: &ChangeEvent,
        cancel: &CancellationToken,
        report: &mut IndexReport,
    ) -> Result<()> {
        let filter = self.file_filter(repo_path)?;
        self.prepare_collection(collection).await?;

        let mut to_index: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut to_delete: BTreeSet<String> = BTreeSet::new();

        for raw in event.added.iter().chain(&event.modified) {
            let rel = match normalize_relative(raw) {
                Ok(rel) => rel,
                Err(e) => {
                    tracing::warn!(collection, "rejected path: {e}");
                    report.errors.push(e.to_string());
                    continue;
                }
            };
            let abs = repo_path.join(&rel);
            match tokio::fs::metadata(&abs).await {
                Ok(meta) if meta.is_file() && filter.accepts(&rel, meta.len()) => {
                    to_index.insert(rel, abs);
                }
                _ => {
                    to_delete.insert(rel);
                }
            }
        }
        for raw in &event.deleted {
            match normalize_relative(raw) {
                Ok(rel) if !to_index.contains_key(&rel) => {
                    to_delete.insert(rel);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(collection, "rejected path: {e}");
                    report.errors.push(e.to_string());
                }
            }
        }

        let total = to_index.len() + to_delete.len();
        report.files_scanned = total;
        tracing::info!(
            collection,
            changed = to_index.len(),
            deleted = to_delete.len(),
            "incremental index started"
        );

        let mut done = 0;
        for rel in &to_delete {
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            self.remove_file(collection, rel, report).await;
            done += 1;
            self.set_progress(job_id, done, total).await;
        }

        let mut writer = BatchWriter::new(self, collection);
        for (rel, abs) in &to_index {
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            self.process_file(&mut writer, collection, rel, abs, cancel, report)
                .await?;
            done += 1;
            self.set_progress(job_id, done, total).await;
        }
        writer.finish(cancel, report).await
    }

    /// Read, classify and chunk one file, queueing changed chunks for
    /// embedding. Per-file problems are recorded in the report.
    async fn process_file(
        &self,
        writer: &mut BatchWriter<'_>,
        collection: &str,
        rel_path: &str,
        abs_path: &Path,
        cancel: &CancellationToken,
        report: &mut IndexReport,
    ) -> Result<()> {
        let bytes = match tokio::fs::read(abs_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(file = rel_path, "unreadable file: {e}");
                report.errors.push(format!("{rel_path}: {e}"));
                report.files_skipped += 1;
                return Ok(());
            }
        };
        let mtime = tokio::fs::metadata(abs_path)
            .await
            .map(|m| mtime_millis(&m))
            .unwrap_or(0);
        let content_hash = sha256_hex(&bytes);

        let (status, record) = match self
            .tracker
            .check(collection, rel_path, &content_hash, mtime)
            .await
        {
            Ok(checked) => checked,
            Err(e) => {
                report.errors.push(format!("{rel_path}: {e}"));
                return Ok(());
            }
        };
        if !self.tracker.policy().requires_reindex(status) {
            report.files_skipped += 1;
            report.chunks_skipped += record.map_or(0, |r| r.chunk_count);
            return Ok(());
        }

        let Ok(text) = String::from_utf8(bytes) else {
            tracing::warn!(file = rel_path, "skipping file that is not valid UTF-8");
            report.errors.push(format!("{rel_path}: not valid UTF-8"));
            report.files_skipped += 1;
            return Ok(());
        };

        let chunks = chunk_file(rel_path, &text, &self.config.chunker);
        let previous = record.map(|r| r.chunks).unwrap_or_default();
        let hashes: BTreeMap<String, String> =
            chunks.iter().map(|c| (c.id.clone(), c.content_hash())).collect();

        let stale: Vec<String> = previous
            .keys()
            .filter(|id| !hashes.contains_key(*id))
            .cloned()
            .collect();
        let (unchanged, to_embed): (Vec<Chunk>, Vec<Chunk>) = chunks
            .into_iter()
            .partition(|c| previous.get(&c.id) == hashes.get(&c.id));
        report.chunks_skipped += unchanged.len();

        tracing::debug!(
            file = rel_path,
            ?status,
            embed = to_embed.len(),
            unchanged = unchanged.len(),
            stale = stale.len(),
            "file queued"
        );

        let pending = PendingFile {
            rel_path: rel_path.to_owned(),
            content_hash,
            mtime,
            hashes,
            stale,
            unflushed: 0,
            failed: false,
        };
        writer.add(pending, to_embed, cancel, report).await
    }

    async fn write_batch(&self, collection: &str, chunks: &[&Chunk]) -> Result<()> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = timed(
            "embedding",
            self.config.embed_timeout,
            self.embedder.embed(texts),
        )
        .await?;
        if vectors.len() != chunks.len() {
            return Err(LlmError::CountMismatch {
                expected: chunks.len(),
                actual: vectors.len(),
            }
            .into());
        }

        let points = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorPoint {
                id: point_id(&chunk.id),
                vector,
                payload: chunk_payload(chunk),
            })
            .collect();
        timed(
            "upsert",
            self.config.store_timeout,
            self.store.upsert(collection, points),
        )
        .await
    }

    async fn finalize_file(&self, collection: &str, file: PendingFile, report: &mut IndexReport) {
        if file.failed {
            return;
        }
        if !file.stale.is_empty() {
            let ids = file.stale.iter().map(|id| point_id(id)).collect();
            let deleted = timed(
                "delete",
                self.config.store_timeout,
                self.store.delete_by_ids(collection, ids),
            )
            .await;
            if let Err(e) = deleted {
                tracing::warn!(file = %file.rel_path, "stale chunk removal failed: {e}");
                report.errors.push(format!("{}: {e}", file.rel_path));
                return;
            }
            report.chunks_deleted += file.stale.len();
        }

        let recorded = self
            .tracker
            .record_hashes(collection, &file.rel_path, file.content_hash, file.mtime, file.hashes)
            .await;
        match recorded {
            Ok(record) => {
                report.files_indexed += 1;
                tracing::debug!(file = %file.rel_path, chunks = record.chunk_count, "file indexed");
            }
            Err(e) => report.errors.push(format!("{}: {e}", file.rel_path)),
        }
    }

    /// Drop a file's points and ledger record. A file without a record is
    /// already gone.
    async fn remove_file(&self, collection: &str, rel_path: &str, report: &mut IndexReport) {
        let record = match self.tracker.ledger().get(collection, rel_path).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                report.errors.push(format!("{rel_path}: {e}"));
                return;
            }
        };

        let ids: Vec<String> = record.chunks.keys().map(|id| point_id(id)).collect();
        let removed = ids.len();
        if !ids.is_empty() {
            let deleted = timed(
                "delete",
                self.config.store_timeout,
                self.store.delete_by_ids(collection, ids),
            )
            .await;
            if let Err(e) = deleted {
                tracing::warn!(file = rel_path, "chunk removal failed: {e}");
                report.errors.push(format!("{rel_path}: {e}"));
                return;
            }
        }

        match self.tracker.ledger().remove(collection, rel_path).await {
            Ok(_) => {
                report.files_deleted += 1;
                report.chunks_deleted += removed;
                tracing::debug!(file = rel_path, chunks = removed, "file removed from index");
            }
            Err(e) => report.errors.push(format!("{rel_path}: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use quarry_llm::mock::MockEmbedder;
    use quarry_memory::{
        BoxFuture, InMemoryVectorStore, ScoredVectorPoint, StoredPoint, VectorStoreError,
    };

    use super::*;
    use crate::retriever::{HybridRetriever, RetrievalConfig};
    use crate::jobs::InMemoryJobRegistry;
    use crate::tracker::InMemoryLedger;

    const FOO: &str = "def foo():\n    return 1\n";
    const SECTION: &str =
        "## Section\n\nThis section explains how releases are cut and shipped to users.\n";

    struct Harness {
        coordinator: IndexCoordinator,
        store: Arc<InMemoryVectorStore>,
        ledger: Arc<InMemoryLedger>,
        embedder: MockEmbedder,
        keyword: Arc<KeywordIndexes>,
        repo: tempfile::TempDir,
    }

    fn config() -> IndexerConfig {
        IndexerConfig {
            vector_size: Some(64),
            ..IndexerConfig::default()
        }
    }

    fn harness_with(embedder: MockEmbedder, config: IndexerConfig) -> Harness {
        let store = Arc::new(InMemoryVectorStore::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let keyword = Arc::new(KeywordIndexes::new());
        let coordinator = IndexCoordinator::new(
            store.clone(),
            Arc::new(embedder.clone()),
            ledger.clone(),
            Arc::new(InMemoryJobRegistry::new()),
            keyword.clone(),
            config,
        );
        let repo = tempfile::tempdir().unwrap();
        fs::write(repo.path().join("a.py"), FOO).unwrap();
        fs::write(repo.path().join("b.md"), SECTION).unwrap();
        Harness {
            coordinator,
            store,
            ledger,
            embedder,
            keyword,
            repo,
        }
    }

    fn harness() -> Harness {
        harness_with(MockEmbedder::new(64), config())
    }

    impl Harness {
        async fn full(&self, force: bool) -> IndexingJob {
            let job = self
                .coordinator
                .index_repository(self.repo.path(), "repo_main", force)
                .await
                .unwrap();
            self.coordinator.wait_for_job(&job.job_id).await.unwrap()
        }

        async fn incremental(&self, event: ChangeEvent) -> IndexingJob {
            let job = self
                .coordinator
                .incremental_index(self.repo.path(), event, Some("repo_main"))
                .await
                .unwrap();
            self.coordinator.wait_for_job(&job.job_id).await.unwrap()
        }

        async fn count(&self) -> u64 {
            self.store.count("repo_main").await.unwrap()
        }
    }

    #[tokio::test]
    async fn full_index_stores_every_chunk() {
        let h = harness();
        let job = h.full(false).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.job_id.starts_with("full_repo_main_"));
        assert_eq!(job.report.files_scanned, 2);
        assert_eq!(job.report.files_indexed, 2);
        assert_eq!(job.report.chunks_indexed, 2);
        assert!(job.report.success());
        assert_eq!(h.count().await, 2);

        let record = h.ledger.get("repo_main", "a.py").await.unwrap().unwrap();
        assert_eq!(record.chunk_count, 1);
        assert!(record.chunks.contains_key("a.py:function:foo:1-2"));
    }

    #[tokio::test]
    async fn reindexing_unchanged_repo_writes_nothing() {
        let h = harness();
        h.full(false).await;
        let calls = h.embedder.calls();

        let again = h.full(false).await;
        assert_eq!(again.report.files_skipped, 2);
        assert_eq!(again.report.chunks_indexed, 0);
        assert_eq!(again.report.chunks_skipped, 2);
        assert_eq!(h.embedder.calls(), calls);
        assert_eq!(h.count().await, 2);
        assert_eq!(h.ledger.get("repo_main", "a.py").await.unwrap().unwrap().chunk_count, 1);
    }

    #[tokio::test]
    async fn modified_file_reembeds_only_changed_chunks() {
        let h = harness();
        fs::write(
            h.repo.path().join("a.py"),
            "def foo():\n    return 1\n\n\n\n\n\n\ndef bar():\n    return 2\n",
        )
        .unwrap();
        h.full(false).await;
        assert_eq!(h.count().await, 3);

        fs::write(
            h.repo.path().join("a.py"),
            "def foo():\n    return 9\n\n\n\n\n\n\ndef bar():\n    return 2\n",
        )
        .unwrap();
        let job = h
            .incremental(ChangeEvent {
                modified: vec!["a.py".into()],
                ..ChangeEvent::default()
            })
            .await;
        assert_eq!(job.report.chunks_indexed, 1);
        assert_eq!(job.report.chunks_skipped, 1);
        assert_eq!(h.count().await, 3);
    }

    #[tokio::test]
    async fn renamed_symbol_removes_stale_chunk() {
        let h = harness();
        h.full(false).await;
        fs::write(h.repo.path().join("a.py"), "def qux():\n    return 1\n").unwrap();
        let job = h
            .incremental(ChangeEvent {
                modified: vec!["a.py".into()],
                ..ChangeEvent::default()
            })
            .await;
        assert_eq!(job.report.chunks_deleted, 1);
        assert_eq!(h.count().await, 2);
        let record = h.ledger.get("repo_main", "a.py").await.unwrap().unwrap();
        assert!(record.chunks.contains_key("a.py:function:qux:1-2"));
        assert!(!record.chunks.contains_key("a.py:function:foo:1-2"));
    }

    #[tokio::test]
    async fn incremental_delete_removes_points_and_record() {
        let h = harness();
        h.full(false).await;
        fs::remove_file(h.repo.path().join("a.py")).unwrap();

        let event = ChangeEvent {
            deleted: vec!["a.py".into()],
            ..ChangeEvent::default()
        };
        let job = h.incremental(event.clone()).await;
        assert_eq!(job.report.files_deleted, 1);
        assert_eq!(job.report.chunks_deleted, 1);
        assert_eq!(h.count().await, 1);
        assert!(h.ledger.get("repo_main", "a.py").await.unwrap().is_none());

        let replay = h.incremental(event).await;
        assert_eq!(replay.report.files_deleted, 0);
        assert_eq!(h.count().await, 1);
    }

    #[tokio::test]
    async fn missing_added_path_counts_as_deletion() {
        let h = harness();
        h.full(false).await;
        fs::remove_file(h.repo.path().join("a.py")).unwrap();
        let job = h
            .incremental(ChangeEvent {
                added: vec!["a.py".into()],
                ..ChangeEvent::default()
            })
            .await;
        assert_eq!(job.report.files_deleted, 1);
        assert_eq!(h.count().await, 1);
    }

    #[tokio::test]
    async fn escaping_paths_are_rejected_per_item() {
        let h = harness();
        let job = h
            .incremental(ChangeEvent {
                added: vec!["../etc/passwd".into(), "/abs.py".into(), "a.py".into()],
                ..ChangeEvent::default()
            })
            .await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.report.errors.len(), 2);
        assert_eq!(job.report.files_indexed, 1);
    }

    #[tokio::test]
    async fn failed_batch_is_skipped_and_reported() {
        let h = harness_with(
            MockEmbedder::new(64).fail_on_call(0),
            IndexerConfig {
                batch_size: 1,
                ..config()
            },
        );
        let job = h.full(false).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert!(!job.report.success());
        assert_eq!(job.report.errors.len(), 1);
        assert_eq!(job.report.chunks_indexed, 1);
        assert_eq!(job.report.files_indexed, 1);
        assert!(h.ledger.get("repo_main", "a.py").await.unwrap().is_none());
        assert!(h.ledger.get("repo_main", "b.md").await.unwrap().is_some());

        let retry = h.full(false).await;
        assert!(retry.report.success());
        assert_eq!(retry.report.chunks_indexed, 1);
        assert_eq!(h.count().await, 2);
    }

    #[tokio::test]
    async fn slow_embedder_times_out_per_batch() {
        let h = harness_with(
            MockEmbedder::new(64).with_delay(Duration::from_millis(200)),
            IndexerConfig {
                embed_timeout: Duration::from_millis(10),
                ..config()
            },
        );
        let job = h.full(false).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.report.errors[0].contains("timed out"));
        assert_eq!(job.report.chunks_indexed, 0);
    }

    #[tokio::test]
    async fn dimension_check_failure_fails_the_job() {
        let h = harness_with(
            MockEmbedder::failing(),
            IndexerConfig {
                vector_size: None,
                ..config()
            },
        );
        let job = h.full(false).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.is_some());
    }

    #[tokio::test]
    async fn vanished_files_removed_by_full_index() {
        let h = harness();
        h.full(false).await;
        fs::remove_file(h.repo.path().join("b.md")).unwrap();
        let job = h.full(false).await;
        assert_eq!(job.report.files_deleted, 1);
        assert_eq!(h.count().await, 1);
    }

    #[tokio::test]
    async fn force_reindex_rebuilds_everything() {
        let h = harness();
        h.full(false).await;
        let job = h.full(true).await;
        assert_eq!(job.report.chunks_indexed, 2);
        assert_eq!(job.report.files_skipped, 0);
        assert_eq!(h.count().await, 2);
    }

    #[tokio::test]
    async fn jobs_for_one_collection_run_in_order() {
        let h = harness_with(
            MockEmbedder::new(64).with_delay(Duration::from_millis(30)),
            config(),
        );
        let first = h
            .coordinator
            .index_repository(h.repo.path(), "repo_main", false)
            .await
            .unwrap();
        let second = h
            .coordinator
            .index_repository(h.repo.path(), "repo_main", true)
            .await
            .unwrap();
        let first = h.coordinator.wait_for_job(&first.job_id).await.unwrap();
        let second = h.coordinator.wait_for_job(&second.job_id).await.unwrap();
        assert!(first.finished_at.unwrap() <= second.started_at.unwrap());
        assert_eq!(second.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn cancelling_queued_job_fails_it() {
        let h = harness_with(
            MockEmbedder::new(64).with_delay(Duration::from_millis(100)),
            config(),
        );
        let running = h
            .coordinator
            .index_repository(h.repo.path(), "repo_main", false)
            .await
            .unwrap();
        let queued = h
            .coordinator
            .index_repository(h.repo.path(), "repo_main", false)
            .await
            .unwrap();

        assert!(h.coordinator.cancel_job(&queued.job_id).await.unwrap());
        let cancelled = h.coordinator.wait_for_job(&queued.job_id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Failed);
        assert_eq!(cancelled.error.as_deref(), Some("cancelled"));

        let done = h.coordinator.wait_for_job(&running.job_id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(!h.coordinator.cancel_job(&done.job_id).await.unwrap());
        assert!(!h.coordinator.cancel_job("nope").await.unwrap());
    }

    #[tokio::test]
    async fn keyword_cache_invalidated_after_writes() {
        let h = harness();
        h.full(false).await;
        let index = h.keyword.get_or_build("repo_main", h.store.as_ref()).await.unwrap();
        assert_eq!(index.bm25.len(), 2);

        fs::remove_file(h.repo.path().join("a.py")).unwrap();
        h.incremental(ChangeEvent {
            deleted: vec!["a.py".into()],
            ..ChangeEvent::default()
        })
        .await;
        assert!(!h.keyword.is_cached("repo_main"));
    }

    /// Passes everything through to the shared store, but parks each scroll
    /// after its snapshot is taken until released.
    struct ParkedScroll {
        inner: Arc<InMemoryVectorStore>,
        parked: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    impl VectorStore for ParkedScroll {
        fn ensure_collection(
            &self,
            collection: &str,
            vector_size: u64,
        ) -> BoxFuture<'_, std::result::Result<(), VectorStoreError>> {
            self.inner.ensure_collection(collection, vector_size)
        }

        fn collection_exists(
            &self,
            collection: &str,
        ) -> BoxFuture<'_, std::result::Result<bool, VectorStoreError>> {
            self.inner.collection_exists(collection)
        }

        fn delete_collection(
            &self,
            collection: &str,
        ) -> BoxFuture<'_, std::result::Result<(), VectorStoreError>> {
            self.inner.delete_collection(collection)
        }

        fn upsert(
            &self,
            collection: &str,
            points: Vec<VectorPoint>,
        ) -> BoxFuture<'_, std::result::Result<(), VectorStoreError>> {
            self.inner.upsert(collection, points)
        }

        fn search(
            &self,
            collection: &str,
            vector: Vec<f32>,
            limit: u64,
            score_threshold: Option<f32>,
        ) -> BoxFuture<'_, std::result::Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
            self.inner.search(collection, vector, limit, score_threshold)
        }

        fn delete_by_ids(
            &self,
            collection: &str,
            ids: Vec<String>,
        ) -> BoxFuture<'_, std::result::Result<(), VectorStoreError>> {
            self.inner.delete_by_ids(collection, ids)
        }

        fn scroll_all(
            &self,
            collection: &str,
        ) -> BoxFuture<'_, std::result::Result<Vec<StoredPoint>, VectorStoreError>> {
            let collection = collection.to_owned();
            Box::pin(async move {
                let snapshot = self.inner.scroll_all(&collection).await?;
                self.parked.notify_one();
                self.release.notified().await;
                Ok(snapshot)
            })
        }

        fn count(&self, collection: &str) -> BoxFuture<'_, std::result::Result<u64, VectorStoreError>> {
            self.inner.count(collection)
        }
    }

    #[tokio::test]
    async fn delete_during_keyword_rebuild_is_not_served_later() {
        let h = harness();
        h.full(false).await;
        assert!(!h.keyword.is_cached("repo_main"));

        let parked = Arc::new(ParkedScroll {
            inner: h.store.clone(),
            parked: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let racing = HybridRetriever::new(
            parked.clone(),
            Arc::new(h.embedder.clone()),
            h.keyword.clone(),
            RetrievalConfig::default(),
        );
        let in_flight =
            tokio::spawn(async move { racing.search("foo", "repo_main", 5, false).await });
        parked.parked.notified().await;

        fs::remove_file(h.repo.path().join("a.py")).unwrap();
        let job = h
            .incremental(ChangeEvent {
                deleted: vec!["a.py".into()],
                ..ChangeEvent::default()
            })
            .await;
        assert_eq!(job.report.files_deleted, 1);

        parked.release.notify_one();
        in_flight.await.unwrap();
        assert!(!h.keyword.is_cached("repo_main"));

        let retriever = HybridRetriever::new(
            h.store.clone(),
            Arc::new(h.embedder.clone()),
            h.keyword.clone(),
            RetrievalConfig::default(),
        );
        for _ in 0..2 {
            let response = retriever.search("foo", "repo_main", 5, false).await;
            assert!(response.errors.is_empty());
            assert!(
                response.results.iter().all(|r| r.chunk.file_path != "a.py"),
                "deleted chunk came back: {:?}",
                response.results
            );
        }
        assert!(h.keyword.is_cached("repo_main"));
    }

    #[tokio::test]
    async fn idle_workers_are_pruned_and_respawned() {
        let h = harness_with(
            MockEmbedder::new(64),
            IndexerConfig {
                worker_idle: Duration::from_millis(20),
                ..config()
            },
        );
        h.full(false).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(h.coordinator.workers.lock().unwrap().is_empty());

        fs::write(h.repo.path().join("c.py"), "def bar():\n    return 2\n").unwrap();
        let job = h.full(false).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.report.files_indexed, 1);
        assert_eq!(h.count().await, 3);
    }

    #[tokio::test]
    async fn worker_stays_registered_while_recently_used() {
        let h = harness();
        h.full(false).await;
        assert_eq!(h.coordinator.workers.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stats_and_cleanup() {
        let h = harness();
        h.full(false).await;
        let stats = h.coordinator.stats().await.unwrap();
        assert_eq!(stats.total_files_indexed, 2);
        assert_eq!(stats.total_chunks_indexed, 2);
        assert_eq!(stats.completed_jobs, 1);
        assert_eq!(stats.collections, vec!["repo_main".to_string()]);
        assert!(h.coordinator.list_jobs(true).await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(h.coordinator.cleanup_old_jobs(Duration::ZERO).await.unwrap(), 1);
        assert!(h.coordinator.list_jobs(false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn shutdown_rejects_new_jobs() {
        let h = harness();
        h.full(false).await;
        h.coordinator.shutdown().await;
        assert!(matches!(
            h.coordinator
                .index_repository(h.repo.path(), "repo_main", false)
                .await,
            Err(IndexError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn unknown_job_wait_errors() {
        let h = harness();
        assert!(matches!(
            h.coordinator.wait_for_job("missing").await,
            Err(IndexError::JobNotFound(_))
        ));
        assert!(h.coordinator.get_job_status("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn interrupted_jobs_recovered_as_failed() {
        let jobs = Arc::new(InMemoryJobRegistry::new());
        jobs.insert(IndexingJob::new("stale".into(), "c".into(), JobType::Full))
            .await
            .unwrap();
        let coordinator = IndexCoordinator::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(MockEmbedder::new(8)),
            Arc::new(InMemoryLedger::new()),
            jobs,
            Arc::new(KeywordIndexes::new()),
            config(),
        );
        assert_eq!(coordinator.recover_interrupted().await.unwrap(), 1);
        let job = coordinator.get_job_status("stale").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn default_collection_is_sanitized() {
        let event = ChangeEvent {
            repo: "acme/widgets".into(),
            branch: "feature/x".into(),
            ..ChangeEvent::default()
        };
        assert_eq!(event.default_collection(), "acme_widgets_feature_x");
    }

    #[test]
    fn change_event_deserializes_with_defaults() {
        let event: ChangeEvent =
            serde_json::from_str(r#"{"repo":"r","branch":"main","deleted":["a.py"]}"#).unwrap();
        assert_eq!(event.deleted, vec!["a.py"]);
        assert!(event.added.is_empty());
        assert!(event.commit.is_empty());
    }
}
