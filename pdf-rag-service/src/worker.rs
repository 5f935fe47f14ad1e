//! Ingestion worker pool.
//!
//! Leases upload jobs from the queue and runs load, chunk, embed and index for
//! each one. At most `workers.concurrency` jobs are in flight at once.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{DynamicConfig, RuntimeConfig};
use crate::db::{IndexEntry, LeasedJob};
use crate::error::{
    EmbeddingError, IndexError, JobError, LoadError, QueueError, format_error_chain,
};
use crate::index::entry_id;
use crate::ingestion::{DocumentLoader, chunk_pages};
use crate::providers::{EmbeddingProvider, VectorIndex};
use crate::queue::{JobQueue, UploadJob};

/// What happened to a delivered job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { chunks: usize },
    Retried { delay: Duration },
    DeadLettered,
    /// The outcome could not be recorded; the lease will expire and the job
    /// will be delivered again.
    Unrecorded,
}

pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    loader: Arc<dyn DocumentLoader>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    config: Arc<RuntimeConfig>,
    permits: Arc<Semaphore>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        loader: Arc<dyn DocumentLoader>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        config: Arc<RuntimeConfig>,
    ) -> Self {
        let concurrency = config.static_config.workers.concurrency.max(1);
        Self {
            queue,
            loader,
            embedder,
            index,
            config,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    /// Jobs currently being processed
    pub fn in_flight(&self) -> usize {
        self.concurrency - self.permits.available_permits()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Dequeue and process jobs until `shutdown` fires, then wait for the jobs
    /// already started.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let poll_interval = self.config.static_config.workers.poll_interval();
        info!(concurrency = self.concurrency, "Ingestion worker pool started");

        let mut tasks = JoinSet::new();

        loop {
            while let Some(finished) = tasks.try_join_next() {
                log_task_exit(finished);
            }

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.queue.dequeue().await {
                Ok(Some(job)) => {
                    let pool = Arc::clone(&self);
                    tasks.spawn(async move {
                        let _permit = permit;
                        pool.handle(job).await;
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(poll_interval) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!(error = %format_error_chain(&e), "Failed to dequeue job");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(poll_interval) => {}
                    }
                }
            }
        }

        info!(in_flight = tasks.len(), "Worker pool stopping, draining in-flight jobs");
        while let Some(finished) = tasks.join_next().await {
            log_task_exit(finished);
        }
        info!("Worker pool stopped");
    }

    /// Lease one job and process it on the current task.
    pub async fn process_next(&self) -> Result<Option<JobOutcome>, QueueError> {
        match self.queue.dequeue().await? {
            Some(job) => Ok(Some(self.handle(job).await)),
            None => Ok(None),
        }
    }

    /// Process a leased job and record the outcome in the queue.
    ///
    /// The lease is renewed while the pipeline runs, so a slow job is not
    /// handed to a second consumer. If renewal finds the lease already taken,
    /// the work is abandoned to its new holder.
    async fn handle(&self, job: LeasedJob) -> JobOutcome {
        let config = self.config.snapshot();
        debug!(job_id = %job.id, attempt = job.attempts, "Processing job");

        let work = self.process_job(&job, &config);
        tokio::pin!(work);

        let result = match config.queue.lease_renewal() {
            None => work.await,
            Some(every) => {
                let mut renewal =
                    tokio::time::interval_at(tokio::time::Instant::now() + every, every);
                loop {
                    tokio::select! {
                        result = &mut work => break result,
                        _ = renewal.tick() => match self.queue.extend_lease(&job).await {
                            Ok(()) => debug!(job_id = %job.id, "Lease renewed"),
                            Err(QueueError::LeaseLost { .. }) => {
                                warn!(job_id = %job.id, "Lease lost mid-job, abandoning it");
                                return JobOutcome::Unrecorded;
                            }
                            Err(e) => {
                                warn!(job_id = %job.id, error = %format_error_chain(&e), "Failed to renew lease");
                            }
                        },
                    }
                }
            }
        };

        self.record_outcome(&job, &config, result).await
    }

    /// Run the pipeline for one job. Writes are idempotent, so a redelivered
    /// job replaces its own entries instead of duplicating them.
    pub async fn process_job(
        &self,
        job: &LeasedJob,
        config: &DynamicConfig,
    ) -> Result<usize, JobError> {
        let upload = UploadJob::parse(&job.payload)?;

        let pages = self.loader.load(Path::new(&upload.storage_path)).await?;
        let chunks = chunk_pages(&pages, &upload.original_filename, &config.chunking);
        if chunks.is_empty() {
            return Err(LoadError::NoText {
                path: upload.storage_path.clone(),
            }
            .into());
        }

        debug!(
            job_id = %job.id,
            file = %upload.original_filename,
            pages = pages.len(),
            chunks = chunks.len(),
            "Document split"
        );

        let embed_timeout = config.timeouts.embed();
        let mut entries = Vec::with_capacity(chunks.len());
        for (position, chunk) in chunks.into_iter().enumerate() {
            let vector = tokio::time::timeout(embed_timeout, self.embedder.embed(&chunk.text))
                .await
                .map_err(|_| EmbeddingError::Timeout {
                    timeout_ms: config.timeouts.embed_ms,
                })??;

            let chunk_index = position as u32;
            entries.push(IndexEntry {
                id: entry_id(&upload.storage_path, chunk_index),
                job_id: job.id.clone(),
                chunk_index,
                vector,
                chunk,
            });
        }

        let count = entries.len();
        tokio::time::timeout(config.timeouts.index(), self.index.add_entries(entries))
            .await
            .map_err(|_| IndexError::Timeout {
                timeout_ms: config.timeouts.index_ms,
            })??;

        metrics::counter!("pdf_rag_chunks_indexed_total").increment(count as u64);
        Ok(count)
    }

    async fn record_outcome(
        &self,
        job: &LeasedJob,
        config: &DynamicConfig,
        result: Result<usize, JobError>,
    ) -> JobOutcome {
        let recorded = match result {
            Ok(chunks) => self.queue.ack(job).await.map(|()| {
                metrics::counter!("pdf_rag_jobs_completed_total").increment(1);
                info!(job_id = %job.id, chunks, attempt = job.attempts, "Job completed");
                JobOutcome::Completed { chunks }
            }),
            Err(e) if e.is_retryable() && job.attempts < config.queue.max_attempts => {
                let delay = config.queue.backoff(job.attempts);
                let message = format_error_chain(&e);
                self.queue.retry(job, &message, delay).await.map(|()| {
                    metrics::counter!("pdf_rag_jobs_retried_total", "kind" => e.kind())
                        .increment(1);
                    warn!(
                        job_id = %job.id,
                        attempt = job.attempts,
                        max_attempts = config.queue.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Job failed, will retry"
                    );
                    JobOutcome::Retried { delay }
                })
            }
            Err(e) => {
                let message = format_error_chain(&e);
                self.queue.dead_letter(job, &message).await.map(|()| {
                    metrics::counter!("pdf_rag_jobs_dead_total", "kind" => e.kind())
                        .increment(1);
                    error!(
                        job_id = %job.id,
                        attempt = job.attempts,
                        retryable = e.is_retryable(),
                        error = %message,
                        "Job moved to dead-letter"
                    );
                    JobOutcome::DeadLettered
                })
            }
        };

        recorded.unwrap_or_else(|e| {
            warn!(job_id = %job.id, error = %format_error_chain(&e), "Could not record job outcome");
            JobOutcome::Unrecorded
        })
    }
}

fn log_task_exit(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        // The lease expires and the job is redelivered until its attempts run out
        error!(error = %e, "Ingestion task aborted");
    }
}
