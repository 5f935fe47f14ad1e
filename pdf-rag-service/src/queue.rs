//! Durable job queue for PDF ingestion.
//!
//! The upload route produces [`UploadJob`]s; the worker pool consumes them as
//! [`LeasedJob`]s. Delivery is at-least-once: a job whose lease runs out before
//! it is acknowledged is handed out again, until it has used up
//! `queue.max_attempts` deliveries and is dead-lettered instead.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::db::{Database, JobRecord, JobStatus, LeasedJob};
use crate::error::{DatabaseError, JobError, QueueError};

/// Work item describing one uploaded PDF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadJob {
    /// Name the client uploaded the file under; becomes each chunk's source.
    #[serde(rename = "filename")]
    pub original_filename: String,

    /// Where the stored copy lives on disk.
    #[serde(rename = "path")]
    pub storage_path: String,

    #[serde(rename = "destination")]
    pub destination_dir: String,
}

impl UploadJob {
    /// Decode and validate a queued payload.
    pub fn parse(payload: &str) -> Result<Self, JobError> {
        let job: UploadJob =
            serde_json::from_str(payload).map_err(|e| JobError::Malformed {
                message: e.to_string(),
            })?;

        if job.original_filename.trim().is_empty() {
            return Err(JobError::Malformed {
                message: "filename is empty".to_string(),
            });
        }
        if job.storage_path.trim().is_empty() {
            return Err(JobError::Malformed {
                message: "path is empty".to_string(),
            });
        }

        Ok(job)
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Persist a job and return its id.
    async fn enqueue(&self, job: &UploadJob) -> Result<String, QueueError>;

    /// Lease the next available job, if any.
    async fn dequeue(&self) -> Result<Option<LeasedJob>, QueueError>;

    async fn ack(&self, job: &LeasedJob) -> Result<(), QueueError>;

    /// Renew a held lease for another lease period.
    async fn extend_lease(&self, job: &LeasedJob) -> Result<(), QueueError>;

    /// Release the lease and make the job visible again after `delay`.
    async fn retry(&self, job: &LeasedJob, error: &str, delay: Duration)
    -> Result<(), QueueError>;

    async fn dead_letter(&self, job: &LeasedJob, error: &str) -> Result<(), QueueError>;

    async fn get(&self, job_id: &str) -> Result<JobRecord, QueueError>;

    async fn list(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, QueueError>;

    /// Give a dead job a fresh attempt budget.
    async fn requeue_dead(&self, job_id: &str) -> Result<(), QueueError>;

    /// Delete completed jobs older than `older_than`; returns how many went.
    async fn purge_completed(&self, older_than: Duration) -> Result<usize, QueueError>;
}

/// Queue stored in the service database.
pub struct SqliteJobQueue {
    db: Arc<Database>,
    config: Arc<RuntimeConfig>,
}

impl SqliteJobQueue {
    pub fn new(db: Arc<Database>, config: Arc<RuntimeConfig>) -> Self {
        Self { db, config }
    }

    fn lease_lost(job: &LeasedJob) -> QueueError {
        QueueError::LeaseLost {
            job_id: job.id.clone(),
            lease_id: job.lease_id.clone(),
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn unavailable(e: DatabaseError) -> QueueError {
    QueueError::Unavailable(e)
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, job: &UploadJob) -> Result<String, QueueError> {
        let id = Uuid::new_v4().to_string();
        let payload = serde_json::to_string(job)
            .map_err(|e| QueueError::Unavailable(DatabaseError::Serialization(e)))?;

        self.db
            .insert_job(&id, &payload, now_ms())
            .map_err(unavailable)?;

        metrics::counter!("pdf_rag_jobs_enqueued_total").increment(1);
        debug!(job_id = %id, file = %job.original_filename, "Job enqueued");
        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<LeasedJob>, QueueError> {
        let config = self.config.snapshot();
        let now = now_ms();
        let expires = now.saturating_add(config.queue.lease().as_millis() as i64);
        let lease_id = Uuid::new_v4().to_string();

        let claim = self
            .db
            .lease_next_job(&lease_id, now, expires, config.queue.max_attempts)
            .map_err(unavailable)?;

        for job_id in &claim.exhausted {
            metrics::counter!("pdf_rag_jobs_dead_total", "kind" => "lease_expired").increment(1);
            error!(
                job_id = %job_id,
                max_attempts = config.queue.max_attempts,
                "Lease expired on final attempt, job moved to dead-letter"
            );
        }

        Ok(claim.job)
    }

    async fn extend_lease(&self, job: &LeasedJob) -> Result<(), QueueError> {
        let now = now_ms();
        let expires = now.saturating_add(self.config.dynamic().queue.lease().as_millis() as i64);
        let held = self
            .db
            .extend_job_lease(&job.id, &job.lease_id, expires, now)
            .map_err(unavailable)?;
        if held {
            Ok(())
        } else {
            Err(Self::lease_lost(job))
        }
    }

    async fn ack(&self, job: &LeasedJob) -> Result<(), QueueError> {
        let held = self
            .db
            .complete_job(&job.id, &job.lease_id, now_ms())
            .map_err(unavailable)?;
        if held {
            Ok(())
        } else {
            Err(Self::lease_lost(job))
        }
    }

    async fn retry(
        &self,
        job: &LeasedJob,
        error: &str,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let now = now_ms();
        let available_at = now.saturating_add(delay.as_millis() as i64);
        let held = self
            .db
            .reschedule_job(&job.id, &job.lease_id, error, available_at, now)
            .map_err(unavailable)?;
        if held {
            Ok(())
        } else {
            Err(Self::lease_lost(job))
        }
    }

    async fn dead_letter(&self, job: &LeasedJob, error: &str) -> Result<(), QueueError> {
        let held = self
            .db
            .dead_letter_job(&job.id, &job.lease_id, error, now_ms())
            .map_err(unavailable)?;
        if held {
            Ok(())
        } else {
            Err(Self::lease_lost(job))
        }
    }

    async fn get(&self, job_id: &str) -> Result<JobRecord, QueueError> {
        self.db
            .get_job(job_id)
            .map_err(unavailable)?
            .ok_or_else(|| QueueError::NotFound {
                job_id: job_id.to_string(),
            })
    }

    async fn list(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, QueueError> {
        self.db.list_jobs(status, limit).map_err(unavailable)
    }

    async fn requeue_dead(&self, job_id: &str) -> Result<(), QueueError> {
        if self
            .db
            .requeue_dead_job(job_id, now_ms())
            .map_err(unavailable)?
        {
            Ok(())
        } else {
            warn!(job_id = %job_id, "Requeue requested for a job that is not dead");
            Err(QueueError::NotFound {
                job_id: job_id.to_string(),
            })
        }
    }

    async fn purge_completed(&self, older_than: Duration) -> Result<usize, QueueError> {
        let cutoff = now_ms().saturating_sub(older_than.as_millis() as i64);
        self.db.purge_completed_jobs(cutoff).map_err(unavailable)
    }
}
