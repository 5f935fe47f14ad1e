//! Service layer wiring the queue, worker pool and query path together.

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::RuntimeConfig;
use crate::db::{Database, JobRecord, JobStatus};
use crate::error::{QueueError, ServiceError, ServiceResult, format_error_chain};
use crate::index::SqliteVectorIndex;
use crate::ingestion::{DocumentLoader, PdfLoader, pdfium_available};
use crate::ollama::OllamaClient;
use crate::providers::{EmbeddingProvider, LanguageModel, VectorIndex};
use crate::query::{Answer, QueryService};
use crate::queue::{JobQueue, SqliteJobQueue, UploadJob};
use crate::worker::WorkerPool;

/// Result of a successful upload
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub job_id: String,
    pub stored_path: PathBuf,
}

/// A job together with what it has written to the index so far
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetail {
    #[serde(flatten)]
    pub record: JobRecord,
    pub indexed_chunks: usize,
}

/// Snapshot reported by the health endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub ollama_available: bool,
    /// Configured models the Ollama server has not pulled
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_models: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_dimension: Option<usize>,
    pub jobs: BTreeMap<&'static str, usize>,
    pub indexed_chunks: usize,
    pub workers_in_flight: usize,
    pub worker_concurrency: usize,
}

pub struct PdfRagService {
    pub runtime_config: Arc<RuntimeConfig>,
    pub db: Arc<Database>,
    pub queue: Arc<dyn JobQueue>,
    pub workers: Arc<WorkerPool>,
    query: QueryService,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    ollama: Option<Arc<OllamaClient>>,
    started_at: Instant,
}

impl PdfRagService {
    /// Build the service against Ollama, PDFium and the SQLite-backed queue and index.
    pub async fn new(db: Arc<Database>, runtime_config: Arc<RuntimeConfig>) -> ServiceResult<Self> {
        info!("Initializing PDF RAG service");

        let ollama = Arc::new(OllamaClient::new(runtime_config.clone())?);
        let base_url = runtime_config.dynamic().ollama.base_url.clone();
        if ollama.health_check().await {
            info!(url = %base_url, "Ollama is available");
        } else {
            warn!(url = %base_url, "Ollama is not available");
        }

        if let Err(e) = pdfium_available() {
            warn!(error = %e, "PDF ingestion will retry until PDFium is installed");
        }

        let queue: Arc<dyn JobQueue> =
            Arc::new(SqliteJobQueue::new(db.clone(), runtime_config.clone()));
        let index: Arc<dyn VectorIndex> = Arc::new(SqliteVectorIndex::new(db.clone()));

        let mut service = Self::from_parts(
            db,
            runtime_config,
            queue,
            Arc::new(PdfLoader::new()),
            ollama.clone(),
            index,
            ollama.clone(),
        );
        service.ollama = Some(ollama);
        Ok(service)
    }

    /// Assemble the service from explicit providers.
    pub fn from_parts(
        db: Arc<Database>,
        runtime_config: Arc<RuntimeConfig>,
        queue: Arc<dyn JobQueue>,
        loader: Arc<dyn DocumentLoader>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        let workers = Arc::new(WorkerPool::new(
            queue.clone(),
            loader,
            embedder.clone(),
            index.clone(),
            runtime_config.clone(),
        ));
        let query = QueryService::new(embedder.clone(), index.clone(), llm, runtime_config.clone());

        Self {
            runtime_config,
            db,
            queue,
            workers,
            query,
            embedder,
            index,
            ollama: None,
            started_at: Instant::now(),
        }
    }

    /// Store an uploaded PDF and enqueue it for ingestion.
    ///
    /// If the job cannot be queued the stored file is removed again, so nothing
    /// is left on disk that no job refers to.
    pub async fn upload_pdf(&self, content: &[u8], filename: &str) -> ServiceResult<UploadReceipt> {
        let original_filename = sanitize_filename(filename);
        if original_filename.is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "uploaded file has no name".to_string(),
            });
        }
        if !content.starts_with(b"%PDF-") {
            return Err(ServiceError::InvalidRequest {
                message: format!("{} is not a PDF file", original_filename),
            });
        }

        let uploads_dir = &self.runtime_config.static_config.storage.uploads_dir;
        tokio::fs::create_dir_all(uploads_dir)
            .await
            .map_err(|e| ServiceError::Internal {
                message: format!("failed to create {}: {}", uploads_dir.display(), e),
            })?;

        let stored_path = uploads_dir.join(storage_name(&original_filename));
        tokio::fs::write(&stored_path, content)
            .await
            .map_err(|e| ServiceError::Internal {
                message: format!("failed to store {}: {}", stored_path.display(), e),
            })?;

        let job = UploadJob {
            original_filename: original_filename.clone(),
            storage_path: stored_path.to_string_lossy().to_string(),
            destination_dir: uploads_dir.to_string_lossy().to_string(),
        };

        let job_id = match self.queue.enqueue(&job).await {
            Ok(id) => id,
            Err(e) => {
                error!(
                    file = %original_filename,
                    error = %format_error_chain(&e),
                    "Failed to enqueue upload, removing stored file"
                );
                remove_quietly(&stored_path).await;
                return Err(e.into());
            }
        };

        info!(
            job_id = %job_id,
            file = %original_filename,
            bytes = content.len(),
            "PDF uploaded and queued for ingestion"
        );

        Ok(UploadReceipt {
            job_id,
            stored_path,
        })
    }

    pub async fn ask(&self, question: &str) -> ServiceResult<Answer> {
        self.query.answer(question).await
    }

    pub async fn get_job(&self, job_id: &str) -> ServiceResult<JobRecord> {
        self.queue.get(job_id).await.map_err(|e| match e {
            QueueError::NotFound { job_id } => ServiceError::JobNotFound { job_id },
            other => other.into(),
        })
    }

    pub async fn job_detail(&self, job_id: &str) -> ServiceResult<JobDetail> {
        let record = self.get_job(job_id).await?;
        let indexed_chunks = self.index.count_for_job(job_id).await?;
        Ok(JobDetail {
            record,
            indexed_chunks,
        })
    }

    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> ServiceResult<Vec<JobRecord>> {
        Ok(self.queue.list(status, limit).await?)
    }

    /// Send a dead-lettered job back through the pipeline
    pub async fn requeue_job(&self, job_id: &str) -> ServiceResult<JobRecord> {
        let record = self.get_job(job_id).await?;
        if record.status != JobStatus::Dead {
            return Err(ServiceError::InvalidRequest {
                message: format!(
                    "job {} is {}, only dead jobs can be requeued",
                    job_id,
                    record.status.as_str()
                ),
            });
        }

        self.queue.requeue_dead(job_id).await?;
        info!(job_id = %job_id, "Dead job requeued");
        self.get_job(job_id).await
    }

    /// Update settings in database and hot-reload config
    pub async fn update_settings(&self, updates: HashMap<String, serde_json::Value>) -> ServiceResult<()> {
        self.db.set_settings(updates)?;
        self.runtime_config.reload_from_db(&self.db)?;
        Ok(())
    }

    /// Delete completed jobs older than the retention window
    pub async fn purge_completed_jobs(&self) -> ServiceResult<usize> {
        let retention = self.runtime_config.dynamic().queue.completed_retention();
        Ok(self.queue.purge_completed(retention).await?)
    }

    /// Periodically purge completed jobs until `shutdown` fires
    pub fn start_cleanup_task(service: Arc<PdfRagService>, shutdown: CancellationToken) {
        tokio::spawn(async move {
            loop {
                let interval = service.runtime_config.dynamic().queue.cleanup_interval();
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                match service.purge_completed_jobs().await {
                    Ok(0) => {}
                    Ok(count) => info!(count, "Purged completed jobs"),
                    Err(e) => warn!(error = %format_error_chain(&e), "Failed to purge completed jobs"),
                }
            }
        });
    }

    pub async fn health(&self) -> ServiceResult<HealthReport> {
        let (ollama_available, missing_models) = match &self.ollama {
            Some(ollama) => match ollama.list_models().await {
                Ok(pulled) => (true, self.missing_models(&pulled)),
                Err(e) => {
                    warn!(error = %format_error_chain(&e), "Ollama health check failed");
                    (false, Vec::new())
                }
            },
            None => (true, Vec::new()),
        };

        let mut jobs: BTreeMap<&'static str, usize> = [
            JobStatus::Pending,
            JobStatus::Leased,
            JobStatus::Completed,
            JobStatus::Dead,
        ]
        .into_iter()
        .map(|s| (s.as_str(), 0))
        .collect();
        for (status, count) in self.db.count_jobs_by_status()? {
            jobs.insert(status.as_str(), count);
        }

        Ok(HealthReport {
            status: if ollama_available { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: self.started_at.elapsed().as_secs(),
            ollama_available,
            missing_models,
            embedding_dimension: self.embedder.dimension(),
            jobs,
            indexed_chunks: self.db.count_entries()?,
            workers_in_flight: self.workers.in_flight(),
            worker_concurrency: self.workers.concurrency(),
        })
    }
}

impl PdfRagService {
    fn missing_models(&self, pulled: &[String]) -> Vec<String> {
        let dynamic = self.runtime_config.dynamic();
        [&dynamic.ollama.default_model, &dynamic.embeddings.model]
            .into_iter()
            .filter(|wanted| !pulled.iter().any(|name| model_matches(name, wanted)))
            .cloned()
            .collect()
    }
}

/// Ollama reports `name:tag`; an untagged name means `:latest`
fn model_matches(pulled: &str, wanted: &str) -> bool {
    if pulled == wanted {
        return true;
    }
    !wanted.contains(':') && pulled.strip_suffix(":latest") == Some(wanted)
}

/// Unique on-disk name: `<millis>-<random>-<original name>`
fn storage_name(original_filename: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
    format!(
        "{}-{}-{}",
        Utc::now().timestamp_millis(),
        suffix,
        original_filename
    )
}

/// Keep only the final path component and drop characters unsafe in file names
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    base.chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .trim_start_matches('.')
        .to_string()
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove stored upload");
    }
}
