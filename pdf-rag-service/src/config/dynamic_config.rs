//! Dynamic configuration that can be updated at runtime via API.
//! DB values override config file/env defaults.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Dynamic configuration that can be updated at runtime via API
/// DB values override config file/env defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicConfig {
    #[serde(default = "default_ollama")]
    pub ollama: OllamaConfig,

    #[serde(default = "default_embeddings")]
    pub embeddings: EmbeddingsConfig,

    #[serde(default = "default_chunking")]
    pub chunking: ChunkingConfig,

    #[serde(default = "default_timeouts")]
    pub timeouts: TimeoutsConfig,

    #[serde(default = "default_queue")]
    pub queue: QueueConfig,

    #[serde(default = "default_query")]
    pub query: QueryConfig,
}

/// Ollama LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

/// Embeddings configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

/// How page text is split into chunks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Words per chunk within a page; 0 keeps one chunk per page
    #[serde(default)]
    pub max_words: usize,

    /// Words shared between consecutive chunks of the same page
    #[serde(default)]
    pub overlap_words: usize,
}

/// Per-call timeouts for external providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_embed_timeout_ms")]
    pub embed_ms: u64,

    #[serde(default = "default_index_timeout_ms")]
    pub index_ms: u64,

    #[serde(default = "default_completion_timeout_ms")]
    pub completion_ms: u64,
}

impl TimeoutsConfig {
    pub fn embed(&self) -> Duration {
        Duration::from_millis(self.embed_ms)
    }

    pub fn index(&self) -> Duration {
        Duration::from_millis(self.index_ms)
    }

    pub fn completion(&self) -> Duration {
        Duration::from_millis(self.completion_ms)
    }
}

/// Job queue retry and retention policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Deliveries before a retryable failure is dead-lettered
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// How long a dequeued job stays invisible to other consumers
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,

    /// Completed jobs older than this are purged
    #[serde(default = "default_completed_retention_secs")]
    pub completed_retention_secs: u64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl QueueConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    /// How often a running job renews its lease; `None` for zero-length leases.
    pub fn lease_renewal(&self) -> Option<Duration> {
        let every = self.lease() / 3;
        (!every.is_zero()).then_some(every)
    }

    pub fn completed_retention(&self) -> Duration {
        Duration::from_secs(self.completed_retention_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Exponential backoff for the given (1-based) delivery attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self.backoff_base_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Number of nearest chunks handed to the language model
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for DynamicConfig {
    fn default() -> Self {
        Self {
            ollama: default_ollama(),
            embeddings: default_embeddings(),
            chunking: default_chunking(),
            timeouts: default_timeouts(),
            queue: default_queue(),
            query: default_query(),
        }
    }
}

// ==================== DynamicConfig Settings Keys ====================

/// All valid setting keys for DynamicConfig
pub const VALID_SETTING_KEYS: &[&str] = &[
    "ollama.base_url",
    "ollama.default_model",
    "ollama.temperature",
    "embeddings.model",
    "chunking.max_words",
    "chunking.overlap_words",
    "timeouts.embed_ms",
    "timeouts.index_ms",
    "timeouts.completion_ms",
    "queue.max_attempts",
    "queue.backoff_base_ms",
    "queue.backoff_max_ms",
    "queue.lease_secs",
    "queue.completed_retention_secs",
    "queue.cleanup_interval_secs",
    "query.top_k",
];

impl DynamicConfig {
    /// Get all valid setting keys
    pub fn valid_keys() -> HashSet<&'static str> {
        VALID_SETTING_KEYS.iter().copied().collect()
    }

    /// Convert config to key-value map for API response
    pub fn to_key_value_map(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();

        map.insert(
            "ollama.base_url".to_string(),
            serde_json::Value::String(self.ollama.base_url.clone()),
        );
        map.insert(
            "ollama.default_model".to_string(),
            serde_json::Value::String(self.ollama.default_model.clone()),
        );
        map.insert(
            "ollama.temperature".to_string(),
            serde_json::json!(self.ollama.temperature),
        );
        map.insert(
            "embeddings.model".to_string(),
            serde_json::Value::String(self.embeddings.model.clone()),
        );

        map.insert(
            "chunking.max_words".to_string(),
            serde_json::json!(self.chunking.max_words),
        );
        map.insert(
            "chunking.overlap_words".to_string(),
            serde_json::json!(self.chunking.overlap_words),
        );

        map.insert(
            "timeouts.embed_ms".to_string(),
            serde_json::json!(self.timeouts.embed_ms),
        );
        map.insert(
            "timeouts.index_ms".to_string(),
            serde_json::json!(self.timeouts.index_ms),
        );
        map.insert(
            "timeouts.completion_ms".to_string(),
            serde_json::json!(self.timeouts.completion_ms),
        );

        map.insert(
            "queue.max_attempts".to_string(),
            serde_json::json!(self.queue.max_attempts),
        );
        map.insert(
            "queue.backoff_base_ms".to_string(),
            serde_json::json!(self.queue.backoff_base_ms),
        );
        map.insert(
            "queue.backoff_max_ms".to_string(),
            serde_json::json!(self.queue.backoff_max_ms),
        );
        map.insert(
            "queue.lease_secs".to_string(),
            serde_json::json!(self.queue.lease_secs),
        );
        map.insert(
            "queue.completed_retention_secs".to_string(),
            serde_json::json!(self.queue.completed_retention_secs),
        );
        map.insert(
            "queue.cleanup_interval_secs".to_string(),
            serde_json::json!(self.queue.cleanup_interval_secs),
        );

        map.insert(
            "query.top_k".to_string(),
            serde_json::json!(self.query.top_k),
        );

        map
    }

    /// Apply DB settings as overrides to this config
    pub fn merge_from_db(&mut self, db_settings: &HashMap<String, serde_json::Value>) {
        for (key, value) in db_settings {
            self.apply_setting(key, value);
        }
    }

    /// Apply a single setting value
    fn apply_setting(&mut self, key: &str, value: &serde_json::Value) {
        match key {
            "ollama.base_url" => {
                if let Some(v) = value.as_str() {
                    self.ollama.base_url = v.to_string();
                }
            }
            "ollama.default_model" => {
                if let Some(v) = value.as_str() {
                    self.ollama.default_model = v.to_string();
                }
            }
            "ollama.temperature" => {
                if let Some(v) = value.as_f64() {
                    self.ollama.temperature = v as f32;
                }
            }
            "embeddings.model" => {
                if let Some(v) = value.as_str() {
                    self.embeddings.model = v.to_string();
                }
            }

            "chunking.max_words" => {
                if let Some(v) = value.as_u64() {
                    self.chunking.max_words = v as usize;
                }
            }
            "chunking.overlap_words" => {
                if let Some(v) = value.as_u64() {
                    self.chunking.overlap_words = v as usize;
                }
            }

            "timeouts.embed_ms" => {
                if let Some(v) = value.as_u64() {
                    self.timeouts.embed_ms = v;
                }
            }
            "timeouts.index_ms" => {
                if let Some(v) = value.as_u64() {
                    self.timeouts.index_ms = v;
                }
            }
            "timeouts.completion_ms" => {
                if let Some(v) = value.as_u64() {
                    self.timeouts.completion_ms = v;
                }
            }

            "queue.max_attempts" => {
                if let Some(v) = value.as_u64() {
                    self.queue.max_attempts = (v as u32).max(1);
                }
            }
            "queue.backoff_base_ms" => {
                if let Some(v) = value.as_u64() {
                    self.queue.backoff_base_ms = v;
                }
            }
            "queue.backoff_max_ms" => {
                if let Some(v) = value.as_u64() {
                    self.queue.backoff_max_ms = v;
                }
            }
            "queue.lease_secs" => {
                if let Some(v) = value.as_u64() {
                    self.queue.lease_secs = v;
                }
            }
            "queue.completed_retention_secs" => {
                if let Some(v) = value.as_u64() {
                    self.queue.completed_retention_secs = v;
                }
            }
            "queue.cleanup_interval_secs" => {
                if let Some(v) = value.as_u64() {
                    self.queue.cleanup_interval_secs = v.max(1);
                }
            }

            "query.top_k" => {
                if let Some(v) = value.as_u64() {
                    self.query.top_k = (v as usize).max(1);
                }
            }

            _ => {
                tracing::warn!(key = %key, "Unknown setting key in merge_from_db");
            }
        }
    }
}

// ==================== Default Value Functions ====================

fn default_ollama() -> OllamaConfig {
    OllamaConfig {
        base_url: default_ollama_url(),
        default_model: default_model(),
        temperature: default_temperature(),
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_embeddings() -> EmbeddingsConfig {
    EmbeddingsConfig {
        model: default_embedding_model(),
    }
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_chunking() -> ChunkingConfig {
    ChunkingConfig {
        max_words: 0,
        overlap_words: 0,
    }
}

fn default_timeouts() -> TimeoutsConfig {
    TimeoutsConfig {
        embed_ms: default_embed_timeout_ms(),
        index_ms: default_index_timeout_ms(),
        completion_ms: default_completion_timeout_ms(),
    }
}

fn default_embed_timeout_ms() -> u64 {
    30_000
}

fn default_index_timeout_ms() -> u64 {
    30_000
}

fn default_completion_timeout_ms() -> u64 {
    120_000
}

fn default_queue() -> QueueConfig {
    QueueConfig {
        max_attempts: default_max_attempts(),
        backoff_base_ms: default_backoff_base_ms(),
        backoff_max_ms: default_backoff_max_ms(),
        lease_secs: default_lease_secs(),
        completed_retention_secs: default_completed_retention_secs(),
        cleanup_interval_secs: default_cleanup_interval_secs(),
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_lease_secs() -> u64 {
    300
}

fn default_completed_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_cleanup_interval_secs() -> u64 {
    60 * 60
}

fn default_query() -> QueryConfig {
    QueryConfig {
        top_k: default_top_k(),
    }
}

fn default_top_k() -> usize {
    2
}
