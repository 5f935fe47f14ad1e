//! Static configuration that cannot be changed at runtime.
//! These settings affect server binding, storage layout or pool sizing and
//! require a restart to change.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Static configuration that cannot be changed at runtime
/// These settings affect server binding or storage layout and require a restart
#[derive(Debug, Clone, Deserialize)]
pub struct StaticConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    #[serde(default = "default_workers")]
    pub workers: WorkersConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_upload_size")]
    pub max_upload_size_bytes: u64,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Where uploaded PDFs are written before a worker picks them up.
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,
}

/// Ingestion worker pool sizing
#[derive(Debug, Clone, Deserialize)]
pub struct WorkersConfig {
    /// Maximum number of jobs processed at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Sleep between polls when the queue is empty
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl WorkersConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            storage: default_storage(),
            workers: default_workers(),
        }
    }
}

fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
        max_upload_size_bytes: default_max_upload_size(),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_upload_size() -> u64 {
    100 * 1024 * 1024
}

fn default_storage() -> StorageConfig {
    StorageConfig {
        data_dir: default_data_dir(),
        uploads_dir: default_uploads_dir(),
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("./uploads")
}

fn default_workers() -> WorkersConfig {
    WorkersConfig {
        concurrency: default_concurrency(),
        poll_interval_ms: default_poll_interval_ms(),
    }
}

fn default_concurrency() -> usize {
    100
}

fn default_poll_interval_ms() -> u64 {
    1000
}
