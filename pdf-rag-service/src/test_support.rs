//! In-memory fakes for the provider traits.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{DynamicConfig, RuntimeConfig, StaticConfig};
use crate::error::{CompletionError, EmbeddingError, LoadError};
use crate::ingestion::{DocumentLoader, PageText};
use crate::providers::{EmbeddingProvider, LanguageModel};

pub const TEST_DIMENSION: usize = 32;

pub fn runtime_config(
    configure_static: impl FnOnce(&mut StaticConfig),
    configure_dynamic: impl FnOnce(&mut DynamicConfig),
) -> Arc<RuntimeConfig> {
    let mut static_config = StaticConfig::default();
    let mut dynamic = DynamicConfig::default();
    configure_static(&mut static_config);
    configure_dynamic(&mut dynamic);
    Arc::new(RuntimeConfig::new(static_config, dynamic))
}

/// Deterministic bag-of-words embedding: texts sharing words land close together.
pub struct HashEmbedder {
    pub calls: AtomicUsize,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every call sleeps first; used for timeouts and concurrency checks.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; TEST_DIMENSION];
    for word in text.split_whitespace() {
        let word = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if word.is_empty() {
            continue;
        }
        // FNV-1a keeps buckets stable across runs
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in word.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        vector[(hash % TEST_DIMENSION as u64) as usize] += 1.0;
    }
    vector
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(bag_of_words(text))
    }

    fn dimension(&self) -> Option<usize> {
        Some(TEST_DIMENSION)
    }
}

/// Serves canned pages keyed by path. Unknown paths are missing files.
#[derive(Default)]
pub struct FakeLoader {
    documents: HashMap<PathBuf, Vec<PageText>>,
    panic_on: Option<PathBuf>,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, path: &str, pages: &[&str]) -> Self {
        let pages = pages
            .iter()
            .enumerate()
            .map(|(i, text)| PageText {
                page_number: i as u32 + 1,
                text: text.to_string(),
            })
            .collect();
        self.documents.insert(PathBuf::from(path), pages);
        self
    }

    pub fn panicking_on(mut self, path: &str) -> Self {
        self.panic_on = Some(PathBuf::from(path));
        self
    }
}

#[async_trait]
impl DocumentLoader for FakeLoader {
    async fn load(&self, path: &Path) -> Result<Vec<PageText>, LoadError> {
        if self.panic_on.as_deref() == Some(path) {
            panic!("loader exploded on {}", path.display());
        }
        self.documents
            .get(path)
            .cloned()
            .ok_or_else(|| LoadError::NotFound {
                path: path.display().to_string(),
            })
    }
}

/// Records every prompt and answers with a fixed reply, or fails.
pub struct RecordingModel {
    pub prompts: Mutex<Vec<(String, String)>>,
    reply: Result<String, u16>,
}

impl RecordingModel {
    pub fn answering(reply: &str) -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
            reply: Ok(reply.to_string()),
        }
    }

    pub fn failing(status: u16) -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
            reply: Err(status),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for RecordingModel {
    async fn complete(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<String, CompletionError> {
        self.prompts
            .lock()
            .unwrap()
            .push((system_prompt.to_string(), user_message.to_string()));
        match &self.reply {
            Ok(reply) => Ok(reply.clone()),
            Err(status) => Err(CompletionError::Provider {
                status: *status,
                message: "model crashed".to_string(),
            }),
        }
    }
}
