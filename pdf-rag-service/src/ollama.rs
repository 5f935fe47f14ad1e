use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::error::{CompletionError, EmbeddingError, ServiceError, ServiceResult};
use crate::providers::{EmbeddingProvider, LanguageModel};

/// Ollama API client.
///
/// Reads the base URL and model names from the live config on every request,
/// so settings changes take effect without a restart. Per-call deadlines are
/// applied by the callers.
pub struct OllamaClient {
    client: Client,
    config: Arc<RuntimeConfig>,
    /// Length of the last embedding returned; 0 until the first one
    dimension: AtomicUsize,
}

impl OllamaClient {
    pub fn new(config: Arc<RuntimeConfig>) -> ServiceResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                ServiceError::Embedding(EmbeddingError::Connection {
                    url: config.dynamic().ollama.base_url.clone(),
                    source: e,
                })
            })?;

        Ok(Self {
            client,
            config,
            dimension: AtomicUsize::new(0),
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}{}",
            self.config.dynamic().ollama.base_url.trim_end_matches('/'),
            path
        )
    }

    /// Check if Ollama is reachable
    pub async fn health_check(&self) -> bool {
        let url = self.url("/api/tags");

        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(error = %e, "Ollama health check failed");
                false
            }
        }
    }

    /// Names of the models the server has pulled
    pub async fn list_models(&self) -> Result<Vec<String>, CompletionError> {
        let url = self.url("/api/tags");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CompletionError::Connection {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(CompletionError::Provider {
                status: response.status().as_u16(),
                message: "Failed to list models".to_string(),
            });
        }

        let tags: TagsResponse =
            response
                .json()
                .await
                .map_err(|e| CompletionError::InvalidResponse {
                    message: e.to_string(),
                })?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

/// Pull the body out of a failed response for error reporting
async fn error_body(response: Response) -> (u16, String) {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    (status, message)
}

fn is_model_missing(message: &str) -> bool {
    message.contains("model") && (message.contains("not found") || message.contains("does not exist"))
}

#[async_trait]
impl EmbeddingProvider for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = self.url("/api/embeddings");
        let model = self.config.dynamic().embeddings.model.clone();

        let request = EmbeddingRequest {
            model: &model,
            prompt: text,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbeddingError::Connection {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            let (status, message) = error_body(response).await;
            let message = if is_model_missing(&message) {
                format!("embedding model {} is not available: {}", model, message)
            } else {
                message
            };
            return Err(EmbeddingError::Provider { status, message });
        }

        let body: EmbeddingResponse =
            response
                .json()
                .await
                .map_err(|e| EmbeddingError::InvalidResponse {
                    message: e.to_string(),
                })?;

        if body.embedding.is_empty() {
            return Err(EmbeddingError::InvalidResponse {
                message: format!("model {} returned an empty embedding", model),
            });
        }

        self.dimension.store(body.embedding.len(), Ordering::Relaxed);
        debug!(model = %model, dimension = body.embedding.len(), "Embedded text");
        Ok(body.embedding)
    }

    fn dimension(&self) -> Option<usize> {
        match self.dimension.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        }
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<String, CompletionError> {
        let url = self.url("/api/chat");
        let (model, temperature) = {
            let dynamic = self.config.dynamic();
            (
                dynamic.ollama.default_model.clone(),
                dynamic.ollama.temperature,
            )
        };

        let request = ChatRequest {
            model: &model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_message,
                },
            ],
            stream: false,
            options: ChatOptions { temperature },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| CompletionError::Connection {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            let (status, message) = error_body(response).await;
            if is_model_missing(&message) {
                return Err(CompletionError::ModelNotFound { model });
            }
            return Err(CompletionError::Provider { status, message });
        }

        let chat: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| CompletionError::InvalidResponse {
                    message: e.to_string(),
                })?;

        Ok(chat.message.content)
    }
}

// Ollama wire types

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}
