//! OpenRouter LLM client implementation
//!
//! Provides an async HTTP client for the OpenRouter API with:
//! - Chat completions with model fallback
//! - Batched embeddings
//! - HTTP status classification into retryable and terminal errors
//!
//! Retrying is left to the resilience layer; the client makes exactly one
//! request per model per call.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use tracing::{debug, error, info, warn};

use crate::config::{EmbeddingConfig, LlmConfig};
use crate::error::{Error, Result};

use super::provider::{AiProvider, AiResponse, EmbeddingProvider, GenerationConfig, TokenUsage};
use super::types::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, Message};

/// OpenRouter API base URL
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Wait used when a 429 carries no retry hint
const DEFAULT_RATE_LIMIT_WAIT_SECS: u64 = 60;

/// OpenRouter LLM client
///
/// Thread-safe client for chat completions and embeddings.
#[derive(Clone)]
pub struct LlmClient {
    http_client: HttpClient,
    config: LlmConfig,
    embedding: EmbeddingConfig,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.base_url)
            .field("default_model", &self.config.default_model)
            .field("embedding_model", &self.embedding.model)
            .finish()
    }
}

/// Builder for creating an LlmClient
#[derive(Default)]
pub struct LlmClientBuilder {
    config: Option<LlmConfig>,
    embedding: Option<EmbeddingConfig>,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

impl LlmClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: LlmConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn embedding(mut self, embedding: EmbeddingConfig) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the base URL (defaults to OpenRouter)
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn build(self) -> Result<LlmClient> {
        let config = self.config.unwrap_or_default();
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::LLMError("API key is required".to_string()))?;

        let timeout_secs = self.timeout_secs.unwrap_or(config.timeout_secs);

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(Error::NetworkError)?;

        Ok(LlmClient {
            http_client,
            config,
            embedding: self.embedding.unwrap_or_default(),
            api_key,
            base_url: self
                .base_url
                .unwrap_or_else(|| OPENROUTER_BASE_URL.to_string()),
        })
    }
}

impl LlmClient {
    pub fn new(config: LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        LlmClientBuilder::new()
            .config(config)
            .api_key(api_key)
            .build()
    }

    pub fn builder() -> LlmClientBuilder {
        LlmClientBuilder::new()
    }

    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    pub fn fallback_models(&self) -> &[String] {
        &self.config.fallback_models
    }

    /// Single chat completion against `model` (or the default)
    pub async fn complete(
        &self,
        messages: Vec<Message>,
        model: Option<&str>,
        config: &GenerationConfig,
    ) -> Result<AiResponse<String>> {
        let model = model.unwrap_or(&self.config.default_model);

        let mut request = ChatRequest::new(model, messages)
            .with_temperature(config.temperature.unwrap_or(self.config.temperature))
            .with_max_tokens(config.max_tokens.unwrap_or(self.config.max_tokens));
        if config.json_output {
            request = request.with_json_output();
        }

        self.send_chat_request(&request).await
    }

    /// Chat completion that walks the fallback list on model-level failures
    ///
    /// An explicit model in `config` disables fallback.
    pub async fn complete_with_fallback(
        &self,
        messages: Vec<Message>,
        config: &GenerationConfig,
    ) -> Result<AiResponse<String>> {
        let models = match &config.model {
            Some(model) => vec![model.clone()],
            None => {
                let mut models = vec![self.config.default_model.clone()];
                models.extend(self.config.fallback_models.clone());
                models
            }
        };

        let mut last_error = None;

        for model in &models {
            debug!(model = %model, "Attempting chat completion");

            match self.complete(messages.clone(), Some(model), config).await {
                Ok(response) => {
                    info!(
                        model = %model,
                        input_tokens = response.usage.input_tokens,
                        output_tokens = response.usage.output_tokens,
                        "Chat completion successful"
                    );
                    return Ok(response);
                }
                Err(e @ (Error::RateLimited(_) | Error::ProviderUnavailable(_))) => {
                    warn!(model = %model, error = %e, "Model unavailable, trying next model");
                    last_error = Some(e);
                }
                Err(Error::LLMError(msg)) if is_model_error(&msg) => {
                    warn!(model = %model, error = %msg, "Model error, trying next model");
                    last_error = Some(Error::LLMError(msg));
                }
                Err(e) => {
                    error!(model = %model, error = %e, "Non-recoverable error");
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::LLMError("No model configured".to_string())))
    }

    async fn send_chat_request(&self, request: &ChatRequest) -> Result<AiResponse<String>> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat completion request"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "Knowgraph")
            .json(request)
            .send()
            .await
            .map_err(Error::NetworkError)?;

        let status = response.status();
        if !status.is_success() {
            return Err(read_error_response(status, response).await);
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::LLMError(format!("Failed to parse response: {}", e)))?;

        let usage = chat_response
            .usage
            .as_ref()
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::ProviderUnavailable("Empty response from API".to_string()))?;

        Ok(AiResponse {
            content: choice.message.content,
            model: chat_response.model,
            usage,
        })
    }

    /// Embed `texts`, splitting into requests of at most `batch_size`
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.embedding.batch_size.max(1)) {
            let request = EmbeddingRequest::new(&self.embedding.model, batch.to_vec())
                .with_dimensions(self.embedding.dimension);
            vectors.extend(self.send_embedding_request(&request).await?);
        }
        Ok(vectors)
    }

    async fn send_embedding_request(&self, request: &EmbeddingRequest) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        debug!(
            model = %request.model,
            inputs = request.input.len(),
            "Sending batch embedding request"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "Knowgraph")
            .json(request)
            .send()
            .await
            .map_err(Error::NetworkError)?;

        let status = response.status();
        if !status.is_success() {
            return Err(read_error_response(status, response).await);
        }

        let embedding_response: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::embedding("embed_batch", format!("Failed to parse response: {}", e)))?;

        if embedding_response.data.len() != request.input.len() {
            return Err(Error::embedding(
                "embed_batch",
                format!(
                    "expected {} embeddings, got {}",
                    request.input.len(),
                    embedding_response.data.len()
                ),
            ));
        }

        // Sort by index to maintain order
        let mut data = embedding_response.data;
        data.sort_by_key(|d| d.index);

        let expected = self.embedding.dimension;
        if let Some(bad) = data.iter().find(|d| d.embedding.len() != expected) {
            return Err(Error::embedding(
                "embed_batch",
                format!(
                    "model {} returned dimension {}, expected {}",
                    embedding_response.model,
                    bad.embedding.len(),
                    expected
                ),
            ));
        }

        if let Some(usage) = &embedding_response.usage {
            debug!(
                model = %embedding_response.model,
                prompt_tokens = usage.prompt_tokens,
                total_tokens = usage.total_tokens,
                "Embedding batch usage"
            );
        }

        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl AiProvider for LlmClient {
    async fn generate_text(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<AiResponse<String>> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &config.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(prompt));

        self.complete_with_fallback(messages, config).await
    }
}

#[async_trait]
impl EmbeddingProvider for LlmClient {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_texts(texts).await
    }

    fn dimension(&self) -> usize {
        self.embedding.dimension
    }
}

/// Consume an error response and classify it
async fn read_error_response(status: reqwest::StatusCode, response: reqwest::Response) -> Error {
    let retry_after = retry_after_header(response.headers());
    let body = response.text().await.unwrap_or_default();
    classify_status(status.as_u16(), &body, retry_after)
}

/// Map an HTTP failure onto the retryable/terminal taxonomy
fn classify_status(status: u16, body: &str, retry_after: Option<u64>) -> Error {
    match status {
        401 => Error::LLMError(
            "Unauthorized: Invalid API key. Set KNOWGRAPH_API_KEY or OPENROUTER_API_KEY environment variable.".to_string(),
        ),
        429 => {
            let wait_secs = retry_after
                .or_else(|| extract_retry_after(body))
                .unwrap_or(DEFAULT_RATE_LIMIT_WAIT_SECS);
            Error::RateLimited(wait_secs)
        }
        400 => Error::LLMError(format!("Bad request: {}", body)),
        402 => Error::LLMError(
            "Payment required: Insufficient credits on OpenRouter account".to_string(),
        ),
        403 => Error::LLMError(format!("Forbidden: {}", body)),
        404 => Error::LLMError(format!("Model not found or endpoint unavailable: {}", body)),
        408 | 500..=599 => Error::ProviderUnavailable(format!("Server error ({}): {}", status, body)),
        _ if body.to_lowercase().contains("overloaded") => {
            Error::ProviderUnavailable(format!("HTTP {}: {}", status, body))
        }
        _ => Error::LLMError(format!("HTTP error {}: {}", status, body)),
    }
}

fn retry_after_header(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Check if an error message indicates a model-specific error
fn is_model_error(msg: &str) -> bool {
    let model_error_patterns = [
        "model not found",
        "unavailable",
        "not available",
        "no available provider",
        "overloaded",
        "capacity",
    ];

    let msg_lower = msg.to_lowercase();
    model_error_patterns
        .iter()
        .any(|pattern| msg_lower.contains(pattern))
}

/// Extract retry-after value from error response
fn extract_retry_after(body: &str) -> Option<u64> {
    let json = serde_json::from_str::<serde_json::Value>(body).ok()?;
    if let Some(retry_after) = json.get("retry_after").and_then(|v| v.as_u64()) {
        return Some(retry_after);
    }
    json.get("error")
        .and_then(|error| error.get("retry_after"))
        .and_then(|v| v.as_u64())
}
