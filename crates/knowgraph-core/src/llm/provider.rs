//! Provider seams for text generation and embeddings

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

/// Per-call generation settings; unset fields fall back to the provider's defaults
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationConfig {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    /// Request a JSON object response
    pub json_output: bool,
}

impl GenerationConfig {
    pub fn json() -> Self {
        Self {
            json_output: true,
            ..Self::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A provider response with the model that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct AiResponse<T> {
    pub content: T,
    pub model: String,
    pub usage: TokenUsage,
}

impl<T> AiResponse<T> {
    pub fn new(content: T, model: impl Into<String>) -> Self {
        Self {
            content,
            model: model.into(),
            usage: TokenUsage::default(),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> AiResponse<U> {
        AiResponse {
            content: f(self.content),
            model: self.model,
            usage: self.usage,
        }
    }
}

/// Text generation backend
///
/// Implementations classify failures through [`crate::Error::is_retryable`]
/// so the resilience layer can decide what to retry.
#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn generate_text(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<AiResponse<String>>;
}

/// Embedding backend
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// One vector per input, in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;
}
