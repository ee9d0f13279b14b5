//! LLM integration - OpenRouter API
//!
//! This module provides:
//! - Provider traits for text generation and embeddings
//! - OpenRouter HTTP client implementing both
//! - Parse-then-validate helpers for structured model output

mod client;
mod provider;
mod structured;
mod types;

pub use client::{LlmClient, LlmClientBuilder};
pub use provider::{AiProvider, AiResponse, EmbeddingProvider, GenerationConfig, TokenUsage};
pub use structured::{
    StructuredOutput, extract_json, generate_object, parse_object, scan_json_objects,
};
pub use types::{ChatRequest, ChatResponse, FinishReason, Message, MessageRole, Usage};
