//! Typed objects from untrusted model output
//!
//! Responses are cleaned of markdown fences, parsed as JSON, stripped of
//! records with empty required fields, then validated. Parse failures map to
//! [`Error::Parse`]; schema violations to [`Error::Validation`] with one
//! [`FieldError`] per offending field.

use serde::de::DeserializeOwned;
use tracing::debug;

use super::provider::{AiProvider, AiResponse, GenerationConfig};
use crate::error::{Error, FieldError, Result};

/// A response shape that can be checked after deserialization
pub trait StructuredOutput: DeserializeOwned {
    /// Drop records with empty required fields, returning how many were dropped
    fn retain_complete(&mut self) -> usize {
        0
    }

    /// Remaining schema violations
    fn validate(&self) -> Vec<FieldError>;
}

/// Isolate the JSON payload inside a model response
pub fn extract_json(response: &str) -> &str {
    if let Some(start) = response.find("```json") {
        let json_start = start + 7;
        if let Some(end) = response[json_start..].find("```") {
            return response[json_start..json_start + end].trim();
        }
    }

    if let Some(start) = response.find("```") {
        let potential_start = start + 3;
        if let Some(newline) = response[potential_start..].find('\n') {
            let json_start = potential_start + newline + 1;
            if let Some(end) = response[json_start..].find("```") {
                return response[json_start..json_start + end].trim();
            }
        }
    }

    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}')) {
        if start < end {
            return &response[start..=end];
        }
    }

    response.trim()
}

/// Parse then validate a raw response into `T`
pub fn parse_object<T: StructuredOutput>(raw: &str, operation: &str) -> Result<T> {
    let json = extract_json(raw);
    if json.is_empty() {
        return Err(Error::parse(operation, "empty response"));
    }

    let mut value: T = serde_json::from_str(json).map_err(|e| Error::parse(operation, e.to_string()))?;

    let dropped = value.retain_complete();
    if dropped > 0 {
        debug!(operation = %operation, dropped, "Dropped records with empty required fields");
    }

    let fields = value.validate();
    if !fields.is_empty() {
        return Err(Error::Validation {
            operation: operation.to_string(),
            fields,
        });
    }

    Ok(value)
}

/// Generate text with `provider` and parse it into `T`
pub async fn generate_object<T: StructuredOutput>(
    provider: &dyn AiProvider,
    prompt: &str,
    config: &GenerationConfig,
    operation: &str,
) -> Result<AiResponse<T>> {
    let response = provider.generate_text(prompt, config).await?;
    let parsed = parse_object::<T>(&response.content, operation)?;
    Ok(response.map(|_| parsed))
}

/// Top-level JSON objects found anywhere in `raw`, in order
///
/// Used to recover well-formed records from a response whose envelope is
/// broken (truncated arrays, trailing prose, stray commas).
pub fn scan_json_objects(raw: &str) -> Vec<serde_json::Value> {
    let bytes = raw.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        match balanced_object_end(&bytes[i..]) {
            Some(len) => {
                if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes[i..i + len])
                {
                    found.push(value);
                    i += len;
                    continue;
                }
                i += 1;
            }
            None => i += 1,
        }
    }

    found
}

/// Length of the brace-balanced object starting at `bytes[0]`
fn balanced_object_end(bytes: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, &b) in bytes.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx + 1);
                }
            }
            _ => {}
        }
    }
    None
}
