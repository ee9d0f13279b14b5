//! Embedding cache: one text-to-vector map per job
//!
//! Texts are deduplicated before any provider call, sent in batches through
//! the resilience layer, and checked for count and dimension. The finished
//! map is read-only.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::knowledge::{ConceptNode, Triple};
use crate::llm::EmbeddingProvider;
use crate::resilience::Resilience;

/// Resilience key shared by every embedding call
pub const EMBEDDING_KEY: &str = "embedding:batch";

/// Text to vector lookup built once per job
#[derive(Debug, Clone, Default)]
pub struct EmbeddingMap {
    vectors: HashMap<String, Vec<f32>>,
}

impl EmbeddingMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, text: &str) -> Option<&[f32]> {
        self.vectors.get(text.trim()).map(Vec::as_slice)
    }

    pub fn contains(&self, text: &str) -> bool {
        self.vectors.contains_key(text.trim())
    }

    pub fn insert(&mut self, text: impl Into<String>, vector: Vec<f32>) {
        let text = text.into();
        self.vectors.insert(text.trim().to_string(), vector);
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

impl FromIterator<(String, Vec<f32>)> for EmbeddingMap {
    fn from_iter<I: IntoIterator<Item = (String, Vec<f32>)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (text, vector) in iter {
            map.insert(text, vector);
        }
        map
    }
}

/// Texts embedded for a triple: subject, object, predicate, sentence
pub fn triple_texts(triples: &[Triple]) -> Vec<String> {
    triples
        .iter()
        .flat_map(|t| {
            [
                t.subject.clone(),
                t.object.clone(),
                t.predicate.clone(),
                t.semantic_text(),
            ]
        })
        .collect()
}

pub fn concept_texts(concepts: &[ConceptNode]) -> Vec<String> {
    concepts.iter().map(|c| c.concept.clone()).collect()
}

/// Distinct non-empty trimmed texts, first-seen order
pub fn unique_texts<I>(texts: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    texts
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

pub struct EmbeddingCache {
    provider: Arc<dyn EmbeddingProvider>,
    resilience: Resilience,
    batch_size: usize,
}

impl EmbeddingCache {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, resilience: Resilience, batch_size: usize) -> Self {
        Self {
            provider,
            resilience,
            batch_size: batch_size.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Embed every distinct text once and return the lookup map
    pub async fn build_map<I>(&self, texts: I) -> Result<EmbeddingMap>
    where
        I: IntoIterator<Item = String>,
    {
        let unique = unique_texts(texts);
        let mut map = EmbeddingMap::new();
        if unique.is_empty() {
            return Ok(map);
        }

        let dimension = self.provider.dimension();
        let batches = unique.len().div_ceil(self.batch_size);
        debug!(texts = unique.len(), batches, "Building embedding map");

        for batch in unique.chunks(self.batch_size) {
            let vectors = self
                .resilience
                .execute(EMBEDDING_KEY, || self.provider.embed_batch(batch))
                .await
                .map_err(|e| match e {
                    e @ Error::Embedding { .. } => e,
                    other => Error::embedding_caused_by("build_map", other),
                })?;

            if vectors.len() != batch.len() {
                return Err(Error::embedding(
                    "build_map",
                    format!("provider returned {} vectors for {} texts", vectors.len(), batch.len()),
                ));
            }

            for (text, vector) in batch.iter().zip(vectors) {
                if vector.len() != dimension {
                    return Err(Error::embedding(
                        "build_map",
                        format!(
                            "vector for '{}' has dimension {}, expected {}",
                            truncate(text, 40),
                            vector.len(),
                            dimension
                        ),
                    ));
                }
                map.insert(text.clone(), vector);
            }
        }

        info!(texts = map.len(), batches, "Embedding map ready");
        Ok(map)
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
