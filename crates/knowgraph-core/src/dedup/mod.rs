//! Triple deduplication
//!
//! Exact duplicates (same subject, predicate, object and type after trim and
//! lowercase) always collapse. When semantic matching is on, triples whose
//! sentence embeddings reach the similarity threshold merge too.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::DedupConfig;
use crate::embedding::EmbeddingMap;
use crate::knowledge::Triple;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeReason {
    Exact,
    Semantic,
}

/// Audit entry for one merged-away triple
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeRecord {
    pub kept_id: String,
    pub removed_id: String,
    /// Cosine similarity for semantic merges, 1.0 for exact ones
    pub similarity: f32,
    pub reason: MergeReason,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeduplicationResult {
    pub unique: Vec<Triple>,
    pub duplicates_removed: usize,
    pub merges: Vec<MergeRecord>,
}

impl DeduplicationResult {
    /// Ids merged away that differ from the id they merged into
    pub fn removed_ids(&self) -> Vec<String> {
        self.merges
            .iter()
            .filter(|m| m.removed_id != m.kept_id)
            .map(|m| m.removed_id.clone())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct DeduplicationEngine {
    config: DedupConfig,
}

impl DeduplicationEngine {
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Collapse duplicates; `embeddings` enables the semantic pass
    pub fn deduplicate(&self, triples: Vec<Triple>, embeddings: Option<&EmbeddingMap>) -> DeduplicationResult {
        let input_len = triples.len();
        let (unique, mut merges) = exact_pass(triples);

        let unique = match embeddings {
            Some(map) if self.config.semantic => {
                let (kept, semantic) = semantic_pass(unique, map, self.config.similarity_threshold);
                merges.extend(semantic);
                kept
            }
            _ => unique,
        };

        let duplicates_removed = input_len - unique.len();
        info!(
            input = input_len,
            unique = unique.len(),
            duplicates_removed,
            "Deduplication complete"
        );

        DeduplicationResult {
            unique,
            duplicates_removed,
            merges,
        }
    }
}

fn exact_pass(triples: Vec<Triple>) -> (Vec<Triple>, Vec<MergeRecord>) {
    let mut unique: Vec<Triple> = Vec::with_capacity(triples.len());
    let mut by_key: HashMap<String, usize> = HashMap::new();
    let mut merges = Vec::new();

    for triple in triples {
        match by_key.get(&triple.normalized_key()) {
            Some(&i) => {
                let kept = &mut unique[i];
                union_sources(&mut kept.source, &triple.source);
                kept.confidence = kept.confidence.max(triple.confidence);
                merges.push(MergeRecord {
                    kept_id: kept.id(),
                    removed_id: triple.id(),
                    similarity: 1.0,
                    reason: MergeReason::Exact,
                });
            }
            None => {
                by_key.insert(triple.normalized_key(), unique.len());
                unique.push(triple);
            }
        }
    }

    (unique, merges)
}

fn semantic_pass(
    triples: Vec<Triple>,
    embeddings: &EmbeddingMap,
    threshold: f32,
) -> (Vec<Triple>, Vec<MergeRecord>) {
    let texts: Vec<String> = triples.iter().map(Triple::semantic_text).collect();
    let mut removed = vec![false; triples.len()];
    let mut merges = Vec::new();

    for i in 0..triples.len() {
        if removed[i] {
            continue;
        }
        let Some(a) = embeddings.get(&texts[i]) else {
            continue;
        };

        for j in (i + 1)..triples.len() {
            if removed[j] {
                continue;
            }
            let Some(b) = embeddings.get(&texts[j]) else {
                continue;
            };

            let similarity = cosine_similarity(a, b);
            if similarity < threshold {
                continue;
            }

            let (keep, drop) = if triples[j].confidence > triples[i].confidence {
                (j, i)
            } else {
                (i, j)
            };
            removed[drop] = true;
            debug!(
                kept = %texts[keep],
                removed = %texts[drop],
                similarity,
                "Merged semantically similar triples"
            );
            merges.push(MergeRecord {
                kept_id: triples[keep].id(),
                removed_id: triples[drop].id(),
                similarity,
                reason: MergeReason::Semantic,
            });

            if drop == i {
                break;
            }
        }
    }

    let kept = triples
        .into_iter()
        .zip(removed)
        .filter_map(|(t, gone)| (!gone).then_some(t))
        .collect();
    (kept, merges)
}

/// Append each comma-separated source in `incoming` not already present
fn union_sources(existing: &mut String, incoming: &str) {
    for source in incoming.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !existing.split(',').map(str::trim).any(|s| s == source) {
            if !existing.is_empty() {
                existing.push_str(", ");
            }
            existing.push_str(source);
        }
    }
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
