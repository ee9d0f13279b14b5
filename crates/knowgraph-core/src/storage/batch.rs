//! Two-phase batch storage
//!
//! The knowledge store and the vector store share no transaction, so a batch
//! moves through four phases:
//!
//! 1. `VALIDATE`: size caps, sanitization, confidence clamping
//! 2. `PHASE1_TRANSACTION`: new triples, concepts and conceptualizations in
//!    one knowledge store transaction
//! 3. `PHASE2_VECTORS`: one vector per derived text, inserted individually
//! 4. `COMPENSATION`: when phase 2 fails as a whole, every row phase 1 wrote
//!    is deleted again, followed by any vectors already written for them
//!
//! A batch either ends with its rows and (barring lookup misses) their
//! vectors stored, or with a typed error and nothing left behind.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::knowledge_store::{KnowledgeBatch, KnowledgeStore, StoredIds};
use super::sanitize::{sanitize_concept, sanitize_conceptualization, sanitize_triple};
use super::vector_store::VectorStore;
use crate::config::StorageConfig;
use crate::embedding::EmbeddingMap;
use crate::error::{Error, Result, StoragePhase};
use crate::knowledge::{ConceptNode, Triple, VectorEmbedding, VectorOwner, VectorType};

/// Per-batch caps and the lookup-miss policy
#[derive(Debug, Clone)]
pub struct BatchLimits {
    pub max_triples: usize,
    pub max_concepts: usize,
    pub max_conceptualizations: usize,
    /// `None` never escalates lookup misses
    pub max_lookup_misses: Option<usize>,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self::from(&StorageConfig::default())
    }
}

impl From<&StorageConfig> for BatchLimits {
    fn from(config: &StorageConfig) -> Self {
        Self {
            max_triples: config.max_triples_per_batch,
            max_concepts: config.max_concepts_per_batch,
            max_conceptualizations: config.max_conceptualizations_per_batch,
            max_lookup_misses: config.max_lookup_misses,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStorageResult {
    pub triples_stored: usize,
    pub concepts_stored: usize,
    pub conceptualizations_stored: usize,
    pub vectors_generated: usize,
    pub duplicates_skipped: usize,
    pub lookup_misses: usize,
    pub invalid_skipped: usize,
    /// Ids of newly stored triples
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub triple_ids: Vec<String>,
}

/// Texts to embed for one newly stored row
struct VectorPlan {
    owner: VectorOwner,
    texts: Vec<(VectorType, String)>,
}

impl VectorPlan {
    fn for_triple(id: &str, triple: &Triple) -> Self {
        Self {
            owner: VectorOwner::Triple(id.to_string()),
            texts: vec![
                (VectorType::Entity, triple.subject.clone()),
                (VectorType::Entity, triple.object.clone()),
                (VectorType::Relationship, triple.predicate.clone()),
                (VectorType::Semantic, triple.semantic_text()),
            ],
        }
    }

    fn for_concept(id: &str, concept: &ConceptNode) -> Self {
        Self {
            owner: VectorOwner::Concept(id.to_string()),
            texts: vec![(VectorType::Concept, concept.concept.clone())],
        }
    }
}

/// Reason phase 2 gave up on the whole batch
#[derive(Debug)]
enum VectorPhaseFailure {
    Store(Error),
    TooManyMisses { misses: usize, limit: usize },
}

impl std::fmt::Display for VectorPhaseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "{}", e),
            Self::TooManyMisses { misses, limit } => {
                write!(f, "{} embedding lookup misses exceed the limit of {}", misses, limit)
            }
        }
    }
}

pub struct BatchStorageEngine {
    knowledge: Arc<dyn KnowledgeStore>,
    vectors: Arc<dyn VectorStore>,
    limits: BatchLimits,
}

impl BatchStorageEngine {
    pub fn new(knowledge: Arc<dyn KnowledgeStore>, vectors: Arc<dyn VectorStore>, limits: BatchLimits) -> Self {
        Self {
            knowledge,
            vectors,
            limits,
        }
    }

    pub fn limits(&self) -> &BatchLimits {
        &self.limits
    }

    /// Store a batch and the vectors for whatever it newly created
    pub async fn store(&self, batch: KnowledgeBatch, embeddings: &EmbeddingMap) -> Result<BatchStorageResult> {
        let (batch, invalid_skipped) = self.validate(batch)?;
        let mut result = BatchStorageResult {
            invalid_skipped,
            ..Default::default()
        };
        if batch.is_empty() {
            debug!(invalid_skipped, "Nothing to store after validation");
            return Ok(result);
        }

        let outcome = self
            .knowledge
            .insert_batch(&batch)
            .await
            .map_err(|e| Error::storage_caused_by(StoragePhase::Phase1Transaction, e))?;
        result.duplicates_skipped = outcome.duplicates_skipped;
        let stored = outcome.stored;

        match self.generate_vectors(&batch, &stored, embeddings).await {
            Ok((vectors_generated, lookup_misses)) => {
                result.triples_stored = stored.triple_ids.len();
                result.concepts_stored = stored.concept_ids.len();
                result.conceptualizations_stored = stored.conceptualization_ids.len();
                result.vectors_generated = vectors_generated;
                result.lookup_misses = lookup_misses;
                result.triple_ids = stored.triple_ids;

                info!(
                    triples = result.triples_stored,
                    concepts = result.concepts_stored,
                    conceptualizations = result.conceptualizations_stored,
                    vectors = result.vectors_generated,
                    duplicates_skipped = result.duplicates_skipped,
                    lookup_misses = result.lookup_misses,
                    invalid_skipped = result.invalid_skipped,
                    "Batch stored"
                );
                Ok(result)
            }
            Err(failure) => {
                warn!(
                    error = %failure,
                    triples = stored.triple_ids.len(),
                    concepts = stored.concept_ids.len(),
                    "Vector phase failed, compensating"
                );
                let compensated = self.compensate(&stored).await;
                Err(Error::VectorGenerationRollback {
                    message: failure.to_string(),
                    compensated,
                })
            }
        }
    }

    /// Enforce caps before any I/O, then sanitize record by record
    fn validate(&self, batch: KnowledgeBatch) -> Result<(KnowledgeBatch, usize)> {
        let caps = [
            ("triples", batch.triples.len(), self.limits.max_triples),
            ("concepts", batch.concepts.len(), self.limits.max_concepts),
            (
                "conceptualizations",
                batch.conceptualizations.len(),
                self.limits.max_conceptualizations,
            ),
        ];
        for (what, count, cap) in caps {
            if count > cap {
                return Err(Error::storage(
                    StoragePhase::Validate,
                    format!("batch has {} {}, limit is {}", count, what, cap),
                ));
            }
        }

        let submitted = batch.triples.len() + batch.concepts.len() + batch.conceptualizations.len();
        let clean = KnowledgeBatch {
            triples: batch.triples.iter().filter_map(sanitize_triple).collect(),
            concepts: batch.concepts.iter().filter_map(sanitize_concept).collect(),
            conceptualizations: batch
                .conceptualizations
                .iter()
                .filter_map(sanitize_conceptualization)
                .collect(),
        };
        let kept = clean.triples.len() + clean.concepts.len() + clean.conceptualizations.len();
        let invalid_skipped = submitted - kept;
        if invalid_skipped > 0 {
            warn!(invalid_skipped, "Rejected records with empty required fields");
        }

        Ok((clean, invalid_skipped))
    }

    async fn generate_vectors(
        &self,
        batch: &KnowledgeBatch,
        stored: &StoredIds,
        embeddings: &EmbeddingMap,
    ) -> std::result::Result<(usize, usize), VectorPhaseFailure> {
        let plans = plan_vectors(batch, stored);
        let mut generated = 0;
        let mut misses = 0;

        for plan in plans {
            for (vector_type, text) in plan.texts {
                let Some(vector) = embeddings.get(&text) else {
                    misses += 1;
                    warn!(
                        owner = plan.owner.id(),
                        vector_type = vector_type.as_str(),
                        text = %text,
                        "Embedding lookup miss, skipping vector"
                    );
                    if let Some(limit) = self.limits.max_lookup_misses {
                        if misses > limit {
                            return Err(VectorPhaseFailure::TooManyMisses { misses, limit });
                        }
                    }
                    continue;
                };

                let embedding = VectorEmbedding::new(plan.owner.clone(), vector_type, text, vector.to_vec());
                if self.vectors.insert(&embedding).await.map_err(VectorPhaseFailure::Store)? {
                    generated += 1;
                }
            }
        }

        Ok((generated, misses))
    }

    /// Undo phase 1; returns whether the knowledge rows were removed
    async fn compensate(&self, stored: &StoredIds) -> bool {
        let compensated = match self.knowledge.delete_stored(stored).await {
            Ok(deleted) => {
                info!(deleted, "Compensation removed phase 1 rows");
                true
            }
            Err(e) => {
                error!(
                    error = %e,
                    triple_ids = ?stored.triple_ids,
                    concept_ids = ?stored.concept_ids,
                    conceptualization_ids = ?stored.conceptualization_ids,
                    "Compensation failed, manual intervention required"
                );
                false
            }
        };

        if let Err(e) = self
            .vectors
            .delete_by_owners(&stored.triple_ids, &stored.concept_ids)
            .await
        {
            error!(
                error = %e,
                triple_ids = ?stored.triple_ids,
                "Could not remove vectors written before the failure, manual intervention required"
            );
        }

        compensated
    }
}

/// Vector plans for rows this batch created, in batch order
fn plan_vectors(batch: &KnowledgeBatch, stored: &StoredIds) -> Vec<VectorPlan> {
    let new_triples: std::collections::HashSet<&str> = stored.triple_ids.iter().map(String::as_str).collect();
    let new_concepts: std::collections::HashSet<&str> = stored.concept_ids.iter().map(String::as_str).collect();

    let mut plans = Vec::new();
    let mut planned = std::collections::HashSet::new();
    for triple in &batch.triples {
        let id = triple.id();
        if new_triples.contains(id.as_str()) && planned.insert(id.clone()) {
            plans.push(VectorPlan::for_triple(&id, triple));
        }
    }
    for concept in &batch.concepts {
        let id = concept.id();
        if new_concepts.contains(id.as_str()) && planned.insert(id.clone()) {
            plans.push(VectorPlan::for_concept(&id, concept));
        }
    }
    plans
}
