//! Shared fakes for the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use knowgraph_core::config::{
    CircuitBreakerConfig, Config, DedupConfig, ExtractionStrategy, ResilienceConfig, RetryConfig,
};
use knowgraph_core::knowledge::{
    ConceptNode, ConceptualizationRelationship, Triple, VectorEmbedding, VectorOwner, VectorType,
};
use knowgraph_core::llm::{AiProvider, AiResponse, EmbeddingProvider, GenerationConfig};
use knowgraph_core::pipeline::{PipelineCoordinator, PipelineServices};
use knowgraph_core::storage::{
    Databases, EntityCount, EntityQuery, InsertOutcome, KnowledgeBatch, KnowledgeStats, KnowledgeStore,
    SqliteJobRepository, SqliteKnowledgeStore, SqliteVectorStore, StoredIds, VectorMatch, VectorStats, VectorStore,
};
use knowgraph_core::{Error, Result};

pub const DIM: usize = 8;

type Responder = dyn Fn(&str) -> Result<String> + Send + Sync;

/// AI provider answering from a closure over the prompt
pub struct ScriptedAi {
    respond: Box<Responder>,
    pub calls: AtomicUsize,
}

impl ScriptedAi {
    pub fn new(respond: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiProvider for ScriptedAi {
    async fn generate_text(&self, prompt: &str, _config: &GenerationConfig) -> Result<AiResponse<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(prompt).map(|body| AiResponse::new(body, "scripted"))
    }
}

/// Deterministic embeddings derived from the text bytes
pub struct HashEmbedder;

pub fn embed(text: &str) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    for (i, b) in text.bytes().enumerate() {
        v[(i + b as usize) % DIM] += f32::from(b) / 255.0;
    }
    v
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| embed(t)).collect())
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

/// Vector store that fails every insert after `succeed` successful ones
pub struct FlakyVectorStore {
    inner: SqliteVectorStore,
    succeed: usize,
    inserts: AtomicUsize,
}

impl FlakyVectorStore {
    pub fn new(inner: SqliteVectorStore, succeed: usize) -> Self {
        Self {
            inner,
            succeed,
            inserts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VectorStore for FlakyVectorStore {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn insert(&self, vector: &VectorEmbedding) -> Result<bool> {
        if self.inserts.fetch_add(1, Ordering::SeqCst) >= self.succeed {
            return Err(Error::Other("vector store offline".to_string()));
        }
        self.inner.insert(vector).await
    }

    async fn delete_by_owners(&self, triple_ids: &[String], concept_ids: &[String]) -> Result<u64> {
        self.inner.delete_by_owners(triple_ids, concept_ids).await
    }

    async fn count_by_owners(&self, triple_ids: &[String], concept_ids: &[String]) -> Result<u64> {
        self.inner.count_by_owners(triple_ids, concept_ids).await
    }

    async fn vectors_for(&self, owner: &VectorOwner) -> Result<Vec<VectorEmbedding>> {
        self.inner.vectors_for(owner).await
    }

    async fn search(
        &self,
        query: &[f32],
        types: &[VectorType],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<VectorMatch>> {
        self.inner.search(query, types, limit, threshold).await
    }

    async fn stats(&self) -> Result<VectorStats> {
        self.inner.stats().await
    }
}

/// Knowledge store whose compensating delete always fails
pub struct UndeletableKnowledgeStore {
    inner: SqliteKnowledgeStore,
}

impl UndeletableKnowledgeStore {
    pub fn new(inner: SqliteKnowledgeStore) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl KnowledgeStore for UndeletableKnowledgeStore {
    async fn insert_batch(&self, batch: &KnowledgeBatch) -> Result<InsertOutcome> {
        self.inner.insert_batch(batch).await
    }

    async fn get_triples(&self, ids: &[String]) -> Result<Vec<Triple>> {
        self.inner.get_triples(ids).await
    }

    async fn get_triples_by_source(&self, source: &str) -> Result<Vec<Triple>> {
        self.inner.get_triples_by_source(source).await
    }

    async fn get_concepts(&self, ids: &[String]) -> Result<Vec<ConceptNode>> {
        self.inner.get_concepts(ids).await
    }

    async fn get_conceptualizations(&self, ids: &[String]) -> Result<Vec<ConceptualizationRelationship>> {
        self.inner.get_conceptualizations(ids).await
    }

    async fn delete_stored(&self, _ids: &StoredIds) -> Result<u64> {
        Err(Error::Other("knowledge database is read-only".to_string()))
    }

    async fn delete_triples(&self, ids: &[String]) -> Result<u64> {
        self.inner.delete_triples(ids).await
    }

    async fn entities(&self, query: &EntityQuery) -> Result<Vec<EntityCount>> {
        self.inner.entities(query).await
    }

    async fn stats(&self) -> Result<KnowledgeStats> {
        self.inner.stats().await
    }
}

/// Config with fast, non-retrying resilience and exact-only dedup
pub fn test_config(strategy: ExtractionStrategy) -> Config {
    let mut config = Config::default();
    config.extraction.strategy = strategy;
    config.embedding.dimension = DIM;
    config.embedding.batch_size = 16;
    config.dedup = DedupConfig {
        enabled: true,
        semantic: false,
        similarity_threshold: 0.85,
    };
    config.resilience = ResilienceConfig {
        retry: RetryConfig {
            max_retries: 0,
            base_delay_ms: 1,
            max_delay_ms: 5,
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            timeout_ms: 5_000,
            reset_timeout_ms: 1_000,
        },
    };
    config
}

/// Stores and a coordinator wired to in-memory databases
pub struct Harness {
    pub dbs: Databases,
    pub knowledge: Arc<SqliteKnowledgeStore>,
    pub vectors: Arc<SqliteVectorStore>,
    pub jobs: Arc<SqliteJobRepository>,
    pub coordinator: PipelineCoordinator,
}

impl Harness {
    pub async fn new(ai: Arc<dyn AiProvider>, config: &Config) -> Self {
        Self::with_vector_store(ai, config, None).await
    }

    /// `flaky` replaces the vector store seen by the pipeline
    pub async fn with_vector_store(ai: Arc<dyn AiProvider>, config: &Config, flaky: Option<usize>) -> Self {
        let dbs = Databases::in_memory().await.expect("in-memory databases");
        let knowledge = Arc::new(SqliteKnowledgeStore::new(
            dbs.knowledge().pool().clone(),
            &config.storage,
        ));
        let vectors = Arc::new(SqliteVectorStore::new(dbs.vectors().pool().clone(), DIM));
        let jobs = Arc::new(SqliteJobRepository::new(dbs.knowledge().pool().clone()));

        let pipeline_vectors: Arc<dyn VectorStore> = match flaky {
            Some(succeed) => Arc::new(FlakyVectorStore::new(
                SqliteVectorStore::new(dbs.vectors().pool().clone(), DIM),
                succeed,
            )),
            None => vectors.clone(),
        };

        let coordinator = PipelineCoordinator::new(
            PipelineServices {
                ai,
                embedder: Arc::new(HashEmbedder),
                knowledge: knowledge.clone(),
                vectors: pipeline_vectors,
                jobs: jobs.clone(),
            },
            config,
        );

        Self {
            dbs,
            knowledge,
            vectors,
            jobs,
            coordinator,
        }
    }
}

pub fn triples_json(triples: &[(&str, &str, &str, f64)]) -> String {
    let items: Vec<serde_json::Value> = triples
        .iter()
        .map(|(s, p, o, c)| serde_json::json!({"subject": s, "predicate": p, "object": o, "confidence": c}))
        .collect();
    serde_json::json!({ "triples": items }).to_string()
}

pub fn concepts_json() -> String {
    serde_json::json!({
        "concepts": [
            {"concept": "Organization", "abstraction_level": "high", "confidence": 0.9}
        ],
        "conceptualizations": [
            {"source_element": "Acme", "element_type": "entity", "concept": "Organization", "confidence": 0.8}
        ]
    })
    .to_string()
}

pub fn is_concept_prompt(prompt: &str) -> bool {
    prompt.contains("Group the elements")
}

/// Which four-stage call a prompt belongs to, if any
pub fn stage_of(prompt: &str) -> Option<&'static str> {
    ["entity-entity", "entity-event", "event-event", "emotional-context"]
        .into_iter()
        .find(|t| prompt.contains(&format!("Set \"type\" to \"{}\"", t)))
}

/// Paragraph of exactly `len` characters
pub fn paragraph(lead: &str, word: &str, len: usize) -> String {
    let mut s = String::from(lead);
    while s.len() < len {
        s.push_str(word);
        s.push(' ');
    }
    s.truncate(len - 1);
    s.push('.');
    s
}
