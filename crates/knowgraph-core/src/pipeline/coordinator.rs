//! Pipeline coordinator - sequences extraction, conceptualization,
//! deduplication and storage
//!
//! Two entry points share the same stages:
//! - `process_knowledge` runs the whole flow in one call
//! - `run_job` executes one queued job; a successful extraction job with a
//!   parent id schedules its conceptualization and deduplication siblings

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{Config, PipelineConfig};
use crate::dedup::{DeduplicationEngine, DeduplicationResult};
use crate::embedding::{EmbeddingCache, EmbeddingMap, concept_texts, triple_texts};
use crate::error::{Error, Result};
use crate::extraction::{Conceptualizer, ExtractionOutcome, KnowledgeExtractor};
use crate::knowledge::{
    ConceptNode, JobMetadata, JobStatus, JobType, NewJob, ProcessingJob, Provenance, ResourceLimits, Triple,
    TripleType, VectorOwner, VectorType,
};
use crate::llm::{AiProvider, EmbeddingProvider};
use crate::resilience::{BreakerStats, Resilience};
use crate::storage::{
    BatchLimits, BatchStorageEngine, BatchStorageResult, EntityCount, EntityQuery, JobRepository, KnowledgeBatch,
    KnowledgeStats, KnowledgeStore, VectorStats, VectorStore,
};

pub const PROGRESS_STARTED: u8 = 10;
pub const PROGRESS_GENERATED: u8 = 80;
pub const PROGRESS_STORED: u8 = 95;
pub const PROGRESS_COMPLETED: u8 = 100;

/// External collaborators injected into the coordinator
#[derive(Clone)]
pub struct PipelineServices {
    pub ai: Arc<dyn AiProvider>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub vectors: Arc<dyn VectorStore>,
    pub jobs: Arc<dyn JobRepository>,
}

/// Outcome of a synchronous `process_knowledge` run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingSummary {
    pub source: String,
    pub strategy: String,
    pub chunks_total: usize,
    pub chunks_processed: usize,
    pub failed_stages: Vec<String>,
    pub salvaged: usize,
    pub triples_extracted: usize,
    pub duplicates_removed: usize,
    pub concepts_extracted: usize,
    pub conceptualization_degraded: bool,
    pub storage: BatchStorageResult,
}

/// Knowledge, vector and breaker counters in one place
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphStats {
    pub knowledge: KnowledgeStats,
    pub vectors: VectorStats,
    pub breakers: BreakerStats,
}

/// Vector types that point back at a triple
const TRIPLE_VECTOR_TYPES: [VectorType; 3] = [VectorType::Semantic, VectorType::Entity, VectorType::Relationship];

/// Filters for `search_knowledge`
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    /// Minimum cosine similarity
    pub threshold: f32,
    pub types: Vec<TripleType>,
    pub sources: Vec<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: 0.7,
            types: Vec::new(),
            sources: Vec::new(),
        }
    }
}

impl SearchOptions {
    fn is_filtered(&self) -> bool {
        !self.types.is_empty() || !self.sources.is_empty()
    }

    fn accepts(&self, triple: &Triple) -> bool {
        let type_ok = self.types.is_empty() || self.types.contains(&triple.triple_type);
        let source_ok = self.sources.is_empty()
            || triple
                .source
                .split(',')
                .map(str::trim)
                .any(|s| self.sources.iter().any(|wanted| wanted == s));
        type_ok && source_ok
    }
}

/// A triple ranked by its best-matching vector
#[derive(Debug, Clone, Serialize)]
pub struct ScoredTriple {
    pub id: String,
    pub score: f32,
    /// Text of the vector that matched
    pub matched: String,
    pub triple: Triple,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredConcept {
    pub id: String,
    pub score: f32,
    pub concept: ConceptNode,
}

/// What a finished stage hands back to `run_job`
struct StageOutput {
    result: serde_json::Value,
    downstream: Vec<NewJob>,
}

pub struct PipelineCoordinator {
    extractor: KnowledgeExtractor,
    conceptualizer: Conceptualizer,
    dedup: DeduplicationEngine,
    embeddings: EmbeddingCache,
    storage: BatchStorageEngine,
    knowledge: Arc<dyn KnowledgeStore>,
    vectors: Arc<dyn VectorStore>,
    jobs: Arc<dyn JobRepository>,
    resilience: Resilience,
    config: PipelineConfig,
    tracker: TaskTracker,
}

impl PipelineCoordinator {
    pub fn new(services: PipelineServices, config: &Config) -> Self {
        let resilience = Resilience::new(config.resilience.clone());

        Self {
            extractor: KnowledgeExtractor::new(
                Arc::clone(&services.ai),
                resilience.clone(),
                config.extraction.clone(),
            ),
            conceptualizer: Conceptualizer::new(Arc::clone(&services.ai), resilience.clone()),
            dedup: DeduplicationEngine::new(config.dedup.clone()),
            embeddings: EmbeddingCache::new(services.embedder, resilience.clone(), config.embedding.batch_size),
            storage: BatchStorageEngine::new(
                Arc::clone(&services.knowledge),
                Arc::clone(&services.vectors),
                BatchLimits::from(&config.storage),
            ),
            knowledge: services.knowledge,
            vectors: services.vectors,
            jobs: services.jobs,
            resilience,
            config: config.pipeline.clone(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn resilience(&self) -> &Resilience {
        &self.resilience
    }

    /// Run extract, conceptualize, dedup, embed and store in one call
    pub async fn process_knowledge(&self, text: &str, provenance: &Provenance) -> Result<ProcessingSummary> {
        let extraction = self.extractor.extract(text, provenance).await?;
        let mut summary = self.summary_from(&extraction, provenance);

        if extraction.triples.is_empty() {
            info!(source = %provenance.source, "No triples extracted, nothing to store");
            return Ok(summary);
        }

        let concepts = self
            .conceptualizer
            .conceptualize(&extraction.triples, provenance)
            .await;
        summary.concepts_extracted = concepts.concepts.len();
        summary.conceptualization_degraded = concepts.degraded;

        let map = self
            .embeddings
            .build_map(triple_texts(&extraction.triples).into_iter().chain(concept_texts(&concepts.concepts)))
            .await?;

        let (triples, duplicates_removed) = self.deduplicate_run(extraction.triples, &map);
        summary.duplicates_removed = duplicates_removed;

        summary.storage = self
            .storage
            .store(
                KnowledgeBatch::new(triples, concepts.concepts, concepts.conceptualizations),
                &map,
            )
            .await?;

        info!(
            source = %provenance.source,
            triples_stored = summary.storage.triples_stored,
            concepts_stored = summary.storage.concepts_stored,
            vectors = summary.storage.vectors_generated,
            "Knowledge processed"
        );
        Ok(summary)
    }

    /// Queue an extraction job; a fresh parent id groups its downstream jobs
    pub async fn enqueue_extraction(
        &self,
        text: &str,
        provenance: &Provenance,
        parent_job_id: Option<String>,
    ) -> Result<String> {
        if text.trim().is_empty() {
            return Err(Error::input("enqueue_extraction", "text must not be empty"));
        }
        if provenance.source.trim().is_empty() {
            return Err(Error::input("enqueue_extraction", "source must not be empty"));
        }

        let metadata = JobMetadata::new(provenance).with_resource_limits(self.config.resource_limits);
        let parent = parent_job_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        self.jobs
            .enqueue(NewJob::new(JobType::Extraction, metadata, text).with_parent(parent))
            .await
    }

    /// Execute one queued job through to COMPLETED or FAILED
    pub async fn run_job(&self, job_id: &str) -> Result<ProcessingJob> {
        let job = self.jobs.get(job_id).await?;
        self.jobs
            .update_status(job_id, JobStatus::Processing, None, None)
            .await?;
        self.jobs.update_progress(job_id, PROGRESS_STARTED).await?;

        let limits = job
            .metadata
            .resource_limits
            .unwrap_or(self.config.resource_limits);
        info!(
            job_id,
            job_type = job.job_type.as_str(),
            parent_job_id = ?job.parent_job_id,
            max_connections = limits.max_connections,
            max_ai_calls = limits.max_ai_calls,
            max_memory_mb = limits.max_memory_mb,
            "Job started"
        );

        let output = match job.job_type {
            JobType::Extraction => self.run_extraction(&job, limits).await,
            JobType::Conceptualization => self.run_conceptualization(&job).await,
            JobType::Deduplication => self.run_deduplication(&job).await,
        };

        match output {
            Ok(output) => {
                self.jobs.update_progress(job_id, PROGRESS_COMPLETED).await?;
                let finished = self
                    .jobs
                    .update_status(job_id, JobStatus::Completed, None, Some(&output.result))
                    .await?;
                info!(job_id, job_type = job.job_type.as_str(), "Job completed");

                for downstream in output.downstream {
                    self.dispatch(downstream);
                }
                Ok(finished)
            }
            Err(e) => {
                error!(
                    job_id,
                    job_type = job.job_type.as_str(),
                    error = %e,
                    kind = e.kind().as_str(),
                    "Job failed"
                );
                if let Err(mark) = self
                    .jobs
                    .update_status(job_id, JobStatus::Failed, Some(&e.to_string()), None)
                    .await
                {
                    error!(job_id, error = %mark, "Could not mark job as failed");
                }
                Err(e)
            }
        }
    }

    /// Run queued jobs oldest first until none remain or `limit` is reached
    pub async fn run_queued(&self, limit: u32) -> Result<Vec<ProcessingJob>> {
        let mut finished = Vec::new();
        while finished.len() < limit as usize {
            self.wait_for_dispatch().await;
            let Some(next) = self.jobs.next_queued().await? else {
                break;
            };
            match self.run_job(&next.id).await {
                Ok(job) => finished.push(job),
                Err(e) => {
                    warn!(job_id = %next.id, error = %e, "Queued job failed, continuing");
                    finished.push(self.jobs.get(&next.id).await?);
                }
            }
        }
        Ok(finished)
    }

    /// Wait for every downstream dispatch issued so far
    pub async fn wait_for_dispatch(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    pub async fn stats(&self) -> Result<GraphStats> {
        Ok(GraphStats {
            knowledge: self.knowledge.stats().await?,
            vectors: self.vectors.stats().await?,
            breakers: self.resilience.breaker().stats(),
        })
    }

    /// Triples whose entity, relationship or sentence vectors resemble `query`
    pub async fn search_knowledge(&self, query: &str, options: &SearchOptions) -> Result<Vec<ScoredTriple>> {
        let vector = self.embed_query(query, "search_knowledge").await?;

        // Up to four vectors per triple, more when filters may discard hits
        let candidates = if options.is_filtered() {
            usize::MAX
        } else {
            options.limit.saturating_mul(TRIPLE_VECTOR_TYPES.len() + 1)
        };
        let matches = self
            .vectors
            .search(&vector, &TRIPLE_VECTOR_TYPES, candidates, options.threshold)
            .await?;

        let mut seen = HashSet::new();
        let mut ranked = Vec::new();
        for m in matches {
            if let VectorOwner::Triple(id) = m.vector.owner {
                if seen.insert(id.clone()) {
                    ranked.push((id, m.score, m.vector.text));
                }
            }
        }

        let ids: Vec<String> = ranked.iter().map(|(id, _, _)| id.clone()).collect();
        let mut triples: HashMap<String, Triple> = self
            .knowledge
            .get_triples(&ids)
            .await?
            .into_iter()
            .map(|t| (t.id(), t))
            .collect();

        let results: Vec<ScoredTriple> = ranked
            .into_iter()
            .filter_map(|(id, score, matched)| {
                let triple = triples.remove(&id)?;
                Some(ScoredTriple {
                    id,
                    score,
                    matched,
                    triple,
                })
            })
            .filter(|hit| options.accepts(&hit.triple))
            .take(options.limit)
            .collect();

        info!(results = results.len(), threshold = options.threshold, "Knowledge search finished");
        Ok(results)
    }

    /// Concepts whose label vectors resemble `query`
    pub async fn search_concepts(&self, query: &str, limit: usize, threshold: f32) -> Result<Vec<ScoredConcept>> {
        let vector = self.embed_query(query, "search_concepts").await?;
        let matches = self
            .vectors
            .search(&vector, &[VectorType::Concept], limit, threshold)
            .await?;

        let ranked: Vec<(String, f32)> = matches
            .into_iter()
            .filter_map(|m| match m.vector.owner {
                VectorOwner::Concept(id) => Some((id, m.score)),
                VectorOwner::Triple(_) => None,
            })
            .collect();
        let ids: Vec<String> = ranked.iter().map(|(id, _)| id.clone()).collect();
        let mut concepts: HashMap<String, ConceptNode> = self
            .knowledge
            .get_concepts(&ids)
            .await?
            .into_iter()
            .map(|c| (c.id(), c))
            .collect();

        let results: Vec<ScoredConcept> = ranked
            .into_iter()
            .filter_map(|(id, score)| {
                let concept = concepts.remove(&id)?;
                Some(ScoredConcept { id, score, concept })
            })
            .collect();

        info!(results = results.len(), threshold, "Concept search finished");
        Ok(results)
    }

    pub async fn entities(&self, query: &EntityQuery) -> Result<Vec<EntityCount>> {
        self.knowledge.entities(query).await
    }

    async fn embed_query(&self, query: &str, operation: &str) -> Result<Vec<f32>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::input(operation, "query must not be empty"));
        }
        let map = self.embeddings.build_map([query.to_string()]).await?;
        map.get(query)
            .map(<[f32]>::to_vec)
            .ok_or_else(|| Error::embedding(operation, "no vector returned for query"))
    }

    async fn run_extraction(&self, job: &ProcessingJob, limits: ResourceLimits) -> Result<StageOutput> {
        let provenance = job.metadata.provenance();
        let extraction = self.extractor.extract(&job.text, &provenance).await?;
        self.jobs.update_progress(&job.id, PROGRESS_GENERATED).await?;

        let summary = self.summary_from(&extraction, &provenance);
        if extraction.triples.is_empty() {
            info!(job_id = %job.id, "Extraction produced no triples, nothing scheduled");
            return Ok(StageOutput {
                result: json!({ "extraction": summary }),
                downstream: Vec::new(),
            });
        }

        let map = self.embeddings.build_map(triple_texts(&extraction.triples)).await?;
        let (triples, duplicates_removed) = self.deduplicate_run(extraction.triples, &map);
        let triple_ids: Vec<String> = triples.iter().map(Triple::id).collect();

        let storage = self
            .storage
            .store(KnowledgeBatch::new(triples, Vec::new(), Vec::new()), &map)
            .await?;
        self.jobs.update_progress(&job.id, PROGRESS_STORED).await?;

        let mut downstream = Vec::new();
        if let Some(parent) = &job.parent_job_id {
            let metadata = JobMetadata::new(&provenance)
                .with_resource_limits(limits)
                .with_triple_ids(triple_ids.clone());

            downstream.push(NewJob::new(JobType::Conceptualization, metadata.clone(), "").with_parent(parent));
            if self.config.schedule_deduplication && self.dedup.config().enabled {
                downstream.push(NewJob::new(JobType::Deduplication, metadata, "").with_parent(parent));
            }
        }

        Ok(StageOutput {
            result: json!({
                "extraction": summary,
                "duplicates_removed": duplicates_removed,
                "storage": storage,
                "triple_ids": triple_ids,
            }),
            downstream,
        })
    }

    async fn run_conceptualization(&self, job: &ProcessingJob) -> Result<StageOutput> {
        let triples = self.load_job_triples(job, "run_conceptualization").await?;
        let provenance = job.metadata.provenance();

        let outcome = self.conceptualizer.conceptualize(&triples, &provenance).await;
        self.jobs.update_progress(&job.id, PROGRESS_GENERATED).await?;

        let map = self.embeddings.build_map(concept_texts(&outcome.concepts)).await?;
        let concepts_extracted = outcome.concepts.len();
        let storage = self
            .storage
            .store(
                KnowledgeBatch::new(Vec::new(), outcome.concepts, outcome.conceptualizations),
                &map,
            )
            .await?;
        self.jobs.update_progress(&job.id, PROGRESS_STORED).await?;

        Ok(StageOutput {
            result: json!({
                "triples_examined": triples.len(),
                "concepts_extracted": concepts_extracted,
                "degraded": outcome.degraded,
                "storage": storage,
            }),
            downstream: Vec::new(),
        })
    }

    /// Merge stored triples and delete the merged-away rows with their vectors
    async fn run_deduplication(&self, job: &ProcessingJob) -> Result<StageOutput> {
        let triples = self.load_job_triples(job, "run_deduplication").await?;
        let examined = triples.len();

        let map = if self.dedup.config().semantic {
            Some(
                self.embeddings
                    .build_map(triples.iter().map(Triple::semantic_text))
                    .await?,
            )
        } else {
            None
        };
        self.jobs.update_progress(&job.id, PROGRESS_GENERATED).await?;

        let result = self.dedup.deduplicate(triples, map.as_ref());
        let removed = result.removed_ids();
        let DeduplicationResult {
            duplicates_removed,
            merges,
            ..
        } = result;

        let triples_deleted = self.knowledge.delete_triples(&removed).await?;
        let vectors_deleted = self.vectors.delete_by_owners(&removed, &[]).await?;
        self.jobs.update_progress(&job.id, PROGRESS_STORED).await?;

        info!(
            job_id = %job.id,
            examined,
            duplicates_removed,
            triples_deleted,
            vectors_deleted,
            "Deduplication job finished"
        );
        Ok(StageOutput {
            result: json!({
                "triples_examined": examined,
                "duplicates_removed": duplicates_removed,
                "triples_deleted": triples_deleted,
                "vectors_deleted": vectors_deleted,
                "merges": merges,
            }),
            downstream: Vec::new(),
        })
    }

    async fn load_job_triples(&self, job: &ProcessingJob, operation: &str) -> Result<Vec<Triple>> {
        if job.metadata.triple_ids.is_empty() {
            return Err(Error::input(operation, "job metadata lists no triple ids"));
        }
        let triples = self.knowledge.get_triples(&job.metadata.triple_ids).await?;
        if triples.len() < job.metadata.triple_ids.len() {
            warn!(
                job_id = %job.id,
                requested = job.metadata.triple_ids.len(),
                found = triples.len(),
                "Some triples named by the job are gone"
            );
        }
        Ok(triples)
    }

    /// Collapse duplicates within one run when deduplication is enabled
    fn deduplicate_run(&self, triples: Vec<Triple>, map: &EmbeddingMap) -> (Vec<Triple>, usize) {
        if !self.dedup.config().enabled {
            return (triples, 0);
        }
        let result = self.dedup.deduplicate(triples, Some(map));
        (result.unique, result.duplicates_removed)
    }

    fn summary_from(&self, extraction: &ExtractionOutcome, provenance: &Provenance) -> ProcessingSummary {
        ProcessingSummary {
            source: provenance.source.clone(),
            strategy: self.extractor.strategy().as_str().to_string(),
            chunks_total: extraction.chunks_total,
            chunks_processed: extraction.chunks_processed,
            failed_stages: extraction.failed_stages.clone(),
            salvaged: extraction.salvaged,
            triples_extracted: extraction.triples.len(),
            ..Default::default()
        }
    }

    /// Enqueue a downstream job as a tracked, time-bounded background task
    fn dispatch(&self, job: NewJob) {
        let jobs = Arc::clone(&self.jobs);
        let timeout = self.config.dispatch_timeout();
        let job_type = job.job_type;
        let parent_job_id = job.parent_job_id.clone().unwrap_or_default();

        self.tracker.spawn(async move {
            match tokio::time::timeout(timeout, jobs.enqueue(job)).await {
                Ok(Ok(job_id)) => info!(
                    %job_id,
                    %parent_job_id,
                    job_type = job_type.as_str(),
                    "Downstream job dispatched"
                ),
                Ok(Err(e)) => warn!(
                    %parent_job_id,
                    job_type = job_type.as_str(),
                    error = %e,
                    "Downstream dispatch failed"
                ),
                Err(_) => warn!(
                    %parent_job_id,
                    job_type = job_type.as_str(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Downstream dispatch timed out"
                ),
            }
        });
    }
}
