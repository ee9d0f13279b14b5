//! AI-backed triple extraction
//!
//! Long text is chunked and each chunk extracted independently. Within a
//! chunk either one call covers every triple type (single-pass) or one call
//! per type runs concurrently (four-stage). Failures are isolated per chunk
//! and per stage; only a run where nothing succeeded is an error.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::chunking::{TextChunk, TextChunker};
use super::prompts::{EXTRACTION_SYSTEM_PROMPT, single_pass_prompt, stage_prompt};
use super::schema::{TripleResponse, salvage_triples};
use crate::config::{ExtractionConfig, ExtractionStrategy};
use crate::error::{Error, Result};
use crate::knowledge::{Provenance, Triple, TripleType};
use crate::llm::{AiProvider, GenerationConfig, parse_object};
use crate::resilience::Resilience;

/// Stage name used for the single-pass call
pub const SINGLE_PASS_STAGE: &str = "single-pass";

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionOutcome {
    /// Distinct triples across every successful chunk
    pub triples: Vec<Triple>,
    pub chunks_total: usize,
    /// Chunks that produced a result, successful stages only
    pub chunks_processed: usize,
    /// `chunk:stage` labels of calls that failed
    pub failed_stages: Vec<String>,
    /// Triples recovered from responses that failed validation
    pub salvaged: usize,
}

#[derive(Debug, Default)]
struct ChunkOutcome {
    triples: Vec<Triple>,
    failed_stages: Vec<String>,
    salvaged: usize,
}

struct StageOutcome {
    triples: Vec<Triple>,
    salvaged: bool,
}

pub struct KnowledgeExtractor {
    provider: Arc<dyn AiProvider>,
    resilience: Resilience,
    strategy: ExtractionStrategy,
    chunker: TextChunker,
}

impl KnowledgeExtractor {
    pub fn new(provider: Arc<dyn AiProvider>, resilience: Resilience, config: ExtractionConfig) -> Self {
        Self {
            provider,
            resilience,
            strategy: config.strategy,
            chunker: TextChunker::new(config.chunking),
        }
    }

    pub fn strategy(&self) -> ExtractionStrategy {
        self.strategy
    }

    /// Extract triples from `text`
    pub async fn extract(&self, text: &str, provenance: &Provenance) -> Result<ExtractionOutcome> {
        if text.trim().is_empty() {
            return Err(Error::input("extract", "text must not be empty"));
        }
        if provenance.source.trim().is_empty() {
            return Err(Error::input("extract", "source must not be empty"));
        }

        let chunks = self.chunker.chunk(text);
        info!(
            source = %provenance.source,
            strategy = self.strategy.as_str(),
            chunks = chunks.len(),
            "Starting extraction"
        );

        let results = join_all(chunks.iter().map(|chunk| self.extract_chunk(chunk, provenance))).await;

        let mut outcome = ExtractionOutcome {
            chunks_total: chunks.len(),
            ..Default::default()
        };
        let mut merged: Vec<Triple> = Vec::new();
        let mut index_by_id: HashMap<String, usize> = HashMap::new();
        let mut last_error = None;

        for (chunk, result) in chunks.iter().zip(results) {
            match result {
                Ok(chunk_outcome) => {
                    outcome.chunks_processed += 1;
                    outcome.salvaged += chunk_outcome.salvaged;
                    outcome.failed_stages.extend(chunk_outcome.failed_stages);
                    for triple in chunk_outcome.triples {
                        let id = triple.id();
                        match index_by_id.get(&id) {
                            Some(&i) => {
                                if triple.confidence > merged[i].confidence {
                                    merged[i].confidence = triple.confidence;
                                }
                            }
                            None => {
                                index_by_id.insert(id, merged.len());
                                merged.push(triple);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        source = %provenance.source,
                        chunk = chunk.index,
                        error = %e,
                        "Chunk extraction failed"
                    );
                    outcome.failed_stages.push(format!("chunk-{}", chunk.index));
                    last_error = Some(e);
                }
            }
        }

        if outcome.chunks_processed == 0 {
            let cause = last_error.unwrap_or_else(|| Error::extraction("extract", "no chunks to process"));
            return Err(match cause {
                e @ Error::Extraction { .. } => e,
                other => Error::extraction_caused_by("extract", other),
            });
        }

        outcome.triples = merged;
        info!(
            source = %provenance.source,
            triples = outcome.triples.len(),
            chunks_processed = outcome.chunks_processed,
            chunks_total = outcome.chunks_total,
            "Extraction complete"
        );
        Ok(outcome)
    }

    async fn extract_chunk(&self, chunk: &TextChunk, provenance: &Provenance) -> Result<ChunkOutcome> {
        match self.strategy {
            ExtractionStrategy::SinglePass => {
                let prompt = single_pass_prompt(&chunk.text);
                let stage = self
                    .run_stage(SINGLE_PASS_STAGE, &prompt, TripleType::EntityEntity, None, provenance)
                    .await?;
                Ok(ChunkOutcome {
                    salvaged: if stage.salvaged { stage.triples.len() } else { 0 },
                    triples: stage.triples,
                    failed_stages: Vec::new(),
                })
            }
            ExtractionStrategy::FourStage => {
                let prompts: Vec<(TripleType, String)> = TripleType::ALL
                    .iter()
                    .map(|t| (*t, stage_prompt(*t, &chunk.text)))
                    .collect();

                let results = join_all(prompts.iter().map(|(t, prompt)| {
                    self.run_stage(t.as_str(), prompt, *t, Some(*t), provenance)
                }))
                .await;

                let mut outcome = ChunkOutcome::default();
                let mut last_error = None;
                let mut succeeded = 0;

                for ((triple_type, _), result) in prompts.iter().zip(results) {
                    match result {
                        Ok(stage) => {
                            succeeded += 1;
                            if stage.salvaged {
                                outcome.salvaged += stage.triples.len();
                            }
                            outcome.triples.extend(stage.triples);
                        }
                        Err(e) => {
                            warn!(
                                source = %provenance.source,
                                chunk = chunk.index,
                                stage = triple_type.as_str(),
                                error = %e,
                                "Extraction stage failed"
                            );
                            outcome
                                .failed_stages
                                .push(format!("chunk-{}:{}", chunk.index, triple_type.as_str()));
                            last_error = Some(e);
                        }
                    }
                }

                if succeeded == 0 {
                    if let Some(e) = last_error {
                        return Err(e);
                    }
                }
                Ok(outcome)
            }
        }
    }

    /// One guarded AI call, parsed and validated, salvaged on schema failure
    async fn run_stage(
        &self,
        stage: &str,
        prompt: &str,
        default_type: TripleType,
        forced_type: Option<TripleType>,
        provenance: &Provenance,
    ) -> Result<StageOutcome> {
        let key = format!("{}:{}", provenance.source, stage);
        let config = GenerationConfig::json().with_system_prompt(EXTRACTION_SYSTEM_PROMPT);

        let response = self
            .resilience
            .execute(&key, || self.provider.generate_text(prompt, &config))
            .await
            .map_err(|e| Error::extraction_caused_by(stage, e))?;

        let (mut triples, salvaged) = match parse_object::<TripleResponse>(&response.content, stage) {
            Ok(parsed) => (parsed.into_triples(default_type, provenance), false),
            Err(e @ (Error::Parse { .. } | Error::Validation { .. })) => {
                let recovered = salvage_triples(&response.content, default_type, provenance);
                if recovered.is_empty() {
                    return Err(e);
                }
                warn!(
                    stage = %stage,
                    recovered = recovered.len(),
                    error = %e,
                    "Salvaged records from rejected response"
                );
                (recovered, true)
            }
            Err(e) => return Err(e),
        };

        if let Some(t) = forced_type {
            for triple in &mut triples {
                triple.triple_type = t;
            }
        }

        debug!(stage = %stage, triples = triples.len(), model = %response.model, "Stage complete");
        Ok(StageOutcome { triples, salvaged })
    }
}
