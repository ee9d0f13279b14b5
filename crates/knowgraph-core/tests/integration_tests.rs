//! Knowgraph Core Integration Tests

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::*;
use knowgraph_core::config::{CircuitBreakerConfig, ExtractionStrategy, ResilienceConfig, RetryConfig};
use knowgraph_core::embedding::{EmbeddingMap, triple_texts, unique_texts};
use knowgraph_core::error::StoragePhase;
use knowgraph_core::extraction::KnowledgeExtractor;
use knowgraph_core::knowledge::{
    JobMetadata, JobStatus, JobType, NewJob, Provenance, Triple, TripleType,
};
use knowgraph_core::pipeline::SearchOptions;
use knowgraph_core::resilience::{CircuitState, Resilience};
use knowgraph_core::storage::{
    BatchLimits, BatchStorageEngine, Database, DatabaseConfig, EntityQuery, JobRepository, KnowledgeBatch,
    KnowledgeStore, Schema, SqliteKnowledgeStore, SqliteVectorStore, VectorStore,
};
use knowgraph_core::{Error, ErrorKind};
use sqlx::sqlite::SqliteJournalMode;

fn provenance(source: &str) -> Provenance {
    Provenance::new(source, "document")
}

fn full_map(triples: &[Triple]) -> EmbeddingMap {
    unique_texts(triple_texts(triples))
        .into_iter()
        .map(|t| {
            let v = embed(&t);
            (t, v)
        })
        .collect()
}

#[tokio::test]
async fn test_storing_same_triple_twice_skips_duplicate() {
    let config = test_config(ExtractionStrategy::SinglePass);
    let h = Harness::new(ScriptedAi::new(|_| Ok("{}".into())), &config).await;
    let engine = BatchStorageEngine::new(h.knowledge.clone(), h.vectors.clone(), BatchLimits::from(&config.storage));

    let triple = Triple::new("Alice", "founded", "Acme", TripleType::EntityEntity, &provenance("a.md"));
    let map = full_map(std::slice::from_ref(&triple));

    let first = engine
        .store(KnowledgeBatch::new(vec![triple.clone()], vec![], vec![]), &map)
        .await
        .unwrap();
    assert_eq!(first.triples_stored, 1);

    let second = engine
        .store(KnowledgeBatch::new(vec![triple.clone()], vec![], vec![]), &map)
        .await
        .unwrap();
    assert_eq!(second.duplicates_skipped, 1);
    assert_eq!(second.triples_stored, 0);
}

#[tokio::test]
async fn test_phase_two_failure_leaves_nothing_behind() {
    let config = test_config(ExtractionStrategy::SinglePass);
    let h = Harness::new(ScriptedAi::new(|_| Ok("{}".into())), &config).await;
    // Lets the first few vectors through so compensation has some to remove
    let flaky = Arc::new(FlakyVectorStore::new(
        SqliteVectorStore::new(h.dbs.vectors().pool().clone(), DIM),
        3,
    ));
    let engine = BatchStorageEngine::new(h.knowledge.clone(), flaky, BatchLimits::default());

    let p = provenance("notes.md");
    let triples = vec![
        Triple::new("Alice", "founded", "Acme", TripleType::EntityEntity, &p),
        Triple::new("Acme", "launched", "Rocket Launch", TripleType::EntityEvent, &p),
    ];
    let map = full_map(&triples);

    let err = engine
        .store(KnowledgeBatch::new(triples.clone(), vec![], vec![]), &map)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VectorGenerationRollback);
    assert!(matches!(err, Error::VectorGenerationRollback { compensated: true, .. }));

    let ids: Vec<String> = triples.iter().map(Triple::id).collect();
    assert!(h.knowledge.get_triples(&ids).await.unwrap().is_empty());
    assert_eq!(h.vectors.count_by_owners(&ids, &[]).await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_compensation_is_reported() {
    let config = test_config(ExtractionStrategy::SinglePass);
    let h = Harness::new(ScriptedAi::new(|_| Ok("{}".into())), &config).await;
    let knowledge = Arc::new(UndeletableKnowledgeStore::new(SqliteKnowledgeStore::new(
        h.dbs.knowledge().pool().clone(),
        &config.storage,
    )));
    let flaky = Arc::new(FlakyVectorStore::new(
        SqliteVectorStore::new(h.dbs.vectors().pool().clone(), DIM),
        2,
    ));
    let engine = BatchStorageEngine::new(knowledge, flaky, BatchLimits::default());

    let p = provenance("notes.md");
    let triples = vec![Triple::new("Alice", "founded", "Acme", TripleType::EntityEntity, &p)];
    let err = engine
        .store(KnowledgeBatch::new(triples.clone(), vec![], vec![]), &full_map(&triples))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::VectorGenerationRollback);
    assert!(matches!(err, Error::VectorGenerationRollback { compensated: false, .. }));
    assert!(err.to_string().contains("manual intervention"));
    assert!(err.suggestion().is_some());

    // Phase-1 rows survive for an operator; partial vectors are still removed
    let ids: Vec<String> = triples.iter().map(Triple::id).collect();
    assert_eq!(h.knowledge.get_triples(&ids).await.unwrap().len(), 1);
    assert_eq!(h.vectors.count_by_owners(&ids, &[]).await.unwrap(), 0);
}

/// The `Timeout` wrapped inside a phase-1 storage error
fn phase_one_timeout(err: &Error) -> (&str, u64) {
    let Error::BatchStorage {
        phase: StoragePhase::Phase1Transaction,
        cause: Some(cause),
        ..
    } = err
    else {
        panic!("expected a phase 1 storage error, got {err:?}");
    };
    match cause.downcast_ref::<Error>() {
        Some(Error::Timeout { operation, after_ms }) => (operation.as_str(), *after_ms),
        other => panic!("expected a timeout cause, got {other:?}"),
    }
}

#[tokio::test]
async fn test_phase_one_gives_up_after_max_wait() {
    let mut config = test_config(ExtractionStrategy::SinglePass);
    config.storage.transaction_max_wait_ms = 50;
    let h = Harness::new(ScriptedAi::new(|_| Ok("{}".into())), &config).await;
    let knowledge = Arc::new(SqliteKnowledgeStore::new(
        h.dbs.knowledge().pool().clone(),
        &config.storage,
    ));
    let engine = BatchStorageEngine::new(knowledge, h.vectors.clone(), BatchLimits::default());

    // The in-memory pool has a single connection
    let held = h.dbs.knowledge().pool().acquire().await.unwrap();

    let p = provenance("notes.md");
    let triples = vec![Triple::new("Alice", "founded", "Acme", TripleType::EntityEntity, &p)];
    let err = engine
        .store(KnowledgeBatch::new(triples.clone(), vec![], vec![]), &full_map(&triples))
        .await
        .unwrap_err();
    drop(held);

    assert_eq!(err.kind(), ErrorKind::BatchStorage);
    assert_eq!(phase_one_timeout(&err), ("knowledge_store.begin", 50));
    assert_eq!(h.knowledge.stats().await.unwrap().triples, 0);
    assert_eq!(h.vectors.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn test_phase_one_transaction_times_out() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = test_config(ExtractionStrategy::SinglePass);
    config.storage.transaction_timeout_ms = 200;

    // Rollback journal, so an exclusive lock also stalls readers
    let db = Database::new(DatabaseConfig {
        journal_mode: SqliteJournalMode::Delete,
        ..DatabaseConfig::with_path(dir.path().join("knowledge.db"), Schema::Knowledge)
    })
    .await
    .unwrap();
    let vector_db = Database::in_memory(Schema::Vectors).await.unwrap();
    let knowledge = Arc::new(SqliteKnowledgeStore::new(db.pool().clone(), &config.storage));
    let vectors = Arc::new(SqliteVectorStore::new(vector_db.pool().clone(), DIM));
    let engine = BatchStorageEngine::new(knowledge.clone(), vectors.clone(), BatchLimits::default());

    let mut blocker = db.pool().acquire().await.unwrap();
    sqlx::query("BEGIN EXCLUSIVE").execute(&mut *blocker).await.unwrap();

    let p = provenance("notes.md");
    let triples = vec![Triple::new("Alice", "founded", "Acme", TripleType::EntityEntity, &p)];
    let err = engine
        .store(KnowledgeBatch::new(triples.clone(), vec![], vec![]), &full_map(&triples))
        .await
        .unwrap_err();

    sqlx::query("ROLLBACK").execute(&mut *blocker).await.unwrap();
    drop(blocker);

    assert_eq!(err.kind(), ErrorKind::BatchStorage);
    assert_eq!(phase_one_timeout(&err), ("knowledge_store.insert_batch", 200));
    assert_eq!(knowledge.stats().await.unwrap().triples, 0);
    assert_eq!(vectors.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn test_confidence_is_clamped_on_store() {
    let config = test_config(ExtractionStrategy::SinglePass);
    let h = Harness::new(ScriptedAi::new(|_| Ok("{}".into())), &config).await;
    let engine = BatchStorageEngine::new(h.knowledge.clone(), h.vectors.clone(), BatchLimits::default());

    let p = provenance("notes.md");
    let mut high = Triple::new("A", "r", "B", TripleType::EntityEntity, &p);
    high.confidence = 1.7;
    let mut low = Triple::new("C", "r", "D", TripleType::EntityEntity, &p);
    low.confidence = -0.3;
    let mut nan = Triple::new("E", "r", "F", TripleType::EntityEntity, &p);
    nan.confidence = f32::NAN;
    let triples = vec![high.clone(), low.clone(), nan.clone()];

    engine
        .store(KnowledgeBatch::new(triples.clone(), vec![], vec![]), &full_map(&triples))
        .await
        .unwrap();

    let stored = h.knowledge.get_triples_by_source("notes.md").await.unwrap();
    let confidence_of = |t: &Triple| {
        stored
            .iter()
            .find(|s| s.id() == t.id())
            .map(|s| s.confidence)
            .unwrap()
    };
    assert_eq!(confidence_of(&high), 1.0);
    assert_eq!(confidence_of(&low), 0.0);
    assert_eq!(confidence_of(&nan), 0.0);
}

#[tokio::test]
async fn test_four_stage_tolerates_one_failing_stage() {
    let ai = ScriptedAi::new(|prompt| match stage_of(prompt) {
        Some("event-event") => Err(Error::LLMError("model refused".into())),
        Some("entity-entity") => Ok(triples_json(&[("Alice", "founded", "Acme", 0.9)])),
        Some("entity-event") => Ok(triples_json(&[("Alice", "attended", "Launch", 0.8)])),
        Some(_) => Ok(triples_json(&[("Alice", "feels", "proud", 0.7)])),
        None => Ok("{}".into()),
    });
    let config = test_config(ExtractionStrategy::FourStage);
    let extractor = KnowledgeExtractor::new(ai.clone(), Resilience::new(config.resilience.clone()), config.extraction);

    let outcome = extractor
        .extract("Alice founded Acme and attended the launch.", &provenance("notes.md"))
        .await
        .unwrap();

    assert_eq!(ai.calls(), 4);
    assert_eq!(outcome.triples.len(), 3);
    assert_eq!(outcome.failed_stages, vec!["chunk-0:event-event"]);
    let types: Vec<TripleType> = outcome.triples.iter().map(|t| t.triple_type).collect();
    assert!(types.contains(&TripleType::EntityEntity));
    assert!(types.contains(&TripleType::EntityEvent));
    assert!(types.contains(&TripleType::EmotionalContext));
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_rejects_then_allows_one_trial() {
    let resilience = Resilience::new(ResilienceConfig {
        retry: RetryConfig {
            max_retries: 0,
            base_delay_ms: 1,
            max_delay_ms: 1,
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            timeout_ms: 1_000,
            reset_timeout_ms: 10_000,
        },
    });
    let counter = AtomicUsize::new(0);
    let invoked = &counter;
    let failing = move || async move {
        invoked.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>(Error::ProviderUnavailable("503".into()))
    };

    for _ in 0..3 {
        assert!(resilience.execute("doc:entity-entity", failing).await.is_err());
    }
    assert_eq!(resilience.breaker().state("doc:entity-entity"), CircuitState::Open);

    let err = resilience.execute("doc:entity-entity", failing).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    assert_eq!(invoked.load(Ordering::SeqCst), 3);

    tokio::time::advance(Duration::from_millis(10_001)).await;
    assert_eq!(resilience.breaker().state("doc:entity-entity"), CircuitState::HalfOpen);

    let value = resilience
        .execute("doc:entity-entity", || async { Ok::<_, Error>(42) })
        .await
        .unwrap();
    assert_eq!(value, 42);
    assert_eq!(resilience.breaker().state("doc:entity-entity"), CircuitState::Closed);
}

#[tokio::test]
async fn test_chunk_failure_is_isolated() {
    let ai = ScriptedAi::new(|prompt| {
        if is_concept_prompt(prompt) {
            Ok(concepts_json())
        } else if prompt.contains("alpha") {
            Ok(triples_json(&[("Alpha", "precedes", "Bravo", 0.8)]))
        } else if prompt.contains("bravo") {
            Err(Error::LLMError("chunk rejected".into()))
        } else if prompt.contains("delta") {
            Ok(triples_json(&[("Delta", "follows", "Bravo", 0.8)]))
        } else {
            Ok("{}".into())
        }
    });
    let config = test_config(ExtractionStrategy::SinglePass);
    assert_eq!(config.extraction.chunking.max_tokens, 3000);
    assert_eq!(config.extraction.chunking.overlap_tokens, 200);
    let h = Harness::new(ai, &config).await;

    // Evenly paragraphed: chunk 0 is alpha then bravo, chunk 1 bravo then delta, chunk 2 delta
    let mut paragraphs = vec![paragraph("", "alpha", 498); 10];
    paragraphs.extend(vec![paragraph("", "bravo", 498); 10]);
    paragraphs.extend(vec![paragraph("", "delta", 498); 10]);
    let text = paragraphs.join("\n\n");
    assert_eq!(text.len(), 14_998);

    let summary = h
        .coordinator
        .process_knowledge(&text, &provenance("long.md"))
        .await
        .unwrap();

    assert_eq!(summary.chunks_total, 3);
    assert_eq!(summary.chunks_processed, 2);
    assert_eq!(summary.failed_stages, vec!["chunk-1"]);

    let stored = h.knowledge.get_triples_by_source("long.md").await.unwrap();
    let mut subjects: Vec<&str> = stored.iter().map(|t| t.subject.as_str()).collect();
    subjects.sort();
    assert_eq!(subjects, vec!["Alpha", "Delta"]);
}

#[tokio::test]
async fn test_end_to_end_rollback_reports_kind_and_removes_rows() {
    let ai = ScriptedAi::new(|prompt| {
        if is_concept_prompt(prompt) {
            Ok(concepts_json())
        } else {
            Ok(triples_json(&[
                ("Alice", "founded", "Acme", 0.9),
                ("Acme", "builds", "rockets", 0.8),
            ]))
        }
    });
    let config = test_config(ExtractionStrategy::SinglePass);
    let h = Harness::with_vector_store(ai, &config, Some(0)).await;

    let err = h
        .coordinator
        .process_knowledge("Alice founded Acme. Acme builds rockets.", &provenance("e2e.md"))
        .await
        .unwrap_err();
    assert_eq!(err.kind().as_str(), "VECTOR_GENERATION_ROLLBACK");

    let p = provenance("e2e.md");
    let ids = vec![
        Triple::new("Alice", "founded", "Acme", TripleType::EntityEntity, &p).id(),
        Triple::new("Acme", "builds", "rockets", TripleType::EntityEntity, &p).id(),
    ];
    assert!(h.knowledge.get_triples(&ids).await.unwrap().is_empty());
    let stats = h.knowledge.stats().await.unwrap();
    assert_eq!((stats.triples, stats.concepts, stats.conceptualizations), (0, 0, 0));
}

#[tokio::test]
async fn test_process_knowledge_stores_everything() {
    let ai = ScriptedAi::new(|prompt| {
        if is_concept_prompt(prompt) {
            Ok(concepts_json())
        } else {
            Ok(triples_json(&[
                ("Alice", "founded", "Acme", 0.9),
                ("alice", "FOUNDED", "acme", 0.95),
            ]))
        }
    });
    let config = test_config(ExtractionStrategy::SinglePass);
    let h = Harness::new(ai, &config).await;

    let summary = h
        .coordinator
        .process_knowledge("Alice founded Acme.", &provenance("notes.md"))
        .await
        .unwrap();

    assert_eq!(summary.strategy, "single-pass");
    assert_eq!(summary.triples_extracted, 2);
    assert_eq!(summary.duplicates_removed, 1);
    assert_eq!(summary.storage.triples_stored, 1);
    assert_eq!(summary.storage.concepts_stored, 1);
    assert_eq!(summary.storage.conceptualizations_stored, 1);
    // 4 texts for the triple, 1 for the concept
    assert_eq!(summary.storage.vectors_generated, 5);
    assert!(!summary.conceptualization_degraded);

    let stats = h.coordinator.stats().await.unwrap();
    assert_eq!(stats.knowledge.triples, 1);
    assert_eq!(stats.vectors.total, 5);
    assert_eq!(stats.vectors.by_type.get("CONCEPT"), Some(&1));
}

#[tokio::test]
async fn test_search_and_entities_over_processed_text() {
    let ai = ScriptedAi::new(|prompt| {
        if is_concept_prompt(prompt) {
            Ok(concepts_json())
        } else {
            Ok(triples_json(&[
                ("Alice", "founded", "Acme", 0.9),
                ("Bob", "likes", "Tea", 0.8),
            ]))
        }
    });
    let config = test_config(ExtractionStrategy::SinglePass);
    let h = Harness::new(ai, &config).await;
    h.coordinator
        .process_knowledge("Alice founded Acme. Bob likes tea.", &provenance("notes.md"))
        .await
        .unwrap();

    let hits = h
        .coordinator
        .search_knowledge("Alice founded Acme", &SearchOptions::default())
        .await
        .unwrap();
    let subjects: Vec<&str> = hits.iter().map(|hit| hit.triple.subject.as_str()).collect();
    assert_eq!(subjects, vec!["Alice", "Bob"]);
    assert!((hits[0].score - 1.0).abs() < 1e-5);
    assert_eq!(hits[0].matched, "Alice founded Acme");
    assert_eq!(hits[0].id, hits[0].triple.id());
    assert!(hits[1].score < hits[0].score);

    let strict = SearchOptions {
        limit: 1,
        threshold: 0.99,
        ..SearchOptions::default()
    };
    assert_eq!(h.coordinator.search_knowledge("Bob likes Tea", &strict).await.unwrap().len(), 1);

    let elsewhere = SearchOptions {
        sources: vec!["other.md".into()],
        ..SearchOptions::default()
    };
    assert!(h.coordinator.search_knowledge("Alice founded Acme", &elsewhere).await.unwrap().is_empty());
    let events = SearchOptions {
        types: vec![TripleType::EventEvent],
        ..SearchOptions::default()
    };
    assert!(h.coordinator.search_knowledge("Alice founded Acme", &events).await.unwrap().is_empty());

    let concepts = h.coordinator.search_concepts("Organization", 5, 0.99).await.unwrap();
    assert_eq!(concepts.len(), 1);
    assert_eq!(concepts[0].concept.concept, "Organization");

    let entities = h.coordinator.entities(&EntityQuery::default()).await.unwrap();
    let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["Acme", "Alice", "Bob", "Tea"]);

    let err = h
        .coordinator
        .search_knowledge("  ", &SearchOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputValidation);
}

#[tokio::test]
async fn test_job_mode_runs_linked_jobs() {
    let ai = ScriptedAi::new(|prompt| {
        if is_concept_prompt(prompt) {
            Ok(concepts_json())
        } else {
            Ok(triples_json(&[("Alice", "founded", "Acme", 0.9)]))
        }
    });
    let config = test_config(ExtractionStrategy::SinglePass);
    let h = Harness::new(ai, &config).await;

    let job_id = h
        .coordinator
        .enqueue_extraction("Alice founded Acme.", &provenance("notes.md"), Some("run-7".into()))
        .await
        .unwrap();

    let job = h.coordinator.run_job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    let result = job.result.unwrap();
    assert_eq!(result["storage"]["triples_stored"], 1);

    h.coordinator.wait_for_dispatch().await;
    let children = h.jobs.children("run-7").await.unwrap();
    let kinds: Vec<JobType> = children.iter().map(|j| j.job_type).collect();
    assert!(kinds.contains(&JobType::Conceptualization));
    assert!(kinds.contains(&JobType::Deduplication));
    for child in children.iter().filter(|j| j.id != job_id) {
        assert_eq!(child.metadata.triple_ids.len(), 1);
        assert_eq!(child.metadata.resource_limits, Some(config.pipeline.resource_limits));
    }

    let finished = h.coordinator.run_queued(10).await.unwrap();
    assert_eq!(finished.len(), 2);
    assert!(finished.iter().all(|j| j.status == JobStatus::Completed));
    assert_eq!(h.knowledge.stats().await.unwrap().concepts, 1);

    // Finished jobs cannot be restarted
    let again = h.coordinator.run_job(&job_id).await.unwrap_err();
    assert!(matches!(again, Error::InvalidJobTransition { .. }));
}

#[tokio::test]
async fn test_run_queued_takes_oldest_jobs_first() {
    let ai = ScriptedAi::new(|prompt| {
        if is_concept_prompt(prompt) {
            Ok(concepts_json())
        } else {
            Ok(triples_json(&[("Alice", "founded", "Acme", 0.9)]))
        }
    });
    let config = test_config(ExtractionStrategy::SinglePass);
    let h = Harness::new(ai, &config).await;

    let mut ids = Vec::new();
    for source in ["a.md", "b.md", "c.md"] {
        let id = h
            .coordinator
            .enqueue_extraction("Alice founded Acme.", &provenance(source), Some("run-5".into()))
            .await
            .unwrap();
        ids.push(id);
    }

    let finished = h.coordinator.run_queued(1).await.unwrap();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].id, ids[0]);
    assert_eq!(h.jobs.get(&ids[1]).await.unwrap().status, JobStatus::Queued);
    assert_eq!(h.jobs.get(&ids[2]).await.unwrap().status, JobStatus::Queued);

    // Follow-up jobs from the first run queue behind the older extractions
    let finished = h.coordinator.run_queued(2).await.unwrap();
    let order: Vec<&str> = finished.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(order, vec![ids[1].as_str(), ids[2].as_str()]);
}

#[tokio::test]
async fn test_failed_extraction_job_schedules_nothing() {
    let ai = ScriptedAi::new(|_| Err(Error::LLMError("invalid api key".into())));
    let config = test_config(ExtractionStrategy::FourStage);
    let h = Harness::new(ai, &config).await;

    let job_id = h
        .coordinator
        .enqueue_extraction("Alice founded Acme.", &provenance("notes.md"), Some("run-9".into()))
        .await
        .unwrap();

    let err = h.coordinator.run_job(&job_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Extraction);

    let job = h.jobs.get(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.is_some());

    h.coordinator.wait_for_dispatch().await;
    assert_eq!(h.jobs.children("run-9").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_deduplication_job_deletes_merged_triples_and_vectors() {
    let config = test_config(ExtractionStrategy::SinglePass);
    let h = Harness::new(ScriptedAi::new(|_| Ok("{}".into())), &config).await;
    let engine = BatchStorageEngine::new(h.knowledge.clone(), h.vectors.clone(), BatchLimits::default());

    let p = provenance("notes.md");
    let keep = Triple::new("Alice", "founded", "Acme", TripleType::EntityEntity, &p).with_confidence(0.9);
    let variant = Triple::new("alice", "Founded", "ACME", TripleType::EntityEntity, &p).with_confidence(0.4);
    let triples = vec![keep.clone(), variant.clone()];
    engine
        .store(KnowledgeBatch::new(triples.clone(), vec![], vec![]), &full_map(&triples))
        .await
        .unwrap();

    let metadata = JobMetadata::new(&p).with_triple_ids(vec![keep.id(), variant.id()]);
    let job_id = h
        .jobs
        .enqueue(NewJob::new(JobType::Deduplication, metadata, "").with_parent("run-3"))
        .await
        .unwrap();

    let job = h.coordinator.run_job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result.as_ref().unwrap()["triples_deleted"], 1);

    let ids = vec![keep.id(), variant.id()];
    let survivors = h.knowledge.get_triples(&ids).await.unwrap();
    assert_eq!(survivors.len(), 1);
    let gone: Vec<String> = ids.into_iter().filter(|id| *id != survivors[0].id()).collect();
    assert_eq!(h.vectors.count_by_owners(&gone, &[]).await.unwrap(), 0);
    assert_eq!(h.vectors.count_by_owners(&[survivors[0].id()], &[]).await.unwrap(), 4);
}

#[tokio::test]
async fn test_enqueue_rejects_blank_text() {
    let config = test_config(ExtractionStrategy::SinglePass);
    let h = Harness::new(ScriptedAi::new(|_| Ok("{}".into())), &config).await;

    let err = h
        .coordinator
        .enqueue_extraction("   ", &provenance("notes.md"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputValidation);
}
