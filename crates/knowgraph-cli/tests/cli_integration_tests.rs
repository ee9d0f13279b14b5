//! CLI integration tests for knowgraph
//!
//! Tests the knowgraph CLI commands end-to-end using assert_cmd. Every test
//! gets its own config directory and databases under a temp dir.

use assert_cmd::Command;
use knowgraph_core::config::StorageConfig;
use knowgraph_core::knowledge::{Provenance, Triple, TripleType};
use knowgraph_core::storage::{Databases, KnowledgeBatch, KnowledgeStore, SqliteKnowledgeStore};
use predicates::prelude::*;
use tempfile::TempDir;

/// Command isolated from the user's config, data and API keys
#[allow(deprecated)]
fn knowgraph_cmd(temp_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("knowgraph").unwrap();
    cmd.current_dir(temp_dir.path());
    cmd.env("KNOWGRAPH_CONFIG_DIR", temp_dir.path().join("config"));
    cmd.env_remove("KNOWGRAPH_API_KEY");
    cmd.env_remove("OPENROUTER_API_KEY");
    cmd.env_remove("RUST_LOG");
    cmd
}

/// Point both databases into the temp dir
fn use_temp_databases(temp_dir: &TempDir) {
    let knowledge = temp_dir.path().join("knowledge.db");
    let vectors = temp_dir.path().join("vectors.db");
    knowgraph_cmd(temp_dir)
        .args(["config", "set", "storage.database_path", knowledge.to_str().unwrap()])
        .assert()
        .success();
    knowgraph_cmd(temp_dir)
        .args(["config", "set", "storage.vector_database_path", vectors.to_str().unwrap()])
        .assert()
        .success();
}

/// Store triples straight into the temp knowledge database
fn seed_triples(temp_dir: &TempDir, triples: &[(&str, &str, &str)]) {
    let storage = StorageConfig {
        database_path: Some(temp_dir.path().join("knowledge.db")),
        vector_database_path: Some(temp_dir.path().join("vectors.db")),
        ..StorageConfig::default()
    };
    let provenance = Provenance::new("notes.md", "document");
    let triples: Vec<Triple> = triples
        .iter()
        .map(|(s, p, o)| Triple::new(*s, *p, *o, TripleType::EntityEntity, &provenance))
        .collect();

    tokio::runtime::Runtime::new().unwrap().block_on(async {
        let dbs = Databases::open(&storage).await.unwrap();
        let store = SqliteKnowledgeStore::new(dbs.knowledge().pool().clone(), &storage);
        store
            .insert_batch(&KnowledgeBatch::new(triples, vec![], vec![]))
            .await
            .unwrap();
        dbs.close().await;
    });
}

fn write_input(temp_dir: &TempDir, name: &str, text: &str) -> String {
    let path = temp_dir.path().join(name);
    std::fs::write(&path, text).unwrap();
    path.to_str().unwrap().to_string()
}

#[test]
fn test_help_command() {
    let temp_dir = TempDir::new().unwrap();
    knowgraph_cmd(&temp_dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("knowledge graph"))
        .stdout(predicate::str::contains("process"))
        .stdout(predicate::str::contains("enqueue"))
        .stdout(predicate::str::contains("run-job"))
        .stdout(predicate::str::contains("search"))
        .stdout(predicate::str::contains("entities"));
}

#[test]
fn test_version_output() {
    let temp_dir = TempDir::new().unwrap();
    knowgraph_cmd(&temp_dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("knowgraph"));
}

#[test]
fn test_config_set_and_get() {
    let temp_dir = TempDir::new().unwrap();

    knowgraph_cmd(&temp_dir)
        .args(["config", "set", "extraction.strategy", "single-pass"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Set extraction.strategy = single-pass"));

    knowgraph_cmd(&temp_dir)
        .args(["config", "get", "extraction.strategy"])
        .assert()
        .success()
        .stdout(predicate::str::contains("single-pass"));

    assert!(temp_dir.path().join("config").join("config.toml").exists());
}

#[test]
fn test_config_list_shows_defaults() {
    let temp_dir = TempDir::new().unwrap();
    knowgraph_cmd(&temp_dir)
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("extraction.strategy = four-stage"))
        .stdout(predicate::str::contains("dedup.similarity_threshold = 0.85"))
        .stdout(predicate::str::contains("storage.database_path = default"));
}

#[test]
fn test_config_reset() {
    let temp_dir = TempDir::new().unwrap();
    knowgraph_cmd(&temp_dir)
        .args(["config", "set", "dedup.enabled", "false"])
        .assert()
        .success();

    knowgraph_cmd(&temp_dir)
        .args(["config", "reset"])
        .assert()
        .success()
        .stdout(predicate::str::contains("reset to defaults"));

    knowgraph_cmd(&temp_dir)
        .args(["config", "get", "dedup.enabled"])
        .assert()
        .success()
        .stdout(predicate::str::contains("true"));
}

#[test]
fn test_config_rejects_unknown_key_and_api_key() {
    let temp_dir = TempDir::new().unwrap();

    knowgraph_cmd(&temp_dir)
        .args(["config", "get", "no.such.key"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown configuration key"));

    knowgraph_cmd(&temp_dir)
        .args(["config", "set", "llm.api_key", "sk-secret"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("environment variable"));
}

#[test]
fn test_config_path_uses_config_dir() {
    let temp_dir = TempDir::new().unwrap();
    knowgraph_cmd(&temp_dir)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_stats_on_empty_graph() {
    let temp_dir = TempDir::new().unwrap();
    use_temp_databases(&temp_dir);

    knowgraph_cmd(&temp_dir)
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("Triples: 0"))
        .stdout(predicate::str::contains("Total: 0"));

    assert!(temp_dir.path().join("knowledge.db").exists());
    assert!(temp_dir.path().join("vectors.db").exists());
}

#[test]
fn test_stats_json_output() {
    let temp_dir = TempDir::new().unwrap();
    use_temp_databases(&temp_dir);

    let output = knowgraph_cmd(&temp_dir)
        .args(["--format", "json", "stats"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["knowledge"]["triples"], 0);
    assert_eq!(stats["vectors"]["total"], 0);
}

#[test]
fn test_enqueue_then_list_and_show() {
    let temp_dir = TempDir::new().unwrap();
    use_temp_databases(&temp_dir);
    let input = write_input(&temp_dir, "notes.md", "Alice founded Acme in 2019.");

    let output = knowgraph_cmd(&temp_dir)
        .args(["--format", "json", "enqueue", &input, "--parent", "run-1"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let job: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(job["status"], "QUEUED");
    assert_eq!(job["job_type"], "EXTRACTION");
    assert_eq!(job["parent_job_id"], "run-1");
    assert_eq!(job["metadata"]["source"], "notes.md");
    let id = job["id"].as_str().unwrap().to_string();

    knowgraph_cmd(&temp_dir)
        .args(["jobs", "--status", "queued"])
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()))
        .stdout(predicate::str::contains("EXTRACTION"));

    knowgraph_cmd(&temp_dir)
        .args(["job", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Status: QUEUED"))
        .stdout(predicate::str::contains("Source: notes.md (document)"))
        .stdout(predicate::str::contains("Parent: run-1"));
}

#[test]
fn test_enqueue_rejects_empty_input() {
    let temp_dir = TempDir::new().unwrap();
    use_temp_databases(&temp_dir);
    let input = write_input(&temp_dir, "empty.md", "   \n");

    knowgraph_cmd(&temp_dir)
        .args(["enqueue", &input])
        .assert()
        .failure()
        .stderr(predicate::str::contains("empty"));
}

#[test]
fn test_missing_job() {
    let temp_dir = TempDir::new().unwrap();
    use_temp_databases(&temp_dir);

    knowgraph_cmd(&temp_dir)
        .args(["job", "does-not-exist"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does-not-exist"));
}

#[test]
fn test_jobs_rejects_unknown_status() {
    let temp_dir = TempDir::new().unwrap();
    use_temp_databases(&temp_dir);

    knowgraph_cmd(&temp_dir)
        .args(["jobs", "--status", "sleeping"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown job status"));
}

#[test]
fn test_run_job_requires_api_key() {
    let temp_dir = TempDir::new().unwrap();
    use_temp_databases(&temp_dir);
    let input = write_input(&temp_dir, "notes.md", "Alice founded Acme.");

    knowgraph_cmd(&temp_dir)
        .args(["enqueue", &input])
        .assert()
        .success();

    knowgraph_cmd(&temp_dir)
        .arg("run-job")
        .assert()
        .failure()
        .stderr(predicate::str::contains("KNOWGRAPH_API_KEY"));
}

#[test]
fn test_process_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    use_temp_databases(&temp_dir);

    knowgraph_cmd(&temp_dir)
        .args(["process", "nope.md"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read input file"));
}

#[test]
fn test_process_rejects_unknown_strategy() {
    let temp_dir = TempDir::new().unwrap();
    let input = write_input(&temp_dir, "notes.md", "Alice founded Acme.");

    knowgraph_cmd(&temp_dir)
        .args(["process", &input, "--strategy", "three-stage"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown strategy"));
}

#[test]
fn test_doctor_command() {
    let temp_dir = TempDir::new().unwrap();
    use_temp_databases(&temp_dir);

    knowgraph_cmd(&temp_dir)
        .arg("doctor")
        .assert()
        .success()
        .stdout(predicate::str::contains("Knowgraph Health Check"))
        .stdout(predicate::str::contains("[!!] API Key: Not configured"))
        .stdout(predicate::str::contains("knowledge database: Schema v2"))
        .stdout(predicate::str::contains("vectors database: Schema v1"));
}

#[test]
fn test_entities_on_empty_graph() {
    let temp_dir = TempDir::new().unwrap();
    use_temp_databases(&temp_dir);

    knowgraph_cmd(&temp_dir)
        .arg("entities")
        .assert()
        .success()
        .stdout(predicate::str::contains("No entities found."));
}

#[test]
fn test_entities_lists_counts() {
    let temp_dir = TempDir::new().unwrap();
    use_temp_databases(&temp_dir);
    seed_triples(
        &temp_dir,
        &[("Alice", "founded", "Acme"), ("Alice", "knows", "Bob"), ("Bob", "joined", "Acme")],
    );

    knowgraph_cmd(&temp_dir)
        .args(["entities", "--role", "subject"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Alice - 2 (2 as subject, 0 as object)"))
        .stdout(predicate::str::contains("Bob - 1 (1 as subject, 0 as object)"))
        .stdout(predicate::str::contains("Acme").not());

    let output = knowgraph_cmd(&temp_dir)
        .args(["--format", "json", "entities", "--min-occurrence", "2"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let entities: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let names: Vec<&str> = entities
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Acme", "Alice", "Bob"]);
    assert_eq!(entities[0]["as_object"], 2);
}

#[test]
fn test_entities_rejects_unknown_options() {
    let temp_dir = TempDir::new().unwrap();
    use_temp_databases(&temp_dir);

    knowgraph_cmd(&temp_dir)
        .args(["entities", "--role", "predicate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown role"));

    knowgraph_cmd(&temp_dir)
        .args(["entities", "--type", "entity-thing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown triple type"));
}

#[test]
fn test_search_requires_api_key() {
    let temp_dir = TempDir::new().unwrap();
    use_temp_databases(&temp_dir);

    knowgraph_cmd(&temp_dir)
        .args(["search", "who founded Acme"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("KNOWGRAPH_API_KEY"));

    knowgraph_cmd(&temp_dir)
        .args(["search", "who founded Acme", "--type", "bogus"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown triple type"));
}
