//! Knowgraph CLI - turn text into a knowledge graph

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use knowgraph_core::config::{Config, ExtractionStrategy};
use knowgraph_core::knowledge::{JobMetadata, JobStatus, JobType, NewJob, ProcessingJob, Provenance, TripleType};
use knowgraph_core::llm::LlmClient;
use knowgraph_core::pipeline::{PipelineCoordinator, PipelineServices, ProcessingSummary, SearchOptions};
use knowgraph_core::storage::{
    Databases, EntityQuery, EntityRole, EntitySort, JobRepository, KnowledgeStats, KnowledgeStore, Schema,
    SqliteJobRepository, SqliteKnowledgeStore, SqliteVectorStore, VectorStats, VectorStore,
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "knowgraph")]
#[command(author, version, about = "Turn text into a knowledge graph", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract, conceptualize and store a document in one run
    Process {
        /// Input file, or `-` for stdin
        input: String,
        /// Source label recorded on every triple (defaults to the file name)
        #[arg(short, long)]
        source: Option<String>,
        /// Kind of source, e.g. document, transcript, email
        #[arg(long, default_value = "document")]
        source_type: String,
        /// Override the configured extraction strategy
        #[arg(long)]
        strategy: Option<String>,
    },

    /// Queue a document for background extraction
    Enqueue {
        /// Input file, or `-` for stdin
        input: String,
        #[arg(short, long)]
        source: Option<String>,
        #[arg(long, default_value = "document")]
        source_type: String,
        /// Group the extraction and its downstream jobs under this id
        #[arg(short, long)]
        parent: Option<String>,
    },

    /// Run one queued job, or every queued job when no id is given
    RunJob {
        id: Option<String>,
        /// Maximum jobs to run when draining the queue
        #[arg(short, long, default_value_t = 100)]
        limit: u32,
    },

    /// Show a job and the jobs sharing its parent
    Job { id: String },

    /// List jobs
    Jobs {
        /// Filter by status (QUEUED, PROCESSING, COMPLETED, FAILED)
        #[arg(short, long)]
        status: Option<String>,
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },

    /// Find stored triples (or concepts) similar to a query
    Search {
        query: String,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        /// Minimum cosine similarity
        #[arg(short, long, default_value_t = 0.7)]
        threshold: f32,
        /// Only these triple types (repeatable)
        #[arg(long = "type")]
        types: Vec<String>,
        /// Only triples from these sources (repeatable)
        #[arg(long = "source")]
        sources: Vec<String>,
        /// Search concept labels instead of triples
        #[arg(long)]
        concepts: bool,
    },

    /// List subjects and objects by occurrence
    Entities {
        /// subject, object or both
        #[arg(long, default_value = "both")]
        role: String,
        #[arg(long, default_value_t = 1)]
        min_occurrence: u32,
        #[arg(short, long, default_value_t = 100)]
        limit: u32,
        /// frequency or name
        #[arg(long, default_value = "frequency")]
        sort: String,
        #[arg(long = "source")]
        sources: Vec<String>,
        #[arg(long = "type")]
        types: Vec<String>,
    },

    /// Show knowledge and vector counts
    Stats,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("knowgraph=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            input,
            source,
            source_type,
            strategy,
        } => cmd_process(&input, source, &source_type, strategy.as_deref(), cli.format, cli.quiet).await,

        Commands::Enqueue {
            input,
            source,
            source_type,
            parent,
        } => cmd_enqueue(&input, source, &source_type, parent, cli.format, cli.quiet).await,

        Commands::RunJob { id, limit } => cmd_run_job(id.as_deref(), limit, cli.format, cli.quiet).await,

        Commands::Job { id } => cmd_job(&id, cli.format).await,

        Commands::Jobs { status, limit } => cmd_jobs(status.as_deref(), limit, cli.format).await,

        Commands::Search {
            query,
            limit,
            threshold,
            types,
            sources,
            concepts,
        } => {
            let options = SearchOptions {
                limit,
                threshold,
                types: parse_triple_types(&types)?,
                sources,
            };
            cmd_search(&query, &options, concepts, cli.format).await
        }

        Commands::Entities {
            role,
            min_occurrence,
            limit,
            sort,
            sources,
            types,
        } => {
            let query = EntityQuery {
                role: EntityRole::parse(&role)
                    .ok_or_else(|| anyhow!("Unknown role '{}'. Use subject, object or both.", role))?,
                min_occurrence,
                limit,
                sort_by: EntitySort::parse(&sort)
                    .ok_or_else(|| anyhow!("Unknown sort '{}'. Use frequency or name.", sort))?,
                sources,
                types: parse_triple_types(&types)?,
            };
            cmd_entities(&query, cli.format).await
        }

        Commands::Stats => cmd_stats(cli.format).await,

        Commands::Config { action } => cmd_config(action, cli.quiet),

        Commands::Doctor => cmd_doctor(cli.quiet).await,
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// Open both databases and the repositories over them
struct Stores {
    dbs: Databases,
    knowledge: Arc<SqliteKnowledgeStore>,
    vectors: Arc<SqliteVectorStore>,
    jobs: Arc<SqliteJobRepository>,
}

impl Stores {
    async fn open(config: &Config) -> anyhow::Result<Self> {
        let dbs = Databases::open(&config.storage).await?;
        let knowledge = Arc::new(SqliteKnowledgeStore::new(dbs.knowledge().pool().clone(), &config.storage));
        let vectors = Arc::new(SqliteVectorStore::new(
            dbs.vectors().pool().clone(),
            config.embedding.dimension,
        ));
        let jobs = Arc::new(SqliteJobRepository::new(dbs.knowledge().pool().clone()));
        Ok(Self {
            dbs,
            knowledge,
            vectors,
            jobs,
        })
    }

    async fn close(self) {
        self.dbs.close().await;
    }
}

fn build_coordinator(config: &Config, stores: &Stores) -> anyhow::Result<PipelineCoordinator> {
    let api_key = config.llm.resolved_api_key()?.ok_or_else(|| {
        anyhow!("No API key configured. Set KNOWGRAPH_API_KEY or OPENROUTER_API_KEY.")
    })?;

    let mut builder = LlmClient::builder()
        .config(config.llm.clone())
        .embedding(config.embedding.clone())
        .api_key(api_key);
    if let Ok(url) = std::env::var("KNOWGRAPH_BASE_URL") {
        builder = builder.base_url(url);
    }
    let client = Arc::new(builder.build()?);

    Ok(PipelineCoordinator::new(
        PipelineServices {
            ai: client.clone(),
            embedder: client,
            knowledge: stores.knowledge.clone(),
            vectors: stores.vectors.clone(),
            jobs: stores.jobs.clone(),
        },
        config,
    ))
}

/// Read a file or stdin and derive the source label
fn read_input(input: &str, source: Option<String>) -> anyhow::Result<(String, String)> {
    let (text, default_source) = if input == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        (text, "stdin".to_string())
    } else {
        let path = Path::new(input);
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| input.to_string());
        (text, name)
    };
    Ok((text, source.unwrap_or(default_source)))
}

fn parse_triple_types(values: &[String]) -> anyhow::Result<Vec<TripleType>> {
    values
        .iter()
        .map(|v| TripleType::parse(v).ok_or_else(|| anyhow!("Unknown triple type '{}'", v)))
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_process(
    input: &str,
    source: Option<String>,
    source_type: &str,
    strategy: Option<&str>,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(strategy) = strategy {
        config.extraction.strategy = ExtractionStrategy::parse(strategy)
            .ok_or_else(|| anyhow!("Unknown strategy '{}'. Use single-pass or four-stage.", strategy))?;
    }
    let (text, source) = read_input(input, source)?;

    let stores = Stores::open(&config).await?;
    let coordinator = build_coordinator(&config, &stores)?;
    let result = coordinator
        .process_knowledge(&text, &Provenance::new(&source, source_type))
        .await;
    stores.close().await;
    let summary = result?;

    if format == OutputFormat::Json {
        return print_json(&summary);
    }
    if !quiet {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &ProcessingSummary) {
    println!("Processed '{}' ({})", summary.source, summary.strategy);
    println!(
        "  Chunks: {}/{} processed",
        summary.chunks_processed, summary.chunks_total
    );
    if !summary.failed_stages.is_empty() {
        println!("  Failed: {}", summary.failed_stages.join(", "));
    }
    println!(
        "  Triples: {} extracted, {} merged, {} stored",
        summary.triples_extracted, summary.duplicates_removed, summary.storage.triples_stored
    );
    println!(
        "  Concepts: {} stored, {} conceptualizations{}",
        summary.storage.concepts_stored,
        summary.storage.conceptualizations_stored,
        if summary.conceptualization_degraded {
            " (degraded)"
        } else {
            ""
        }
    );
    println!("  Vectors: {}", summary.storage.vectors_generated);
    if summary.storage.duplicates_skipped > 0 {
        println!("  Already stored: {}", summary.storage.duplicates_skipped);
    }
}

async fn cmd_enqueue(
    input: &str,
    source: Option<String>,
    source_type: &str,
    parent: Option<String>,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let (text, source) = read_input(input, source)?;
    if text.trim().is_empty() {
        return Err(anyhow!("Input is empty, nothing to enqueue"));
    }

    let stores = Stores::open(&config).await?;
    let metadata = JobMetadata::new(&Provenance::new(&source, source_type))
        .with_resource_limits(config.pipeline.resource_limits);
    let parent = parent.unwrap_or_else(|| Uuid::new_v4().to_string());
    let result = stores
        .jobs
        .enqueue(NewJob::new(JobType::Extraction, metadata, text).with_parent(parent))
        .await;
    let job = match result {
        Ok(id) => stores.jobs.get(&id).await,
        Err(e) => Err(e),
    };
    stores.close().await;
    let job = job?;

    if format == OutputFormat::Json {
        return print_json(&job);
    }
    if !quiet {
        println!("Job queued: {}", job.id);
        if let Some(parent) = &job.parent_job_id {
            println!("  Parent: {}", parent);
        }
        println!("\nRun it with: knowgraph run-job {}", job.id);
    }
    Ok(())
}

async fn cmd_run_job(id: Option<&str>, limit: u32, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let config = Config::load()?;
    let stores = Stores::open(&config).await?;
    let coordinator = build_coordinator(&config, &stores)?;

    let result = match id {
        Some(id) => coordinator.run_job(id).await.map(|job| vec![job]),
        None => coordinator.run_queued(limit).await,
    };
    coordinator.wait_for_dispatch().await;
    stores.close().await;
    let jobs = result?;

    if format == OutputFormat::Json {
        return print_json(&jobs);
    }
    if jobs.is_empty() {
        if !quiet {
            println!("No queued jobs.");
        }
        return Ok(());
    }
    for job in &jobs {
        print_job_line(job);
    }
    let failed = jobs.iter().filter(|j| j.status == JobStatus::Failed).count();
    if failed > 0 {
        warn!(failed, "Some jobs failed");
    }
    Ok(())
}

async fn cmd_job(id: &str, format: OutputFormat) -> anyhow::Result<()> {
    let config = Config::load()?;
    let stores = Stores::open(&config).await?;
    let result = async {
        let job = stores.jobs.get(id).await?;
        let siblings = match &job.parent_job_id {
            Some(parent) => stores.jobs.children(parent).await?,
            None => Vec::new(),
        };
        Ok::<_, knowgraph_core::Error>((job, siblings))
    }
    .await;
    stores.close().await;
    let (job, siblings) = result?;

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({ "job": job, "related": siblings }));
    }

    println!("Job: {}", job.id);
    println!("  Type: {}", job.job_type.as_str());
    println!("  Stage: {}", job.stage);
    println!("  Status: {}", job.status);
    println!("  Progress: {}%", job.progress);
    println!("  Source: {} ({})", job.metadata.source, job.metadata.source_type);
    if let Some(parent) = &job.parent_job_id {
        println!("  Parent: {}", parent);
    }
    if let Some(error) = &job.error {
        println!("  Error: {}", error);
    }
    println!("  Created: {}", job.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Updated: {}", job.updated_at.format("%Y-%m-%d %H:%M:%S"));

    let related: Vec<&ProcessingJob> = siblings.iter().filter(|j| j.id != job.id).collect();
    if !related.is_empty() {
        println!("\nRelated jobs:");
        for job in related {
            print_job_line(job);
        }
    }
    Ok(())
}

async fn cmd_jobs(status: Option<&str>, limit: u32, format: OutputFormat) -> anyhow::Result<()> {
    let status = status
        .map(|s| {
            JobStatus::parse(&s.to_uppercase()).ok_or_else(|| anyhow!("Unknown job status '{}'", s))
        })
        .transpose()?;

    let config = Config::load()?;
    let stores = Stores::open(&config).await?;
    let result = stores.jobs.list(status, limit).await;
    stores.close().await;
    let jobs = result?;

    if format == OutputFormat::Json {
        return print_json(&jobs);
    }
    if jobs.is_empty() {
        println!("No jobs found.");
        println!("\nQueue one with: knowgraph enqueue <file>");
        return Ok(());
    }
    println!("Jobs:");
    for job in &jobs {
        print_job_line(job);
    }
    Ok(())
}

fn print_job_line(job: &ProcessingJob) {
    println!(
        "  {} - {} [{}] {}%{}",
        job.id,
        job.job_type.as_str(),
        job.status,
        job.progress,
        job.error
            .as_deref()
            .map(|e| format!(" ({})", e))
            .unwrap_or_default()
    );
}

async fn cmd_search(query: &str, options: &SearchOptions, concepts: bool, format: OutputFormat) -> anyhow::Result<()> {
    let config = Config::load()?;
    let stores = Stores::open(&config).await?;
    let coordinator = build_coordinator(&config, &stores)?;

    if concepts {
        let result = coordinator
            .search_concepts(query, options.limit, options.threshold)
            .await;
        stores.close().await;
        let hits = result?;

        if format == OutputFormat::Json {
            return print_json(&hits);
        }
        if hits.is_empty() {
            println!("No matching concepts.");
        }
        for hit in &hits {
            println!(
                "  {:.3}  {} ({})",
                hit.score,
                hit.concept.concept,
                hit.concept.abstraction_level.as_str()
            );
        }
        return Ok(());
    }

    let result = coordinator.search_knowledge(query, options).await;
    stores.close().await;
    let hits = result?;

    if format == OutputFormat::Json {
        return print_json(&hits);
    }
    if hits.is_empty() {
        println!("No matching triples.");
    }
    for hit in &hits {
        println!(
            "  {:.3}  {} -[{}]-> {}  ({}, {})",
            hit.score,
            hit.triple.subject,
            hit.triple.predicate,
            hit.triple.object,
            hit.triple.triple_type,
            hit.triple.source
        );
    }
    Ok(())
}

async fn cmd_entities(query: &EntityQuery, format: OutputFormat) -> anyhow::Result<()> {
    let config = Config::load()?;
    let stores = Stores::open(&config).await?;
    let result = stores.knowledge.entities(query).await;
    stores.close().await;
    let entities = result?;

    if format == OutputFormat::Json {
        return print_json(&entities);
    }
    if entities.is_empty() {
        println!("No entities found.");
        return Ok(());
    }
    println!("Entities:");
    for entity in &entities {
        println!(
            "  {} - {} ({} as subject, {} as object)",
            entity.name, entity.occurrences, entity.as_subject, entity.as_object
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct StatsReport {
    knowledge: KnowledgeStats,
    vectors: VectorStats,
}

async fn cmd_stats(format: OutputFormat) -> anyhow::Result<()> {
    let config = Config::load()?;
    let stores = Stores::open(&config).await?;
    let result = async {
        Ok::<_, knowgraph_core::Error>(StatsReport {
            knowledge: stores.knowledge.stats().await?,
            vectors: stores.vectors.stats().await?,
        })
    }
    .await;
    stores.close().await;
    let stats = result?;

    if format == OutputFormat::Json {
        return print_json(&stats);
    }

    println!("Knowledge graph");
    println!("  Triples: {}", stats.knowledge.triples);
    for (triple_type, count) in &stats.knowledge.triples_by_type {
        println!("    {}: {}", triple_type, count);
    }
    println!("  Concepts: {}", stats.knowledge.concepts);
    println!("  Conceptualizations: {}", stats.knowledge.conceptualizations);
    println!("Vectors");
    println!("  Total: {}", stats.vectors.total);
    for (vector_type, count) in &stats.vectors.by_type {
        println!("    {}: {}", vector_type, count);
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            for (key, value) in items {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

async fn cmd_doctor(quiet: bool) -> anyhow::Result<()> {
    if !quiet {
        println!("Knowgraph Health Check");
        println!("======================");
        println!();
    }

    let mut all_ok = true;

    let config = match Config::load() {
        Ok(config) => {
            if !quiet {
                println!("[OK] Configuration: Valid");
            }
            match config.llm.redacted_api_key() {
                Ok(Some(redacted)) => {
                    if !quiet {
                        println!("[OK] API Key: Configured ({})", redacted);
                    }
                }
                Ok(None) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] API Key: Not configured");
                        println!("     Set KNOWGRAPH_API_KEY or OPENROUTER_API_KEY environment variable");
                    }
                }
                Err(e) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] API Key: Error - {}", e);
                    }
                }
            }
            Some(config)
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Configuration: Error - {}", e);
            }
            None
        }
    };

    if !quiet {
        match Config::config_path() {
            Ok(path) if path.exists() => println!("[OK] Config file: {}", path.display()),
            Ok(path) => println!("[--] Config file: {} (using defaults)", path.display()),
            Err(e) => println!("[!!] Config file: Error - {}", e),
        }
    }

    if let Some(config) = config {
        match Databases::open(&config.storage).await {
            Ok(dbs) => {
                for (schema, db) in [(Schema::Knowledge, dbs.knowledge()), (Schema::Vectors, dbs.vectors())] {
                    let health = db.health_check().await;
                    let status = db.migration_status().await;
                    if !quiet {
                        match (health, status) {
                            (Ok(()), Ok(status)) => {
                                println!(
                                    "[OK] {} database: Schema v{} ({})",
                                    schema.as_str(),
                                    status.current_version,
                                    db.path().display()
                                );
                            }
                            (Err(e), _) | (_, Err(e)) => {
                                all_ok = false;
                                println!("[!!] {} database: {}", schema.as_str(), e);
                            }
                        }
                    }
                }
                dbs.close().await;
            }
            Err(e) => {
                all_ok = false;
                if !quiet {
                    println!("[!!] Databases: Failed to open - {}", e);
                }
            }
        }
    }

    if !quiet {
        println!();
        if all_ok {
            println!("All checks passed!");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    info!(all_ok, "Health check finished");

    Ok(())
}
