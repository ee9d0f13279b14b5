//! Database migrations
//!
//! Two independent schemas are versioned here: the relational knowledge
//! database and the vector database. Each tracks applied versions in its own
//! `_migrations` table and is migrated automatically on connection.

use sqlx::SqlitePool;

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Knowledge v1: triples, concepts and conceptualizations
const KNOWLEDGE_V1: &str = r#"
    CREATE TABLE IF NOT EXISTS triples (
        id TEXT PRIMARY KEY NOT NULL,
        subject TEXT NOT NULL,
        predicate TEXT NOT NULL,
        object TEXT NOT NULL,
        triple_type TEXT NOT NULL CHECK (triple_type IN ('entity-entity', 'entity-event', 'event-event', 'emotional-context')),
        source TEXT NOT NULL,
        source_type TEXT NOT NULL,
        source_date TEXT,
        extracted_at TEXT NOT NULL,
        confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_triples_source ON triples(source);
    CREATE INDEX IF NOT EXISTS idx_triples_subject ON triples(subject);
    CREATE INDEX IF NOT EXISTS idx_triples_object ON triples(object);
    CREATE INDEX IF NOT EXISTS idx_triples_type ON triples(triple_type);

    CREATE TABLE IF NOT EXISTS concepts (
        id TEXT PRIMARY KEY NOT NULL,
        concept TEXT NOT NULL,
        abstraction_level TEXT NOT NULL CHECK (abstraction_level IN ('high', 'medium', 'low')),
        confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
        source TEXT NOT NULL,
        source_type TEXT NOT NULL,
        extracted_at TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_concepts_source ON concepts(source);

    CREATE TABLE IF NOT EXISTS conceptualizations (
        id TEXT PRIMARY KEY NOT NULL,
        source_element TEXT NOT NULL,
        element_type TEXT NOT NULL CHECK (element_type IN ('entity', 'event', 'relation')),
        concept TEXT NOT NULL,
        confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
        context_triples TEXT NOT NULL DEFAULT '[]',
        source TEXT NOT NULL,
        source_type TEXT NOT NULL,
        extracted_at TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_conceptualizations_concept ON conceptualizations(concept);
    CREATE INDEX IF NOT EXISTS idx_conceptualizations_source ON conceptualizations(source);
"#;

/// Knowledge v2: processing jobs
const KNOWLEDGE_V2: &str = r#"
    CREATE TABLE IF NOT EXISTS processing_jobs (
        id TEXT PRIMARY KEY NOT NULL,
        job_type TEXT NOT NULL CHECK (job_type IN ('EXTRACTION', 'CONCEPTUALIZATION', 'DEDUPLICATION')),
        stage TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'QUEUED' CHECK (status IN ('QUEUED', 'PROCESSING', 'COMPLETED', 'FAILED')),
        parent_job_id TEXT,
        progress INTEGER NOT NULL DEFAULT 0 CHECK (progress >= 0 AND progress <= 100),
        metadata TEXT NOT NULL DEFAULT '{}',
        text TEXT NOT NULL DEFAULT '',
        error TEXT,
        result TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_processing_jobs_status ON processing_jobs(status);
    CREATE INDEX IF NOT EXISTS idx_processing_jobs_parent ON processing_jobs(parent_job_id);
"#;

/// Vectors v1: embeddings owned by exactly one triple or concept
const VECTORS_V1: &str = r#"
    CREATE TABLE IF NOT EXISTS vector_embeddings (
        id TEXT PRIMARY KEY NOT NULL,
        text TEXT NOT NULL,
        embedding BLOB NOT NULL,
        dimension INTEGER NOT NULL,
        vector_type TEXT NOT NULL CHECK (vector_type IN ('ENTITY', 'RELATIONSHIP', 'SEMANTIC', 'CONCEPT')),
        triple_id TEXT,
        concept_id TEXT,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        CHECK ((triple_id IS NULL) <> (concept_id IS NULL))
    );

    CREATE INDEX IF NOT EXISTS idx_vectors_triple_id ON vector_embeddings(triple_id);
    CREATE INDEX IF NOT EXISTS idx_vectors_concept_id ON vector_embeddings(concept_id);
    CREATE INDEX IF NOT EXISTS idx_vectors_type ON vector_embeddings(vector_type);
"#;

/// One versioned schema step
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub sql: &'static str,
}

const KNOWLEDGE_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Triples, concepts and conceptualizations",
        sql: KNOWLEDGE_V1,
    },
    Migration {
        version: 2,
        description: "Processing jobs",
        sql: KNOWLEDGE_V2,
    },
];

const VECTOR_MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "Vector embeddings",
    sql: VECTORS_V1,
}];

/// Which database a pool holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    Knowledge,
    Vectors,
}

impl Schema {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Knowledge => "knowledge",
            Self::Vectors => "vectors",
        }
    }

    pub fn migrations(&self) -> &'static [Migration] {
        match self {
            Self::Knowledge => KNOWLEDGE_MIGRATIONS,
            Self::Vectors => VECTOR_MIGRATIONS,
        }
    }

    /// Latest version for this schema
    pub fn current_version(&self) -> i32 {
        self.migrations().iter().map(|m| m.version).max().unwrap_or(0)
    }
}

/// Get the current schema version from the database
async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    // Ensure migrations table exists
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    let row: Option<(Option<i32>,)> = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_optional(pool)
        .await?;

    Ok(row.and_then(|(v,)| v).unwrap_or(0))
}

/// Record that a migration has been applied
async fn record_migration(pool: &SqlitePool, version: i32) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations for `schema`
pub async fn run_migrations(pool: &SqlitePool, schema: Schema) -> anyhow::Result<()> {
    let current_version = get_current_version(pool).await?;
    let target_version = schema.current_version();

    tracing::info!(
        schema = schema.as_str(),
        current_version,
        target_version,
        "Checking database migrations"
    );

    if current_version >= target_version {
        tracing::debug!(schema = schema.as_str(), "Database is up to date");
        return Ok(());
    }

    for migration in schema.migrations().iter().filter(|m| m.version > current_version) {
        tracing::info!(
            schema = schema.as_str(),
            version = migration.version,
            "Applying migration: {}",
            migration.description
        );
        sqlx::raw_sql(migration.sql).execute(pool).await?;
        record_migration(pool, migration.version).await?;
    }

    tracing::info!(schema = schema.as_str(), "Database migrations completed");
    Ok(())
}

/// Get migration status information
pub async fn migration_status(pool: &SqlitePool, schema: Schema) -> anyhow::Result<MigrationStatus> {
    let current_version = get_current_version(pool).await?;
    let target_version = schema.current_version();
    Ok(MigrationStatus {
        current_version,
        target_version,
        needs_migration: current_version < target_version,
    })
}

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub current_version: i32,
    pub target_version: i32,
    pub needs_migration: bool,
}
