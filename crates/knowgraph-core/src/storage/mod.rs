//! Storage layer - SQLite relational and vector databases
//!
//! # Architecture
//!
//! - `database`: Connection pool management and initialization
//! - `migrations`: Schema versioning for both databases
//! - `knowledge_store` / `vector_store`: store traits and their SQLite adapters
//! - `batch`: two-phase batch storage with compensating rollback
//! - `jobs`: processing job repository, which doubles as the job queue
//!
//! # Usage
//!
//! ```ignore
//! use knowgraph_core::storage::{Databases, SqliteKnowledgeStore, SqliteVectorStore};
//!
//! let dbs = Databases::in_memory().await?;
//! let knowledge = SqliteKnowledgeStore::new(dbs.knowledge().pool().clone(), &config.storage);
//! let vectors = SqliteVectorStore::new(dbs.vectors().pool().clone(), config.embedding.dimension);
//! ```

pub mod batch;
pub mod database;
pub mod jobs;
pub mod knowledge_store;
pub mod migrations;
pub mod sanitize;
pub mod vector_store;

use sqlx::{QueryBuilder, Sqlite};

pub use batch::{BatchLimits, BatchStorageEngine, BatchStorageResult};
pub use database::{Database, DatabaseConfig, Databases};
pub use jobs::{JobRepository, SqliteJobRepository};
pub use knowledge_store::{
    EntityCount, EntityQuery, EntityRole, EntitySort, InsertOutcome, KnowledgeBatch, KnowledgeStats, KnowledgeStore,
    SqliteKnowledgeStore, StoredIds,
};
pub use migrations::{MigrationStatus, Schema, migration_status, run_migrations};
pub use vector_store::{SqliteVectorStore, VectorMatch, VectorStats, VectorStore};

/// Ids per `IN (...)` list and rows per multi-row insert
pub(crate) const SQL_CHUNK: usize = 500;

/// Append ` IN (?, ?, ...)` binding every id
pub(crate) fn push_in_list<'args>(qb: &mut QueryBuilder<'args, Sqlite>, ids: &'args [String]) {
    qb.push(" IN (");
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(id.as_str());
    }
    qb.push(")");
}

pub(crate) fn parse_timestamp(value: &str) -> crate::Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| crate::Error::Other(format!("Invalid stored timestamp '{}': {}", value, e)))
}
