//! Vector store: embeddings owned by triples or concepts
//!
//! Lives in its own database, so nothing here can join a knowledge store
//! transaction. Embeddings are stored as little-endian `f32` blobs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use super::{SQL_CHUNK, push_in_list};
use crate::dedup::cosine_similarity;
use crate::error::{Error, FieldError, Result};
use crate::knowledge::{VectorEmbedding, VectorOwner, VectorType};

#[derive(Debug, Clone, Default, Serialize)]
pub struct VectorStats {
    pub total: i64,
    pub by_type: BTreeMap<String, i64>,
}

/// A stored vector scored against a query vector
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub vector: VectorEmbedding,
    /// Cosine similarity in `[-1, 1]`
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Dimension every stored vector must have
    fn dimension(&self) -> usize;

    /// Insert one vector; `false` when the id was already present
    async fn insert(&self, vector: &VectorEmbedding) -> Result<bool>;

    async fn delete_by_owners(&self, triple_ids: &[String], concept_ids: &[String]) -> Result<u64>;

    async fn count_by_owners(&self, triple_ids: &[String], concept_ids: &[String]) -> Result<u64>;

    async fn vectors_for(&self, owner: &VectorOwner) -> Result<Vec<VectorEmbedding>>;

    /// Vectors of the given types scoring at least `threshold`, best first.
    /// An empty `types` slice searches every type.
    async fn search(
        &self,
        query: &[f32],
        types: &[VectorType],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<VectorMatch>>;

    async fn stats(&self) -> Result<VectorStats>;
}

/// SQLite implementation of the vector store
#[derive(Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
    dimension: usize,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool, dimension: usize) -> Self {
        Self { pool, dimension }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn check_dimension(&self, operation: &str, field: &str, len: usize) -> Result<()> {
        if len == self.dimension {
            return Ok(());
        }
        Err(Error::Validation {
            operation: operation.to_string(),
            fields: vec![FieldError::new(
                field,
                format!("expected dimension {}, got {}", self.dimension, len),
            )],
        })
    }

    async fn owner_query(&self, verb: &str, column: &str, ids: &[String]) -> Result<u64> {
        let mut total = 0;
        for chunk in ids.chunks(SQL_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("{} FROM vector_embeddings WHERE {}", verb, column));
            push_in_list(&mut qb, chunk);
            total += if verb == "DELETE" {
                qb.build().execute(&self.pool).await?.rows_affected()
            } else {
                let (count,): (i64,) = qb.build_query_as().fetch_one(&self.pool).await?;
                u64::try_from(count).unwrap_or(0)
            };
        }
        Ok(total)
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn insert(&self, vector: &VectorEmbedding) -> Result<bool> {
        self.check_dimension("vector_store.insert", "embedding", vector.embedding.len())?;

        let dimension = i64::try_from(vector.embedding.len())
            .map_err(|_| Error::Other("Vector dimension overflows i64".to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO vector_embeddings (id, text, embedding, dimension, vector_type, triple_id, concept_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&vector.id)
        .bind(&vector.text)
        .bind(encode_embedding(&vector.embedding))
        .bind(dimension)
        .bind(vector.vector_type.as_str())
        .bind(vector.owner.triple_id())
        .bind(vector.owner.concept_id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_owners(&self, triple_ids: &[String], concept_ids: &[String]) -> Result<u64> {
        let deleted = self.owner_query("DELETE", "triple_id", triple_ids).await?
            + self.owner_query("DELETE", "concept_id", concept_ids).await?;
        debug!(deleted, "Deleted vectors by owner");
        Ok(deleted)
    }

    async fn count_by_owners(&self, triple_ids: &[String], concept_ids: &[String]) -> Result<u64> {
        Ok(self.owner_query("SELECT COUNT(*)", "triple_id", triple_ids).await?
            + self.owner_query("SELECT COUNT(*)", "concept_id", concept_ids).await?)
    }

    async fn vectors_for(&self, owner: &VectorOwner) -> Result<Vec<VectorEmbedding>> {
        let column = match owner {
            VectorOwner::Triple(_) => "triple_id",
            VectorOwner::Concept(_) => "concept_id",
        };

        let rows: Vec<VectorRow> = sqlx::query_as(&format!(
            "SELECT id, text, embedding, vector_type, triple_id, concept_id \
             FROM vector_embeddings WHERE {} = ? ORDER BY created_at, id",
            column
        ))
        .bind(owner.id())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(VectorRow::into_entity).collect()
    }

    // Brute-force cosine scan over the decoded blobs
    async fn search(
        &self,
        query: &[f32],
        types: &[VectorType],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<VectorMatch>> {
        self.check_dimension("vector_store.search", "query", query.len())?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, text, embedding, vector_type, triple_id, concept_id FROM vector_embeddings");
        if !types.is_empty() {
            qb.push(" WHERE vector_type IN (");
            let mut separated = qb.separated(", ");
            for vector_type in types {
                separated.push_bind(vector_type.as_str());
            }
            qb.push(")");
        }
        let rows: Vec<VectorRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        let scanned = rows.len();

        let mut matches = Vec::new();
        for row in rows {
            let vector = row.into_entity()?;
            let score = cosine_similarity(query, &vector.embedding);
            if score >= threshold {
                matches.push(VectorMatch { vector, score });
            }
        }

        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.vector.id.cmp(&b.vector.id)));
        matches.truncate(limit);

        debug!(scanned, matched = matches.len(), threshold, "Vector search finished");
        Ok(matches)
    }

    async fn stats(&self) -> Result<VectorStats> {
        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM vector_embeddings")
            .fetch_one(&self.pool)
            .await?;
        let by_type: Vec<(String, i64)> =
            sqlx::query_as("SELECT vector_type, COUNT(*) FROM vector_embeddings GROUP BY vector_type")
                .fetch_all(&self.pool)
                .await?;

        Ok(VectorStats {
            total,
            by_type: by_type.into_iter().collect(),
        })
    }
}

#[derive(Debug, FromRow)]
struct VectorRow {
    id: String,
    text: String,
    embedding: Vec<u8>,
    vector_type: String,
    triple_id: Option<String>,
    concept_id: Option<String>,
}

impl VectorRow {
    fn into_entity(self) -> Result<VectorEmbedding> {
        let vector_type = VectorType::parse(&self.vector_type)
            .ok_or_else(|| Error::Other(format!("Unknown vector type '{}' on {}", self.vector_type, self.id)))?;
        let owner = match (self.triple_id, self.concept_id) {
            (Some(id), None) => VectorOwner::Triple(id),
            (None, Some(id)) => VectorOwner::Concept(id),
            _ => return Err(Error::Other(format!("Vector {} must have exactly one owner", self.id))),
        };

        Ok(VectorEmbedding {
            id: self.id,
            text: self.text,
            embedding: decode_embedding(&self.embedding),
            vector_type,
            owner,
        })
    }
}
