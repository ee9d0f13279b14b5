//! Relational knowledge store: triples, concepts and conceptualizations

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{debug, info};

use super::{SQL_CHUNK, parse_timestamp, push_in_list};
use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::knowledge::{
    AbstractionLevel, ConceptNode, ConceptualizationRelationship, ElementType, Triple, TripleType,
};

/// Records written together in one transaction
#[derive(Debug, Clone, Default, Serialize)]
pub struct KnowledgeBatch {
    pub triples: Vec<Triple>,
    pub concepts: Vec<ConceptNode>,
    pub conceptualizations: Vec<ConceptualizationRelationship>,
}

impl KnowledgeBatch {
    pub fn new(
        triples: Vec<Triple>,
        concepts: Vec<ConceptNode>,
        conceptualizations: Vec<ConceptualizationRelationship>,
    ) -> Self {
        Self {
            triples,
            concepts,
            conceptualizations,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty() && self.concepts.is_empty() && self.conceptualizations.is_empty()
    }
}

/// Ids of rows a batch actually created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoredIds {
    pub triple_ids: Vec<String>,
    pub concept_ids: Vec<String>,
    pub conceptualization_ids: Vec<String>,
}

impl StoredIds {
    pub fn is_empty(&self) -> bool {
        self.triple_ids.is_empty() && self.concept_ids.is_empty() && self.conceptualization_ids.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct InsertOutcome {
    pub stored: StoredIds,
    /// Records repeated inside the batch or already present
    pub duplicates_skipped: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct KnowledgeStats {
    pub triples: i64,
    pub concepts: i64,
    pub conceptualizations: i64,
    pub triples_by_type: BTreeMap<String, i64>,
}

/// Which triple positions count as an entity occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityRole {
    Subject,
    Object,
    #[default]
    Both,
}

impl EntityRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "subject" => Some(Self::Subject),
            "object" => Some(Self::Object),
            "both" => Some(Self::Both),
            _ => None,
        }
    }

    fn includes_subject(&self) -> bool {
        matches!(self, Self::Subject | Self::Both)
    }

    fn includes_object(&self) -> bool {
        matches!(self, Self::Object | Self::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntitySort {
    /// Most occurrences first, ties by name
    #[default]
    Frequency,
    Name,
}

impl EntitySort {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "frequency" => Some(Self::Frequency),
            "name" | "alphabetical" => Some(Self::Name),
            _ => None,
        }
    }
}

/// Filters for listing subject/object entities
#[derive(Debug, Clone)]
pub struct EntityQuery {
    pub role: EntityRole,
    pub min_occurrence: u32,
    pub limit: u32,
    pub sort_by: EntitySort,
    /// Keep triples whose source list contains any of these; empty keeps all
    pub sources: Vec<String>,
    /// Keep triples of these types; empty keeps all
    pub types: Vec<TripleType>,
}

impl Default for EntityQuery {
    fn default() -> Self {
        Self {
            role: EntityRole::Both,
            min_occurrence: 1,
            limit: 100,
            sort_by: EntitySort::Frequency,
            sources: Vec::new(),
            types: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct EntityCount {
    pub name: String,
    pub occurrences: i64,
    pub as_subject: i64,
    pub as_object: i64,
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Insert new records in one transaction, skipping ids already stored
    async fn insert_batch(&self, batch: &KnowledgeBatch) -> Result<InsertOutcome>;

    async fn get_triples(&self, ids: &[String]) -> Result<Vec<Triple>>;

    /// Triples whose source list contains `source`
    async fn get_triples_by_source(&self, source: &str) -> Result<Vec<Triple>>;

    async fn get_concepts(&self, ids: &[String]) -> Result<Vec<ConceptNode>>;

    async fn get_conceptualizations(&self, ids: &[String]) -> Result<Vec<ConceptualizationRelationship>>;

    /// Remove a batch's rows, conceptualizations first, in one transaction
    async fn delete_stored(&self, ids: &StoredIds) -> Result<u64>;

    async fn delete_triples(&self, ids: &[String]) -> Result<u64>;

    /// Distinct subjects and/or objects with their occurrence counts
    async fn entities(&self, query: &EntityQuery) -> Result<Vec<EntityCount>>;

    async fn stats(&self) -> Result<KnowledgeStats>;
}

const TRIPLE_COLUMNS: &str =
    "id, subject, predicate, object, triple_type, source, source_type, source_date, extracted_at, confidence";
const CONCEPT_COLUMNS: &str = "id, concept, abstraction_level, confidence, source, source_type, extracted_at";
const CONCEPTUALIZATION_COLUMNS: &str =
    "id, source_element, element_type, concept, confidence, context_triples, source, source_type, extracted_at";

/// SQLite implementation of the knowledge store
#[derive(Clone)]
pub struct SqliteKnowledgeStore {
    pool: SqlitePool,
    max_wait: Duration,
    timeout: Duration,
}

impl SqliteKnowledgeStore {
    pub fn new(pool: SqlitePool, config: &StorageConfig) -> Self {
        Self {
            pool,
            max_wait: config.transaction_max_wait(),
            timeout: config.transaction_timeout(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn write_batch(&self, mut tx: Transaction<'static, Sqlite>, batch: &KnowledgeBatch) -> Result<InsertOutcome> {
        let mut outcome = InsertOutcome::default();

        let triples = unique_by_id(&batch.triples, Triple::id);
        let concepts = unique_by_id(&batch.concepts, ConceptNode::id);
        let conceptualizations = unique_by_id(&batch.conceptualizations, ConceptualizationRelationship::id);
        let submitted = batch.triples.len() + batch.concepts.len() + batch.conceptualizations.len();

        let existing = existing_ids(&mut tx, "triples", &ids_of(&triples)).await?;
        let new_triples: Vec<_> = triples.into_iter().filter(|(id, _)| !existing.contains(id)).collect();
        for chunk in new_triples.chunks(SQL_CHUNK) {
            outcome.stored.triple_ids.extend(insert_triples(&mut tx, chunk).await?);
        }

        let existing = existing_ids(&mut tx, "concepts", &ids_of(&concepts)).await?;
        let new_concepts: Vec<_> = concepts.into_iter().filter(|(id, _)| !existing.contains(id)).collect();
        for chunk in new_concepts.chunks(SQL_CHUNK) {
            outcome.stored.concept_ids.extend(insert_concepts(&mut tx, chunk).await?);
        }

        let existing = existing_ids(&mut tx, "conceptualizations", &ids_of(&conceptualizations)).await?;
        let new_mappings: Vec<_> = conceptualizations
            .into_iter()
            .filter(|(id, _)| !existing.contains(id))
            .collect();
        for chunk in new_mappings.chunks(SQL_CHUNK) {
            outcome
                .stored
                .conceptualization_ids
                .extend(insert_conceptualizations(&mut tx, chunk).await?);
        }

        tx.commit().await?;

        let stored = outcome.stored.triple_ids.len()
            + outcome.stored.concept_ids.len()
            + outcome.stored.conceptualization_ids.len();
        outcome.duplicates_skipped = submitted - stored;
        Ok(outcome)
    }
}

fn unique_by_id<T>(items: &[T], id: impl Fn(&T) -> String) -> Vec<(String, &T)> {
    let mut seen = HashSet::new();
    items
        .iter()
        .map(|item| (id(item), item))
        .filter(|(id, _)| seen.insert(id.clone()))
        .collect()
}

fn ids_of<T>(items: &[(String, &T)]) -> Vec<String> {
    items.iter().map(|(id, _)| id.clone()).collect()
}

fn timeout_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

async fn existing_ids(conn: &mut SqliteConnection, table: &'static str, ids: &[String]) -> Result<HashSet<String>> {
    let mut found = HashSet::new();
    for chunk in ids.chunks(SQL_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT id FROM {} WHERE id", table));
        push_in_list(&mut qb, chunk);
        let rows: Vec<(String,)> = qb.build_query_as().fetch_all(&mut *conn).await?;
        found.extend(rows.into_iter().map(|(id,)| id));
    }
    Ok(found)
}

async fn insert_triples(conn: &mut SqliteConnection, chunk: &[(String, &Triple)]) -> Result<Vec<String>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("INSERT INTO triples ({}) ", TRIPLE_COLUMNS));
    qb.push_values(chunk, |mut row, (id, t)| {
        row.push_bind(id.clone())
            .push_bind(t.subject.clone())
            .push_bind(t.predicate.clone())
            .push_bind(t.object.clone())
            .push_bind(t.triple_type.as_str())
            .push_bind(t.source.clone())
            .push_bind(t.source_type.clone())
            .push_bind(t.source_date.map(|d| d.to_rfc3339()))
            .push_bind(t.extracted_at.to_rfc3339())
            .push_bind(f64::from(t.confidence));
    });
    qb.push(" ON CONFLICT(id) DO NOTHING RETURNING id");

    let rows: Vec<(String,)> = qb.build_query_as().fetch_all(&mut *conn).await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

async fn insert_concepts(conn: &mut SqliteConnection, chunk: &[(String, &ConceptNode)]) -> Result<Vec<String>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("INSERT INTO concepts ({}) ", CONCEPT_COLUMNS));
    qb.push_values(chunk, |mut row, (id, c)| {
        row.push_bind(id.clone())
            .push_bind(c.concept.clone())
            .push_bind(c.abstraction_level.as_str())
            .push_bind(f64::from(c.confidence))
            .push_bind(c.source.clone())
            .push_bind(c.source_type.clone())
            .push_bind(c.extracted_at.to_rfc3339());
    });
    qb.push(" ON CONFLICT(id) DO NOTHING RETURNING id");

    let rows: Vec<(String,)> = qb.build_query_as().fetch_all(&mut *conn).await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

async fn insert_conceptualizations(
    conn: &mut SqliteConnection,
    chunk: &[(String, &ConceptualizationRelationship)],
) -> Result<Vec<String>> {
    let context: Vec<String> = chunk
        .iter()
        .map(|(_, r)| serde_json::to_string(&r.context_triples))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::Other(format!("Failed to serialize context triples: {}", e)))?;

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "INSERT INTO conceptualizations ({}) ",
        CONCEPTUALIZATION_COLUMNS
    ));
    qb.push_values(chunk.iter().zip(context), |mut row, ((id, r), context_json)| {
        row.push_bind(id.clone())
            .push_bind(r.source_element.clone())
            .push_bind(r.element_type.as_str())
            .push_bind(r.concept.clone())
            .push_bind(f64::from(r.confidence))
            .push_bind(context_json)
            .push_bind(r.source.clone())
            .push_bind(r.source_type.clone())
            .push_bind(r.extracted_at.to_rfc3339());
    });
    qb.push(" ON CONFLICT(id) DO NOTHING RETURNING id");

    let rows: Vec<(String,)> = qb.build_query_as().fetch_all(&mut *conn).await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

async fn delete_ids(conn: &mut SqliteConnection, table: &'static str, ids: &[String]) -> Result<u64> {
    let mut deleted = 0;
    for chunk in ids.chunks(SQL_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("DELETE FROM {} WHERE id", table));
        push_in_list(&mut qb, chunk);
        deleted += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(deleted)
}

/// Append ` AND ...` clauses restricting triples by type and source
fn push_triple_filters(qb: &mut QueryBuilder<'_, Sqlite>, types: &[TripleType], sources: &[String]) {
    if !types.is_empty() {
        qb.push(" AND triple_type IN (");
        let mut separated = qb.separated(", ");
        for triple_type in types {
            separated.push_bind(triple_type.as_str());
        }
        qb.push(")");
    }

    if !sources.is_empty() {
        qb.push(" AND (");
        for (i, source) in sources.iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push("source = ")
                .push_bind(source.clone())
                .push(" OR (', ' || source || ',') LIKE ")
                .push_bind(format!("%, {},%", like_escape(source)))
                .push(" ESCAPE '\\'");
        }
        qb.push(")");
    }
}

/// Escape `%`, `_` and `\` for a LIKE pattern using `ESCAPE '\'`
fn like_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl KnowledgeStore for SqliteKnowledgeStore {
    async fn insert_batch(&self, batch: &KnowledgeBatch) -> Result<InsertOutcome> {
        let tx = tokio::time::timeout(self.max_wait, self.pool.begin())
            .await
            .map_err(|_| Error::Timeout {
                operation: "knowledge_store.begin".to_string(),
                after_ms: timeout_ms(self.max_wait),
            })??;

        let outcome = tokio::time::timeout(self.timeout, self.write_batch(tx, batch))
            .await
            .map_err(|_| Error::Timeout {
                operation: "knowledge_store.insert_batch".to_string(),
                after_ms: timeout_ms(self.timeout),
            })??;

        info!(
            triples = outcome.stored.triple_ids.len(),
            concepts = outcome.stored.concept_ids.len(),
            conceptualizations = outcome.stored.conceptualization_ids.len(),
            duplicates_skipped = outcome.duplicates_skipped,
            "Knowledge batch committed"
        );
        Ok(outcome)
    }

    async fn get_triples(&self, ids: &[String]) -> Result<Vec<Triple>> {
        let mut triples = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(SQL_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("SELECT {} FROM triples WHERE id", TRIPLE_COLUMNS));
            push_in_list(&mut qb, chunk);
            let rows: Vec<TripleRow> = qb.build_query_as().fetch_all(&self.pool).await?;
            for row in rows {
                triples.push(row.into_entity()?);
            }
        }
        Ok(triples)
    }

    async fn get_triples_by_source(&self, source: &str) -> Result<Vec<Triple>> {
        let rows: Vec<TripleRow> = sqlx::query_as(&format!(
            "SELECT {} FROM triples WHERE source = ? OR (', ' || source || ',') LIKE ? ESCAPE '\\' ORDER BY created_at, id",
            TRIPLE_COLUMNS
        ))
        .bind(source)
        .bind(format!("%, {},%", like_escape(source)))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TripleRow::into_entity).collect()
    }

    async fn get_concepts(&self, ids: &[String]) -> Result<Vec<ConceptNode>> {
        let mut concepts = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(SQL_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("SELECT {} FROM concepts WHERE id", CONCEPT_COLUMNS));
            push_in_list(&mut qb, chunk);
            let rows: Vec<ConceptRow> = qb.build_query_as().fetch_all(&self.pool).await?;
            for row in rows {
                concepts.push(row.into_entity()?);
            }
        }
        Ok(concepts)
    }

    async fn get_conceptualizations(&self, ids: &[String]) -> Result<Vec<ConceptualizationRelationship>> {
        let mut mappings = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(SQL_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "SELECT {} FROM conceptualizations WHERE id",
                CONCEPTUALIZATION_COLUMNS
            ));
            push_in_list(&mut qb, chunk);
            let rows: Vec<ConceptualizationRow> = qb.build_query_as().fetch_all(&self.pool).await?;
            for row in rows {
                mappings.push(row.into_entity()?);
            }
        }
        Ok(mappings)
    }

    async fn delete_stored(&self, ids: &StoredIds) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut deleted = delete_ids(&mut tx, "conceptualizations", &ids.conceptualization_ids).await?;
        deleted += delete_ids(&mut tx, "concepts", &ids.concept_ids).await?;
        deleted += delete_ids(&mut tx, "triples", &ids.triple_ids).await?;
        tx.commit().await?;

        debug!(deleted, "Deleted stored batch rows");
        Ok(deleted)
    }

    async fn delete_triples(&self, ids: &[String]) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        delete_ids(&mut conn, "triples", ids).await
    }

    async fn entities(&self, query: &EntityQuery) -> Result<Vec<EntityCount>> {
        let mut branches = Vec::with_capacity(2);
        if query.role.includes_subject() {
            branches.push("SELECT subject AS name, 1 AS as_subject, 0 AS as_object FROM triples WHERE 1 = 1");
        }
        if query.role.includes_object() {
            branches.push("SELECT object AS name, 0 AS as_subject, 1 AS as_object FROM triples WHERE 1 = 1");
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT name, SUM(as_subject) + SUM(as_object) AS occurrences, \
             SUM(as_subject) AS as_subject, SUM(as_object) AS as_object FROM (",
        );
        for (i, branch) in branches.into_iter().enumerate() {
            if i > 0 {
                qb.push(" UNION ALL ");
            }
            qb.push(branch);
            push_triple_filters(&mut qb, &query.types, &query.sources);
        }
        qb.push(") GROUP BY name HAVING occurrences >= ");
        qb.push_bind(i64::from(query.min_occurrence.max(1)));
        qb.push(match query.sort_by {
            EntitySort::Frequency => " ORDER BY occurrences DESC, name",
            EntitySort::Name => " ORDER BY name",
        });
        qb.push(" LIMIT ");
        qb.push_bind(i64::from(query.limit));

        let entities: Vec<EntityCount> = qb.build_query_as().fetch_all(&self.pool).await?;
        debug!(entities = entities.len(), role = ?query.role, "Listed entities");
        Ok(entities)
    }

    async fn stats(&self) -> Result<KnowledgeStats> {
        let (triples,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM triples")
            .fetch_one(&self.pool)
            .await?;
        let (concepts,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM concepts")
            .fetch_one(&self.pool)
            .await?;
        let (conceptualizations,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conceptualizations")
            .fetch_one(&self.pool)
            .await?;

        let by_type: Vec<(String, i64)> =
            sqlx::query_as("SELECT triple_type, COUNT(*) FROM triples GROUP BY triple_type")
                .fetch_all(&self.pool)
                .await?;

        Ok(KnowledgeStats {
            triples,
            concepts,
            conceptualizations,
            triples_by_type: by_type.into_iter().collect(),
        })
    }
}

#[derive(Debug, FromRow)]
struct TripleRow {
    id: String,
    subject: String,
    predicate: String,
    object: String,
    triple_type: String,
    source: String,
    source_type: String,
    source_date: Option<String>,
    extracted_at: String,
    confidence: f64,
}

impl TripleRow {
    fn into_entity(self) -> Result<Triple> {
        let triple_type = TripleType::parse(&self.triple_type)
            .ok_or_else(|| Error::Other(format!("Unknown triple type '{}' on {}", self.triple_type, self.id)))?;

        Ok(Triple {
            subject: self.subject,
            predicate: self.predicate,
            object: self.object,
            triple_type,
            source: self.source,
            source_type: self.source_type,
            source_date: self.source_date.as_deref().map(parse_timestamp).transpose()?,
            extracted_at: parse_timestamp(&self.extracted_at)?,
            confidence: self.confidence as f32,
        })
    }
}

#[derive(Debug, FromRow)]
struct ConceptRow {
    id: String,
    concept: String,
    abstraction_level: String,
    confidence: f64,
    source: String,
    source_type: String,
    extracted_at: String,
}

impl ConceptRow {
    fn into_entity(self) -> Result<ConceptNode> {
        let abstraction_level = AbstractionLevel::parse(&self.abstraction_level).ok_or_else(|| {
            Error::Other(format!(
                "Unknown abstraction level '{}' on {}",
                self.abstraction_level, self.id
            ))
        })?;

        Ok(ConceptNode {
            concept: self.concept,
            abstraction_level,
            confidence: self.confidence as f32,
            source: self.source,
            source_type: self.source_type,
            extracted_at: parse_timestamp(&self.extracted_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct ConceptualizationRow {
    id: String,
    source_element: String,
    element_type: String,
    concept: String,
    confidence: f64,
    context_triples: String,
    source: String,
    source_type: String,
    extracted_at: String,
}

impl ConceptualizationRow {
    fn into_entity(self) -> Result<ConceptualizationRelationship> {
        let element_type = ElementType::parse(&self.element_type)
            .ok_or_else(|| Error::Other(format!("Unknown element type '{}' on {}", self.element_type, self.id)))?;
        let context_triples: Vec<String> = serde_json::from_str(&self.context_triples)
            .map_err(|e| Error::Other(format!("Failed to parse context triples: {}", e)))?;

        Ok(ConceptualizationRelationship {
            source_element: self.source_element,
            element_type,
            concept: self.concept,
            confidence: self.confidence as f32,
            context_triples,
            source: self.source,
            source_type: self.source_type,
            extracted_at: parse_timestamp(&self.extracted_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::Provenance;
    use crate::storage::{Database, Schema};

    async fn store() -> SqliteKnowledgeStore {
        let db = Database::in_memory(Schema::Knowledge).await.unwrap();
        SqliteKnowledgeStore::new(db.pool().clone(), &StorageConfig::default())
    }

    fn triple(s: &str, o: &str, source: &str) -> Triple {
        Triple::new(s, "knows", o, TripleType::EntityEntity, &Provenance::new(source, "text")).with_confidence(0.7)
    }

    #[tokio::test]
    async fn test_insert_skips_existing_and_repeated() {
        let store = store().await;
        let a = triple("Alice", "Bob", "doc");
        let b = triple("Bob", "Carol", "doc");

        let first = store
            .insert_batch(&KnowledgeBatch::new(vec![a.clone(), a.clone()], vec![], vec![]))
            .await
            .unwrap();
        assert_eq!(first.stored.triple_ids, vec![a.id()]);
        assert_eq!(first.duplicates_skipped, 1);

        let second = store
            .insert_batch(&KnowledgeBatch::new(vec![a.clone(), b.clone()], vec![], vec![]))
            .await
            .unwrap();
        assert_eq!(second.stored.triple_ids, vec![b.id()]);
        assert_eq!(second.duplicates_skipped, 1);
    }

    #[tokio::test]
    async fn test_read_back_preserves_fields() {
        let store = store().await;
        let t = triple("Alice", "Bob", "doc");
        let p = Provenance::new("doc", "text");
        let c = ConceptNode::new("Person", AbstractionLevel::High, &p);
        let m = ConceptualizationRelationship::new("Alice", ElementType::Entity, "Person", &p)
            .with_context_triples(vec![t.id()]);

        let outcome = store
            .insert_batch(&KnowledgeBatch::new(vec![t.clone()], vec![c.clone()], vec![m.clone()]))
            .await
            .unwrap();

        let triples = store.get_triples(&outcome.stored.triple_ids).await.unwrap();
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].subject, "Alice");
        assert!((triples[0].confidence - 0.7).abs() < 1e-6);
        assert_eq!(triples[0].id(), t.id());

        let concepts = store.get_concepts(&[c.id()]).await.unwrap();
        assert_eq!(concepts[0].abstraction_level, AbstractionLevel::High);

        let mappings = store.get_conceptualizations(&[m.id()]).await.unwrap();
        assert_eq!(mappings[0].context_triples, vec![t.id()]);
    }

    #[tokio::test]
    async fn test_triples_by_source_matches_merged_lists() {
        let store = store().await;
        let mut merged = triple("Alice", "Bob", "a.md");
        merged.source = "a.md, b_1.md".into();
        let other = triple("Carol", "Dan", "bx1.md");

        store
            .insert_batch(&KnowledgeBatch::new(vec![merged, other], vec![], vec![]))
            .await
            .unwrap();

        assert_eq!(store.get_triples_by_source("a.md").await.unwrap().len(), 1);
        // `_` and `%` must not act as wildcards
        assert_eq!(store.get_triples_by_source("b_1.md").await.unwrap().len(), 1);
        assert_eq!(store.get_triples_by_source("b%1.md").await.unwrap().len(), 0);
        assert_eq!(store.get_triples_by_source("bx1.md").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_stored_and_stats() {
        let store = store().await;
        let p = Provenance::new("doc", "text");
        let outcome = store
            .insert_batch(&KnowledgeBatch::new(
                vec![triple("Alice", "Bob", "doc")],
                vec![ConceptNode::new("Person", AbstractionLevel::High, &p)],
                vec![ConceptualizationRelationship::new("Alice", ElementType::Entity, "Person", &p)],
            ))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!((stats.triples, stats.concepts, stats.conceptualizations), (1, 1, 1));
        assert_eq!(stats.triples_by_type.get("entity-entity"), Some(&1));

        assert_eq!(store.delete_stored(&outcome.stored).await.unwrap(), 3);
        let stats = store.stats().await.unwrap();
        assert_eq!((stats.triples, stats.concepts, stats.conceptualizations), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_large_batch_spans_chunks() {
        let store = store().await;
        let triples: Vec<Triple> = (0..1_200).map(|i| triple(&format!("s{}", i), "o", "doc")).collect();

        let outcome = store
            .insert_batch(&KnowledgeBatch::new(triples, vec![], vec![]))
            .await
            .unwrap();
        assert_eq!(outcome.stored.triple_ids.len(), 1_200);
        assert_eq!(store.get_triples(&outcome.stored.triple_ids).await.unwrap().len(), 1_200);
    }

    #[tokio::test]
    async fn test_entities_counts_roles_and_filters() {
        let store = store().await;
        let mut event = Triple::new(
            "Alice",
            "attended",
            "Launch",
            TripleType::EntityEvent,
            &Provenance::new("b.md", "text"),
        );
        event.source = "b.md, c.md".into();
        store
            .insert_batch(&KnowledgeBatch::new(
                vec![
                    triple("Alice", "Bob", "a.md"),
                    triple("Alice", "Carol", "a.md"),
                    triple("Bob", "Carol", "a.md"),
                    event,
                ],
                vec![],
                vec![],
            ))
            .await
            .unwrap();

        let all = store.entities(&EntityQuery::default()).await.unwrap();
        assert_eq!(
            all[0],
            EntityCount {
                name: "Alice".into(),
                occurrences: 3,
                as_subject: 3,
                as_object: 0,
            }
        );
        let names: Vec<&str> = all.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Bob", "Carol", "Launch"]);
        assert_eq!(all[1].occurrences, 2);
        assert_eq!((all[2].as_subject, all[2].as_object), (0, 2));

        let objects = store
            .entities(&EntityQuery {
                role: EntityRole::Object,
                min_occurrence: 2,
                ..EntityQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].name, "Carol");

        let by_source = store
            .entities(&EntityQuery {
                sources: vec!["c.md".into()],
                sort_by: EntitySort::Name,
                ..EntityQuery::default()
            })
            .await
            .unwrap();
        let names: Vec<&str> = by_source.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Launch"]);

        let by_type = store
            .entities(&EntityQuery {
                types: vec![TripleType::EntityEntity],
                role: EntityRole::Subject,
                limit: 1,
                ..EntityQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(by_type.len(), 1);
        assert_eq!((by_type[0].name.as_str(), by_type[0].occurrences), ("Alice", 2));
    }

    #[test]
    fn test_entity_option_parsing() {
        assert_eq!(EntityRole::parse("Subject"), Some(EntityRole::Subject));
        assert_eq!(EntityRole::parse("either"), None);
        assert_eq!(EntitySort::parse("alphabetical"), Some(EntitySort::Name));
        assert_eq!(EntitySort::parse("FREQUENCY"), Some(EntitySort::Frequency));
    }
}
