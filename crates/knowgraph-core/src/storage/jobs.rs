//! Processing job repository
//!
//! Enqueueing inserts a QUEUED row, so the repository is also the job queue.
//! Status changes are compare-and-set on the current status and progress
//! only ever moves forward.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info};

use super::parse_timestamp;
use crate::error::{Error, Result};
use crate::knowledge::{JobMetadata, JobStatus, JobType, NewJob, ProcessingJob};

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Persist a new QUEUED job and return its id
    async fn enqueue(&self, job: NewJob) -> Result<String>;

    async fn get(&self, id: &str) -> Result<ProcessingJob>;

    /// Move a job to `status`, recording an error or result alongside
    async fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
        result: Option<&serde_json::Value>,
    ) -> Result<ProcessingJob>;

    /// Raise progress; lower values are ignored
    async fn update_progress(&self, id: &str, progress: u8) -> Result<()>;

    async fn children(&self, parent_job_id: &str) -> Result<Vec<ProcessingJob>>;

    async fn list(&self, status: Option<JobStatus>, limit: u32) -> Result<Vec<ProcessingJob>>;

    /// Oldest QUEUED job, in enqueue order
    async fn next_queued(&self) -> Result<Option<ProcessingJob>>;
}

const JOB_COLUMNS: &str = "id, job_type, stage, status, parent_job_id, progress, metadata, text, error, result, created_at, updated_at";

/// Fixed-width UTC timestamps so TEXT ordering matches time ordering
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite implementation of the job repository
#[derive(Clone)]
pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn enqueue(&self, job: NewJob) -> Result<String> {
        let job = job.into_job();
        let metadata = serde_json::to_string(&job.metadata)
            .map_err(|e| Error::Other(format!("Failed to serialize job metadata: {}", e)))?;

        sqlx::query(&format!(
            "INSERT INTO processing_jobs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?, ?)",
            JOB_COLUMNS
        ))
        .bind(&job.id)
        .bind(job.job_type.as_str())
        .bind(&job.stage)
        .bind(job.status.as_str())
        .bind(&job.parent_job_id)
        .bind(i64::from(job.progress))
        .bind(metadata)
        .bind(&job.text)
        .bind(timestamp(&job.created_at))
        .bind(timestamp(&job.updated_at))
        .execute(&self.pool)
        .await?;

        info!(
            job_id = %job.id,
            job_type = job.job_type.as_str(),
            parent_job_id = ?job.parent_job_id,
            "Job enqueued"
        );
        Ok(job.id)
    }

    async fn get(&self, id: &str) -> Result<ProcessingJob> {
        let row: Option<JobRow> = sqlx::query_as(&format!("SELECT {} FROM processing_jobs WHERE id = ?", JOB_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| Error::JobNotFound(id.to_string()))?.into_entity()
    }

    async fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
        result: Option<&serde_json::Value>,
    ) -> Result<ProcessingJob> {
        let current = self.get(id).await?;
        if !current.status.can_transition_to(status) {
            return Err(Error::InvalidJobTransition {
                job_id: id.to_string(),
                from: current.status.to_string(),
                to: status.to_string(),
            });
        }

        let result_json = result
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| Error::Other(format!("Failed to serialize job result: {}", e)))?;

        // Guarded on the status just read so concurrent runners cannot both win
        let updated = sqlx::query(
            r#"
            UPDATE processing_jobs
            SET status = ?, error = COALESCE(?, error), result = COALESCE(?, result), updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(result_json)
        .bind(timestamp(&Utc::now()))
        .bind(id)
        .bind(current.status.as_str())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            let now = self.get(id).await?;
            return Err(Error::InvalidJobTransition {
                job_id: id.to_string(),
                from: now.status.to_string(),
                to: status.to_string(),
            });
        }

        debug!(job_id = id, from = %current.status, to = %status, "Job status updated");
        self.get(id).await
    }

    async fn update_progress(&self, id: &str, progress: u8) -> Result<()> {
        let progress = i64::from(progress.min(100));
        let updated = sqlx::query(
            "UPDATE processing_jobs SET progress = MAX(progress, ?), updated_at = ? WHERE id = ?",
        )
        .bind(progress)
        .bind(timestamp(&Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(Error::JobNotFound(id.to_string()));
        }
        debug!(job_id = id, progress, "Job progress updated");
        Ok(())
    }

    async fn children(&self, parent_job_id: &str) -> Result<Vec<ProcessingJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM processing_jobs WHERE parent_job_id = ? ORDER BY created_at, rowid",
            JOB_COLUMNS
        ))
        .bind(parent_job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobRow::into_entity).collect()
    }

    async fn list(&self, status: Option<JobStatus>, limit: u32) -> Result<Vec<ProcessingJob>> {
        let rows: Vec<JobRow> = match status {
            Some(status) => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM processing_jobs WHERE status = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
                    JOB_COLUMNS
                ))
                .bind(status.as_str())
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM processing_jobs ORDER BY created_at DESC, rowid DESC LIMIT ?",
                    JOB_COLUMNS
                ))
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(JobRow::into_entity).collect()
    }

    async fn next_queued(&self) -> Result<Option<ProcessingJob>> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM processing_jobs WHERE status = ? ORDER BY created_at ASC, rowid ASC LIMIT 1",
            JOB_COLUMNS
        ))
        .bind(JobStatus::Queued.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobRow::into_entity).transpose()
    }
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: String,
    job_type: String,
    stage: String,
    status: String,
    parent_job_id: Option<String>,
    progress: i64,
    metadata: String,
    text: String,
    error: Option<String>,
    result: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn into_entity(self) -> Result<ProcessingJob> {
        let job_type = JobType::parse(&self.job_type)
            .ok_or_else(|| Error::Other(format!("Unknown job type '{}' on {}", self.job_type, self.id)))?;
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| Error::Other(format!("Unknown job status '{}' on {}", self.status, self.id)))?;
        let metadata: JobMetadata = serde_json::from_str(&self.metadata)
            .map_err(|e| Error::Other(format!("Failed to parse job metadata: {}", e)))?;
        let result = self
            .result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| Error::Other(format!("Failed to parse job result: {}", e)))?;

        Ok(ProcessingJob {
            id: self.id,
            job_type,
            stage: self.stage,
            status,
            parent_job_id: self.parent_job_id,
            progress: u8::try_from(self.progress.clamp(0, 100)).unwrap_or(100),
            metadata,
            text: self.text,
            error: self.error,
            result,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}
