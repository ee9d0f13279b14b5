//! Processing jobs and their lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::triple::Provenance;

/// Kind of pipeline work a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Extraction,
    Conceptualization,
    Deduplication,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "EXTRACTION",
            Self::Conceptualization => "CONCEPTUALIZATION",
            Self::Deduplication => "DEDUPLICATION",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "EXTRACTION" => Some(Self::Extraction),
            "CONCEPTUALIZATION" => Some(Self::Conceptualization),
            "DEDUPLICATION" => Some(Self::Deduplication),
            _ => None,
        }
    }

    /// Stage name recorded on the job row
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Conceptualization => "conceptualization",
            Self::Deduplication => "deduplication",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "QUEUED" => Some(Self::Queued),
            "PROCESSING" => Some(Self::Processing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// QUEUED -> PROCESSING -> {COMPLETED | FAILED}
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory per-job caps; enforcement belongs to an external resource manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(alias = "maxConnections")]
    pub max_connections: u32,
    #[serde(alias = "maxAICalls")]
    pub max_ai_calls: u32,
    #[serde(alias = "maxMemoryMB")]
    pub max_memory_mb: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_connections: 5,
            max_ai_calls: 4,
            max_memory_mb: 512,
        }
    }
}

/// Metadata carried by a job between linked stages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub source: String,
    pub source_type: String,
    #[serde(default)]
    pub source_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resource_limits: Option<ResourceLimits>,
    /// Triples a downstream job operates on
    #[serde(default)]
    pub triple_ids: Vec<String>,
}

impl JobMetadata {
    pub fn new(provenance: &Provenance) -> Self {
        Self {
            source: provenance.source.clone(),
            source_type: provenance.source_type.clone(),
            source_date: provenance.source_date,
            resource_limits: None,
            triple_ids: Vec::new(),
        }
    }

    pub fn provenance(&self) -> Provenance {
        Provenance {
            source: self.source.clone(),
            source_type: self.source_type.clone(),
            source_date: self.source_date,
        }
    }

    pub fn with_resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = Some(limits);
        self
    }

    pub fn with_triple_ids(mut self, ids: Vec<String>) -> Self {
        self.triple_ids = ids;
        self
    }
}

/// A job ready to be enqueued
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub job_type: JobType,
    pub parent_job_id: Option<String>,
    pub metadata: JobMetadata,
    pub text: String,
}

impl NewJob {
    pub fn new(job_type: JobType, metadata: JobMetadata, text: impl Into<String>) -> Self {
        Self {
            job_type,
            parent_job_id: None,
            metadata,
            text: text.into(),
        }
    }

    pub fn with_parent(mut self, parent_job_id: impl Into<String>) -> Self {
        self.parent_job_id = Some(parent_job_id.into());
        self
    }

    /// Materialize into a QUEUED job with a fresh id
    pub fn into_job(self) -> ProcessingJob {
        let now = Utc::now();
        ProcessingJob {
            id: Uuid::new_v4().to_string(),
            job_type: self.job_type,
            stage: self.job_type.stage().to_string(),
            status: JobStatus::Queued,
            parent_job_id: self.parent_job_id,
            progress: 0,
            metadata: self.metadata,
            text: self.text,
            error: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: String,
    pub job_type: JobType,
    pub stage: String,
    pub status: JobStatus,
    pub parent_job_id: Option<String>,
    /// 0-100, never decreases
    pub progress: u8,
    pub metadata: JobMetadata,
    pub text: String,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
