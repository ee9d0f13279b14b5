//! Error types for Knowgraph

use std::fmt;

use thiserror::Error;

/// Result type alias using Knowgraph's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Opaque wrapped cause carried by some error variants
pub type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Phase of the batch storage state machine an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoragePhase {
    Validate,
    Phase1Transaction,
    Phase2Vectors,
    Compensation,
}

impl StoragePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validate => "VALIDATE",
            Self::Phase1Transaction => "PHASE1_TRANSACTION",
            Self::Phase2Vectors => "PHASE2_VECTORS",
            Self::Compensation => "COMPENSATION",
        }
    }
}

impl fmt::Display for StoragePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field-level schema violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Dotted path to the offending field, e.g. `triples[3].subject`
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Knowgraph error types
#[derive(Error, Debug)]
pub enum Error {
    // Input errors (E001-E099)
    #[error("Invalid input for {operation}: {message}")]
    InputValidation { operation: String, message: String },

    // Extraction errors (E100-E199)
    #[error("Extraction failed in {operation}: {message}")]
    Extraction {
        operation: String,
        message: String,
        #[source]
        cause: Option<BoxedCause>,
    },

    #[error("Could not parse model output in {operation}: {message}")]
    Parse { operation: String, message: String },

    #[error("Model output failed validation in {operation}: {}", format_fields(.fields))]
    Validation {
        operation: String,
        fields: Vec<FieldError>,
    },

    // Embedding errors (E200-E299)
    #[error("Embedding generation failed in {operation}: {message}")]
    Embedding {
        operation: String,
        message: String,
        #[source]
        cause: Option<BoxedCause>,
    },

    // Storage errors (E300-E399)
    #[error("Batch storage failed during {phase}: {message}")]
    BatchStorage {
        phase: StoragePhase,
        message: String,
        #[source]
        cause: Option<BoxedCause>,
    },

    #[error("Vector generation failed, batch rolled back (compensation {}): {message}", compensation_label(.compensated))]
    VectorGenerationRollback { message: String, compensated: bool },

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Job '{0}' not found.")]
    JobNotFound(String),

    #[error("Invalid job transition for '{job_id}': {from} -> {to}")]
    InvalidJobTransition {
        job_id: String,
        from: String,
        to: String,
    },

    // Provider errors (E400-E499)
    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    #[error("LLM API error: {0}. Check your API key with `knowgraph config get llm.api_key`.")]
    LLMError(String),

    #[error("Provider temporarily unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Rate limited. Waiting {0} seconds before retry.")]
    RateLimited(u64),

    // Resilience errors (E500-E599)
    #[error("Circuit open for '{0}', call rejected")]
    CircuitOpen(String),

    #[error("Operation '{operation}' timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Closed classification of [`Error`] used across component boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InputValidation,
    Extraction,
    Parse,
    Validation,
    Embedding,
    BatchStorage,
    VectorGenerationRollback,
    Database,
    Provider,
    CircuitOpen,
    Timeout,
    Config,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InputValidation => "INPUT_VALIDATION_ERROR",
            Self::Extraction => "EXTRACTION_ERROR",
            Self::Parse => "PARSE_ERROR",
            Self::Validation => "VALIDATION_ERROR",
            Self::Embedding => "EMBEDDING_ERROR",
            Self::BatchStorage => "BATCH_STORAGE_ERROR",
            Self::VectorGenerationRollback => "VECTOR_GENERATION_ROLLBACK",
            Self::Database => "DATABASE_ERROR",
            Self::Provider => "PROVIDER_ERROR",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::Timeout => "TIMEOUT",
            Self::Config => "CONFIG_ERROR",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn input(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InputValidation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn extraction(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Extraction {
            operation: operation.into(),
            message: message.into(),
            cause: None,
        }
    }

    /// Wrap another error as the cause of an extraction failure
    pub fn extraction_caused_by(operation: impl Into<String>, cause: Error) -> Self {
        Self::Extraction {
            operation: operation.into(),
            message: cause.to_string(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn parse(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn embedding(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Embedding {
            operation: operation.into(),
            message: message.into(),
            cause: None,
        }
    }

    /// Wrap a provider or resilience error as the cause of an embedding failure
    pub fn embedding_caused_by(operation: impl Into<String>, cause: Error) -> Self {
        Self::Embedding {
            operation: operation.into(),
            message: cause.to_string(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn storage(phase: StoragePhase, message: impl Into<String>) -> Self {
        Self::BatchStorage {
            phase,
            message: message.into(),
            cause: None,
        }
    }

    pub fn storage_caused_by(phase: StoragePhase, cause: Error) -> Self {
        Self::BatchStorage {
            phase,
            message: cause.to_string(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Closed classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InputValidation { .. } => ErrorKind::InputValidation,
            Self::Extraction { .. } => ErrorKind::Extraction,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Embedding { .. } => ErrorKind::Embedding,
            Self::BatchStorage { .. } => ErrorKind::BatchStorage,
            Self::VectorGenerationRollback { .. } => ErrorKind::VectorGenerationRollback,
            Self::DatabaseError(_) | Self::JobNotFound(_) | Self::InvalidJobTransition { .. } => {
                ErrorKind::Database
            }
            Self::NetworkError(_)
            | Self::LLMError(_)
            | Self::ProviderUnavailable(_)
            | Self::RateLimited(_) => ErrorKind::Provider,
            Self::CircuitOpen(_) => ErrorKind::CircuitOpen,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ConfigError(_) => ErrorKind::Config,
            Self::Other(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Name of the operation that failed, when known
    pub fn operation(&self) -> Option<&str> {
        match self {
            Self::InputValidation { operation, .. }
            | Self::Extraction { operation, .. }
            | Self::Parse { operation, .. }
            | Self::Validation { operation, .. }
            | Self::Embedding { operation, .. }
            | Self::Timeout { operation, .. } => Some(operation),
            Self::BatchStorage { phase, .. } => Some(phase.as_str()),
            Self::VectorGenerationRollback { .. } => Some(StoragePhase::Phase2Vectors.as_str()),
            _ => None,
        }
    }

    /// Whether the resilience layer may retry the failed call
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::ProviderUnavailable(_) | Self::RateLimited(_) | Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::InputValidation { .. } => "E001",
            Self::Extraction { .. } => "E100",
            Self::Parse { .. } => "E101",
            Self::Validation { .. } => "E102",
            Self::Embedding { .. } => "E200",
            Self::BatchStorage { .. } => "E300",
            Self::VectorGenerationRollback { .. } => "E301",
            Self::DatabaseError(_) => "E302",
            Self::JobNotFound(_) => "E303",
            Self::InvalidJobTransition { .. } => "E304",
            Self::NetworkError(_) => "E400",
            Self::LLMError(_) => "E401",
            Self::ProviderUnavailable(_) => "E402",
            Self::RateLimited(_) => "E403",
            Self::CircuitOpen(_) => "E500",
            Self::Timeout { .. } => "E501",
            Self::ConfigError(_) => "E600",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::NetworkError(_) => Some("Check internet connection".to_string()),
            Self::LLMError(_) => Some("knowgraph config get llm.api_key".to_string()),
            Self::JobNotFound(_) => Some("knowgraph job <id> --format json".to_string()),
            Self::VectorGenerationRollback {
                compensated: false, ..
            } => Some("Inspect the triples and concepts tables for orphaned rows".to_string()),
            Self::ConfigError(_) => Some("knowgraph config list".to_string()),
            _ => None,
        }
    }
}

fn compensation_label(compensated: &bool) -> &'static str {
    if *compensated {
        "succeeded"
    } else {
        "FAILED, manual intervention required"
    }
}

fn format_fields(fields: &[FieldError]) -> String {
    if fields.is_empty() {
        return "no details".to_string();
    }
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
