//! Knowgraph Core Library
//!
//! Turns unstructured text into a knowledge graph:
//! - Extraction of typed triples through an LLM (single-pass or four-stage)
//! - Conceptualization of extracted elements into concept nodes
//! - Exact and semantic deduplication
//! - Two-phase storage into a relational and a vector database
//! - Retry and per-key circuit breaking around every external call

pub mod config;
pub mod dedup;
pub mod embedding;
pub mod error;
pub mod extraction;
pub mod knowledge;
pub mod llm;
pub mod pipeline;
pub mod resilience;
pub mod storage;

pub use error::{Error, ErrorKind, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::knowledge::{ConceptNode, ConceptualizationRelationship, Provenance, Triple, TripleType};
    pub use crate::llm::{AiProvider, EmbeddingProvider};
    pub use crate::pipeline::{PipelineCoordinator, PipelineServices, ProcessingSummary};
    pub use crate::storage::{JobRepository, KnowledgeStore, VectorStore};
}
