//! Knowledge graph data model
//!
//! - **Triple**: a subject–predicate–object fact, identified by a content
//!   fingerprint so repeated inserts are idempotent
//! - **ConceptNode**: a higher-level label abstracting entities or events
//! - **ConceptualizationRelationship**: maps a source element to a concept
//! - **VectorEmbedding**: a vector owned by exactly one triple or concept
//! - **ProcessingJob**: a unit of pipeline work with status and progress

mod concept;
mod job;
mod triple;
mod vector;

pub use concept::{AbstractionLevel, ConceptNode, ConceptualizationRelationship, ElementType};
pub use job::{JobMetadata, JobStatus, JobType, NewJob, ProcessingJob, ResourceLimits};
pub use triple::{Provenance, Triple, TripleType, fingerprint, triple_fingerprint};
pub use vector::{VectorEmbedding, VectorOwner, VectorType};
