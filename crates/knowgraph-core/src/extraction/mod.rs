//! Extraction and conceptualization stages

pub mod chunking;
mod conceptualizer;
mod extractor;
pub mod prompts;
pub mod schema;

pub use chunking::{TextChunk, TextChunker, estimate_tokens};
pub use conceptualizer::{ConceptInput, ConceptualizationOutcome, Conceptualizer, MAX_CONTEXT_TRIPLES};
pub use extractor::{ExtractionOutcome, KnowledgeExtractor, SINGLE_PASS_STAGE};
