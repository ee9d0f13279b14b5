//! Stage orchestration as linked processing jobs

mod coordinator;

pub use coordinator::{
    GraphStats, PROGRESS_COMPLETED, PROGRESS_GENERATED, PROGRESS_STARTED, PROGRESS_STORED,
    PipelineCoordinator, PipelineServices, ProcessingSummary, ScoredConcept, ScoredTriple, SearchOptions,
};
