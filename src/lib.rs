//! Omics Orchestrator Library
//!
//! Runs genomics and transcriptomics analysis jobs on an external pipeline
//! engine: renders a per-job pipeline from a workflow template, supervises the
//! engine process, tracks progress and cancellation, and records every
//! outcome on the job and its template.

pub mod config;
pub mod execution;
pub mod pipeline;
pub mod store;
pub mod utils;
pub mod workflow;

// Re-export main types for convenience
pub use config::{ConfigManager, OrchestratorConfig};
pub use execution::{JobOutcome, JobRegistry, Orchestrator, OrchestratorError, RunnerConfig};
pub use pipeline::{PipelineDefinition, PipelineGenerator};
pub use store::{FileJobStore, JobStore, MemoryJobStore, PersistenceError};
pub use workflow::{
    AnalysisJob, AnalysisKind, JobStatus, RuntimeParams, TemplateCatalog, WorkflowTemplate,
};
