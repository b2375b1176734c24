// Persistence collaborator for jobs and templates
//
// The orchestrator saves every job transition and every template history
// append through a `JobStore`. Two implementations ship with the crate: a
// JSON document store on disk and an in-memory store.

pub mod file;
pub mod memory;

use std::path::PathBuf;

pub use file::FileJobStore;
pub use memory::MemoryJobStore;

use crate::workflow::{AnalysisJob, ExecutionRecord, JobId, TemplateId, WorkflowTemplate};

/// Failure to durably save or load a record
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode or decode {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable storage for job records and templates
pub trait JobStore: Send + Sync {
    /// Save the current state of a job, replacing any earlier version
    fn save_job(&self, job: &AnalysisJob) -> Result<(), PersistenceError>;

    /// Save a template, replacing any earlier version
    fn save_template(&self, template: &WorkflowTemplate) -> Result<(), PersistenceError>;

    /// Append one history entry to the stored template and save it
    ///
    /// The read, append and write happen as one step, so jobs of the same
    /// template finishing together each keep their entry. `template` seeds
    /// the document when none is stored yet. Returns the stored template.
    fn append_execution(
        &self,
        template: &WorkflowTemplate,
        record: ExecutionRecord,
    ) -> Result<WorkflowTemplate, PersistenceError>;

    /// Load a job by ID
    fn load_job(&self, job_id: &JobId) -> Result<Option<AnalysisJob>, PersistenceError>;

    /// Load a template by ID
    fn load_template(
        &self,
        template_id: &TemplateId,
    ) -> Result<Option<WorkflowTemplate>, PersistenceError>;
}
