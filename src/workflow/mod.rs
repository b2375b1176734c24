// Workflow templates and analysis jobs
//
// This module holds the data model of the orchestrator: reusable workflow
// templates, the analysis jobs launched from them and the template catalog.

pub mod catalog;
pub mod job;
pub mod types;

// Re-export commonly used types
pub use catalog::{builtin_templates, TemplateCatalog, ValidationResult};
pub use job::*;
pub use types::*;
