// Execution layer of the omics pipeline orchestrator
//
// This module supervises external engine processes: the runner launches and
// streams one process, the registry tracks running jobs for cancellation, the
// collector lists produced artifacts and the orchestrator drives a job from
// pending to a terminal state.

pub mod collector;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod runner;

// Re-export commonly used types
pub use collector::OutputCollector;
pub use error::{OrchestratorError, RunnerError};
pub use orchestrator::{JobOutcome, Orchestrator};
pub use registry::{CancellationToken, JobRegistry, ProcessHandle, RegistrationGuard};
pub use runner::{
    EngineCommand, ExecutionResult, ProcessRunner, ProgressParser, RunOutcome, RunnerConfig,
    PROGRESS_PATTERN,
};
