// Error taxonomy of the execution layer

use std::path::PathBuf;

use crate::pipeline::GenerateError;
use crate::store::PersistenceError;
use crate::workflow::JobStateError;

/// Failures of the process runner
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The engine could not be started; the job never entered `running`
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed while waiting for engine process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("invalid progress pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error(transparent)]
    JobState(#[from] JobStateError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Errors surfaced by [`Orchestrator::execute`](super::Orchestrator::execute)
///
/// Every variant except the precondition checks is raised only after the job
/// reached a terminal state and the template history was appended.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Unsupported workflow type: {0}")]
    UnsupportedWorkflowKind(String),

    #[error("failed to spawn {program}: {message}")]
    Spawn { program: PathBuf, message: String },

    #[error("Nextflow execution failed: {message}")]
    PipelineExecution {
        exit_code: Option<i32>,
        message: String,
    },

    #[error(transparent)]
    Generate(GenerateError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    JobState(#[from] JobStateError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("engine process supervision failed: {0}")]
    Supervision(String),
}

impl From<GenerateError> for OrchestratorError {
    fn from(err: GenerateError) -> Self {
        match err {
            GenerateError::UnsupportedKind(kind) => {
                OrchestratorError::UnsupportedWorkflowKind(kind.to_string())
            },
            other => OrchestratorError::Generate(other),
        }
    }
}

impl From<RunnerError> for OrchestratorError {
    fn from(err: RunnerError) -> Self {
        match err {
            RunnerError::Spawn { program, source } => OrchestratorError::Spawn {
                program,
                message: source.to_string(),
            },
            RunnerError::JobState(e) => OrchestratorError::JobState(e),
            RunnerError::Persistence(e) => OrchestratorError::Persistence(e),
            other => OrchestratorError::Supervision(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::AnalysisKind;

    #[test]
    fn test_unsupported_kind_maps_to_taxonomy() {
        let err: OrchestratorError =
            GenerateError::UnsupportedKind(AnalysisKind::from("atac-seq".to_string())).into();

        assert!(matches!(err, OrchestratorError::UnsupportedWorkflowKind(ref k) if k == "atac-seq"));
        assert_eq!(err.to_string(), "Unsupported workflow type: atac-seq");
    }

    #[test]
    fn test_spawn_error_keeps_os_message() {
        let err: OrchestratorError = RunnerError::Spawn {
            program: PathBuf::from("/no/such/nextflow"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
        }
        .into();

        assert_eq!(
            err.to_string(),
            "failed to spawn /no/such/nextflow: No such file or directory"
        );
    }
}
