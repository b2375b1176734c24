// Orchestration of one analysis job from template to terminal state
//
// The orchestrator prepares directories, generates the pipeline definition,
// hands it to the process runner and reconciles the outcome into the job
// record and the template's execution history, persisting every step.

use chrono::Duration;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use super::collector::OutputCollector;
use super::error::OrchestratorError;
use super::registry::JobRegistry;
use super::runner::{EngineCommand, ExecutionResult, ProcessRunner, RunOutcome, RunnerConfig};
use crate::pipeline::{CompletionRecord, PipelineGenerator};
use crate::store::JobStore;
use crate::workflow::{
    AnalysisJob, ExecutionOutcome, JobId, JobStateError, JobStatus, RuntimeParams, WorkflowTemplate,
};

/// Final result of a job that did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed {
        result: ExecutionResult,
        output_files: Vec<PathBuf>,
    },
    Cancelled {
        result: ExecutionResult,
    },
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Completed { .. } => JobStatus::Completed,
            JobOutcome::Cancelled { .. } => JobStatus::Cancelled,
        }
    }

    pub fn result(&self) -> &ExecutionResult {
        match self {
            JobOutcome::Completed { result, .. } | JobOutcome::Cancelled { result } => result,
        }
    }
}

/// Runs analysis jobs against the external engine
pub struct Orchestrator {
    generator: PipelineGenerator,
    runner: ProcessRunner,
    collector: OutputCollector,
    store: Arc<dyn JobStore>,
}

impl Orchestrator {
    pub fn new(
        config: RunnerConfig,
        registry: JobRegistry,
        store: Arc<dyn JobStore>,
    ) -> Result<Self, OrchestratorError> {
        Ok(Self {
            generator: PipelineGenerator::new(),
            runner: ProcessRunner::new(config, registry)?,
            collector: OutputCollector::new(),
            store,
        })
    }

    pub fn registry(&self) -> &JobRegistry {
        self.runner.registry()
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Cancel a running job; `false` when it is not running
    pub fn cancel(&self, job_id: &JobId) -> bool {
        self.registry().cancel(job_id)
    }

    /// Execute `job` from `template` to a terminal state
    ///
    /// The job must be `pending` and launched from `template`; otherwise the
    /// call is rejected without touching either record. From then on every
    /// path ends with the job terminal, one history entry appended to the
    /// template, and both saved. Failures are returned after that
    /// reconciliation; cancellation is a normal outcome.
    pub async fn execute(
        &self,
        template: &mut WorkflowTemplate,
        job: &mut AnalysisJob,
        runtime: RuntimeParams,
    ) -> Result<JobOutcome, OrchestratorError> {
        if job.template_id != template.id {
            return Err(JobStateError::TemplateMismatch {
                job_id: job.id,
                template_id: template.id,
            }
            .into());
        }
        if job.status() != JobStatus::Pending {
            return Err(JobStateError::InvalidTransition {
                job_id: job.id,
                from: job.status(),
                to: JobStatus::Running,
            }
            .into());
        }

        info!(
            job_id = %job.id,
            template = %template.identifier(),
            "Executing analysis job"
        );

        let started = Instant::now();
        match self.run_job(template, job, &runtime).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if !job.is_terminal() {
                    self.fail_job(template, job, &err.to_string(), started);
                }
                error!(job_id = %job.id, "Analysis job failed: {}", err);
                Err(err)
            },
        }
    }

    async fn run_job(
        &self,
        template: &mut WorkflowTemplate,
        job: &mut AnalysisJob,
        runtime: &RuntimeParams,
    ) -> Result<JobOutcome, OrchestratorError> {
        for dir in [&runtime.work_dir, &runtime.output_dir] {
            ensure_dir(dir).await?;
        }

        let definition = self.generator.generate(template, runtime)?;
        let command = EngineCommand::for_pipeline(self.runner.config(), &definition);

        let outcome = self.runner.run(&command, job, self.store.as_ref()).await?;
        let duration = to_chrono(outcome.result().duration);

        if let Some(record) = self.read_completion_record(&definition.output_dir).await {
            info!(
                job_id = %job.id,
                success = record.success,
                "Engine completion record: {:?}",
                record.duration_ms
            );
        }

        match outcome {
            RunOutcome::Completed(result) => {
                let output_files = self.collect_outputs(&definition.output_dir).await;
                info!(job_id = %job.id, "Job completed with {} output files", output_files.len());

                job.complete(output_files.clone(), duration)?;
                self.finalize(template, job, ExecutionOutcome::Success, duration)?;
                Ok(JobOutcome::Completed {
                    result,
                    output_files,
                })
            },
            RunOutcome::Cancelled(result) => {
                info!(job_id = %job.id, "Job cancelled");
                job.cancel(duration)?;
                self.finalize(template, job, ExecutionOutcome::Cancelled, duration)?;
                Ok(JobOutcome::Cancelled { result })
            },
            RunOutcome::Failed(result) => {
                let message = result.error_message().unwrap_or_default();
                job.fail(format!("Nextflow execution failed: {}", message), Some(duration))?;
                self.finalize(template, job, ExecutionOutcome::Failed, duration)?;
                Err(OrchestratorError::PipelineExecution {
                    exit_code: result.exit_code,
                    message,
                })
            },
        }
    }

    /// Save the terminal job and append its history entry
    ///
    /// The entry is appended through the store so concurrent jobs of one
    /// template never overwrite each other; `template` then mirrors the
    /// stored history. History is appended even when the job save fails,
    /// and locally even when the store rejects it. The first persistence
    /// error is returned afterwards.
    fn finalize(
        &self,
        template: &mut WorkflowTemplate,
        job: &AnalysisJob,
        outcome: ExecutionOutcome,
        duration: Duration,
    ) -> Result<(), OrchestratorError> {
        let job_saved = self.store.save_job(job);
        let record = template.execution_record(job, outcome, duration)?;
        let appended = match self.store.append_execution(template, record.clone()) {
            Ok(stored) => {
                template.adopt_history(&stored);
                Ok(())
            },
            Err(e) => {
                template.push_record(record);
                Err(e)
            },
        };

        job_saved?;
        appended?;
        Ok(())
    }

    /// Force a non-terminal job to `failed` after an escaping error
    fn fail_job(&self, template: &mut WorkflowTemplate, job: &mut AnalysisJob, message: &str, started: Instant) {
        let duration = to_chrono(started.elapsed());
        let recorded_duration = job.started_at().map(|_| duration);

        if let Err(e) = job.fail(message, recorded_duration) {
            warn!(job_id = %job.id, "Could not mark job failed: {}", e);
            return;
        }
        if let Err(e) = self.finalize(template, job, ExecutionOutcome::Failed, duration) {
            error!(job_id = %job.id, "Failed to persist job failure: {}", e);
        }
    }

    async fn read_completion_record(&self, output_dir: &Path) -> Option<CompletionRecord> {
        let dir = output_dir.to_path_buf();
        match tokio::task::spawn_blocking(move || CompletionRecord::read_from(&dir)).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Completion record task failed: {}", e);
                None
            },
        }
    }

    async fn collect_outputs(&self, output_dir: &Path) -> Vec<PathBuf> {
        let collector = self.collector.clone();
        let dir = output_dir.to_path_buf();
        match tokio::task::spawn_blocking(move || collector.collect(&dir)).await {
            Ok(files) => files,
            Err(e) => {
                warn!("Output collection task failed: {}", e);
                Vec::new()
            },
        }
    }
}

async fn ensure_dir(dir: &Path) -> Result<(), OrchestratorError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| OrchestratorError::Io {
            path: dir.to_path_buf(),
            source,
        })
}

fn to_chrono(duration: std::time::Duration) -> Duration {
    Duration::from_std(duration).unwrap_or(Duration::MAX)
}
