// Integration tests for the omics orchestrator

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use omics_orchestrator::execution::{OutputCollector, RunnerConfig};
use omics_orchestrator::workflow::{ExecutionOutcome, TemplateCatalog};
use omics_orchestrator::{
    AnalysisJob, AnalysisKind, JobOutcome, JobRegistry, JobStatus, JobStore, MemoryJobStore,
    Orchestrator, OrchestratorError, RuntimeParams, WorkflowTemplate,
};

fn orchestrator_for(engine: PathBuf, store: Arc<MemoryJobStore>) -> Result<Orchestrator> {
    let config = RunnerConfig {
        engine_binary: engine,
        kill_grace: std::time::Duration::from_secs(5),
        ..RunnerConfig::default()
    };
    Ok(Orchestrator::new(config, JobRegistry::new(), store)?)
}

fn runtime_for(dir: &TempDir, job: &AnalysisJob) -> RuntimeParams {
    RuntimeParams::for_job(
        job,
        dir.path().join(format!("nextflow-work-{}", job.id)),
        dir.path().join(format!("nextflow-output-{}", job.id)),
    )
}

fn rna_seq_template() -> WorkflowTemplate {
    TemplateCatalog::builtin()
        .find_by_kind(&AnalysisKind::RnaSeq)
        .into_iter()
        .next()
        .cloned()
        .expect("built-in RNA-seq template")
}

#[test]
fn test_cancel_unknown_job_returns_false() {
    let registry = JobRegistry::new();
    assert!(!registry.cancel(&uuid::Uuid::new_v4()));
    assert!(registry.list_running().is_empty());
}

#[test]
fn test_collector_on_missing_directory() {
    let dir = TempDir::new().unwrap();
    let files = OutputCollector::new().collect(&dir.path().join("never-created"));
    assert!(files.is_empty());
}

#[tokio::test]
async fn test_unsupported_kind_never_spawns() -> Result<()> {
    let dir = TempDir::new()?;
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = orchestrator_for(dir.path().join("no-engine-here"), store.clone())?;
    let mut template =
        WorkflowTemplate::new("ATAC", AnalysisKind::from("atac-seq".to_string()), "admin");
    let mut job = AnalysisJob::new(template.id, "atac run", vec![]);
    store.save_job(&job)?;

    let runtime = runtime_for(&dir, &job);

    let err = orchestrator
        .execute(&mut template, &mut job, runtime)
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::UnsupportedWorkflowKind(ref k) if k == "atac-seq"));
    assert_eq!(job.status(), JobStatus::Failed);
    assert!(job.started_at().is_none());
    assert!(job
        .error_message()
        .unwrap()
        .contains("Unsupported workflow type: atac-seq"));
    assert_eq!(
        store.status_history(&job.id),
        vec![JobStatus::Pending, JobStatus::Failed]
    );
    assert_eq!(template.execution_history().len(), 1);
    assert_eq!(template.execution_history()[0].outcome, ExecutionOutcome::Failed);
    Ok(())
}

#[tokio::test]
async fn test_invalid_engine_path_fails_without_running() -> Result<()> {
    let dir = TempDir::new()?;
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = orchestrator_for(PathBuf::from("/nonexistent/bin/nextflow"), store.clone())?;
    let mut template = rna_seq_template();
    let mut job = AnalysisJob::new(template.id, "sample A", vec![]);
    store.save_job(&job)?;

    let runtime = runtime_for(&dir, &job);

    let err = orchestrator
        .execute(&mut template, &mut job, runtime)
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Spawn { .. }));
    assert_eq!(job.status(), JobStatus::Failed);
    assert!(job.error_message().unwrap().contains("/nonexistent/bin/nextflow"));
    assert!(!store.status_history(&job.id).contains(&JobStatus::Running));
    assert!(orchestrator.registry().is_empty());
    assert_eq!(template.execution_history().len(), 1);
    Ok(())
}

#[cfg(unix)]
mod unix {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    /// Executable shell script standing in for the engine; `$OUT` is the `--outdir` value
    fn fake_engine(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("nextflow");
        let script = format!(
            "#!/bin/sh\nOUT=\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"--outdir\" ]; then OUT=\"$2\"; fi\n  shift\ndone\n{}\n",
            body
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_rna_seq_run_completes() -> Result<()> {
        let dir = TempDir::new()?;
        let engine = fake_engine(
            &dir,
            "echo '[1a/2b3c] process > FASTQC'\n\
             echo '50% complete'\n\
             echo 'WARN: low mapping rate' >&2\n\
             mkdir -p \"$OUT/counts\"\n\
             echo gene > \"$OUT/counts/counts.txt\"\n\
             echo '100% complete'\n\
             exit 0",
        );
        let store = Arc::new(MemoryJobStore::new());
        let orchestrator = orchestrator_for(engine, store.clone())?;
        let mut template = rna_seq_template();
        let inputs = vec![
            dir.path().join("sample_R1.fastq.gz"),
            dir.path().join("sample_R2.fastq.gz"),
        ];
        let mut job = AnalysisJob::new(template.id, "sample", inputs);
        store.save_job(&job)?;
        let runtime = runtime_for(&dir, &job);
        let output_dir = runtime.output_dir.clone();

        let outcome = orchestrator.execute(&mut template, &mut job, runtime).await?;

        let JobOutcome::Completed { result, output_files } = outcome else {
            panic!("expected the job to complete");
        };
        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(output_files, vec![output_dir.join("counts").join("counts.txt")]);

        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.progress(), 100);
        assert_eq!(job.output_files(), output_files.as_slice());
        assert!(job.actual_duration().is_some());

        let logs = job.logs();
        let fifty = logs.iter().position(|l| l == "50% complete").unwrap();
        let hundred = logs.iter().position(|l| l == "100% complete").unwrap();
        assert!(fifty < hundred);
        assert!(logs.iter().any(|l| l == "WARN: low mapping rate"));
        assert!(!logs.iter().any(|l| l.contains("process > FASTQC")));

        assert_eq!(
            store.status_history(&job.id),
            vec![JobStatus::Pending, JobStatus::Running, JobStatus::Completed]
        );
        let progress = store.progress_history(&job.id);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));

        assert_eq!(template.execution_history().len(), 1);
        assert_eq!(template.execution_history()[0].outcome, ExecutionOutcome::Success);
        assert_eq!(
            store.load_template(&template.id)?.unwrap().execution_history().len(),
            1
        );
        assert!(orchestrator.registry().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails_with_message() -> Result<()> {
        let dir = TempDir::new()?;
        let engine = fake_engine(
            &dir,
            "echo '20% complete'\necho 'Process STAR_ALIGN terminated with an error exit status (137)' >&2\nexit 1",
        );
        let store = Arc::new(MemoryJobStore::new());
        let orchestrator = orchestrator_for(engine, store.clone())?;
        let mut template = rna_seq_template();
        let mut job = AnalysisJob::new(template.id, "sample", vec![]);

        let runtime = runtime_for(&dir, &job);

        let err = orchestrator
            .execute(&mut template, &mut job, runtime)
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::PipelineExecution { exit_code: Some(1), .. }));
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(!job.error_message().unwrap().is_empty());
        assert!(job.error_message().unwrap().contains("STAR_ALIGN"));
        assert_eq!(job.progress(), 20);
        assert_eq!(template.execution_history()[0].outcome, ExecutionOutcome::Failed);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_after_two_seconds() -> Result<()> {
        let dir = TempDir::new()?;
        let engine = fake_engine(&dir, "echo '10% complete'\nsleep 30\necho 'after sleep'");
        let store = Arc::new(MemoryJobStore::new());
        let orchestrator = orchestrator_for(engine, store.clone())?;
        let mut template = rna_seq_template();
        let mut job = AnalysisJob::new(template.id, "sample", vec![]);
        let job_id = job.id;
        let registry = orchestrator.registry().clone();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            registry.cancel(&job_id)
        });

        let started = std::time::Instant::now();
        let runtime = runtime_for(&dir, &job);
        let outcome = orchestrator
            .execute(&mut template, &mut job, runtime)
            .await?;

        assert!(canceller.await?);
        assert!(started.elapsed() < Duration::from_secs(20));
        assert!(matches!(outcome, JobOutcome::Cancelled { .. }));
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert!(job.completed_at().is_some());
        assert!(job.output_files().is_empty());
        assert_eq!(job.progress(), 10);
        assert!(!job.logs().iter().any(|l| l == "after sleep"));
        assert_eq!(template.execution_history()[0].outcome, ExecutionOutcome::Cancelled);
        assert!(orchestrator.registry().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_racing_completion_has_one_outcome() -> Result<()> {
        let dir = TempDir::new()?;
        let engine = fake_engine(&dir, "echo '100% complete'\nexit 0");
        let store = Arc::new(MemoryJobStore::new());
        let orchestrator = orchestrator_for(engine, store.clone())?;
        let mut template = rna_seq_template();
        let mut job = AnalysisJob::new(template.id, "sample", vec![]);
        let job_id = job.id;
        let runtime = runtime_for(&dir, &job);
        let registry = orchestrator.registry().clone();

        let cancel_loop = async {
            for _ in 0..500 {
                if registry.cancel(&job_id) {
                    return true;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            false
        };
        let (outcome, _) = tokio::join!(
            orchestrator.execute(&mut template, &mut job, runtime),
            cancel_loop
        );

        let status = outcome?.status();
        assert!(matches!(status, JobStatus::Completed | JobStatus::Cancelled));
        assert_eq!(job.status(), status);
        assert_eq!(template.execution_history().len(), 1);
        assert!(registry.is_empty());
        assert!(!registry.cancel(&job_id));

        let terminal: Vec<JobStatus> = store
            .status_history(&job_id)
            .into_iter()
            .filter(JobStatus::is_terminal)
            .collect();
        assert_eq!(terminal, vec![status]);
        Ok(())
    }

    #[tokio::test]
    async fn test_file_store_records_full_run() -> Result<()> {
        use omics_orchestrator::FileJobStore;

        let dir = TempDir::new()?;
        let engine = fake_engine(&dir, "echo '100% complete'");
        let store = Arc::new(FileJobStore::new(dir.path().join("store"))?);
        let config = RunnerConfig {
            engine_binary: engine,
            ..RunnerConfig::default()
        };
        let orchestrator = Orchestrator::new(config, JobRegistry::new(), store.clone())?;
        let mut template = rna_seq_template();
        let mut job = AnalysisJob::new(template.id, "sample", vec![]);

        let runtime = runtime_for(&dir, &job);
        orchestrator.execute(&mut template, &mut job, runtime).await?;

        let saved_job = store.load_job(&job.id)?.unwrap();
        assert_eq!(saved_job.status(), JobStatus::Completed);
        assert_eq!(saved_job.progress(), 100);
        let saved_template = store.load_template(&template.id)?.unwrap();
        assert_eq!(saved_template.execution_history().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_jobs_of_one_template() -> Result<()> {
        use omics_orchestrator::FileJobStore;

        let dir = TempDir::new()?;
        let engine = fake_engine(&dir, "echo '50% complete'\nsleep 1\necho '100% complete'");
        let store = Arc::new(FileJobStore::new(dir.path().join("store"))?);
        let config = RunnerConfig {
            engine_binary: engine,
            ..RunnerConfig::default()
        };
        let orchestrator = Orchestrator::new(config, JobRegistry::new(), store.clone())?;
        let registry = orchestrator.registry().clone();

        let template = rna_seq_template();
        let mut template_a = template.clone();
        let mut template_b = template.clone();
        let mut job_a = AnalysisJob::new(template.id, "sample A", vec![]);
        let mut job_b = AnalysisJob::new(template.id, "sample B", vec![]);
        let runtime_a = runtime_for(&dir, &job_a);
        let runtime_b = runtime_for(&dir, &job_b);

        let watch_running = async {
            for _ in 0..500 {
                let running = registry.list_running();
                if running.len() == 2 {
                    return running;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            registry.list_running()
        };
        let (outcome_a, outcome_b, mut running) = tokio::join!(
            orchestrator.execute(&mut template_a, &mut job_a, runtime_a),
            orchestrator.execute(&mut template_b, &mut job_b, runtime_b),
            watch_running
        );

        assert_eq!(outcome_a?.status(), JobStatus::Completed);
        assert_eq!(outcome_b?.status(), JobStatus::Completed);

        let mut expected = vec![job_a.id, job_b.id];
        expected.sort();
        running.sort();
        assert_eq!(running, expected);
        assert!(registry.is_empty());

        let stored = store.load_template(&template.id)?.unwrap();
        let mut recorded: Vec<_> = stored.execution_history().iter().map(|r| r.job_id).collect();
        recorded.sort();
        assert_eq!(recorded, expected);
        assert!(stored
            .execution_history()
            .iter()
            .all(|r| r.outcome == ExecutionOutcome::Success));

        let latest = template_a
            .execution_history()
            .len()
            .max(template_b.execution_history().len());
        assert_eq!(latest, 2);
        Ok(())
    }
}
