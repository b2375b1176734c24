// In-memory job store
//
// Keeps the latest version of each record plus the full sequence of saved job
// snapshots, which lets callers observe every persisted transition.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{JobStore, PersistenceError};
use crate::workflow::{
    AnalysisJob, ExecutionRecord, JobId, JobStatus, TemplateId, WorkflowTemplate,
};

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, AnalysisJob>,
    templates: HashMap<TemplateId, WorkflowTemplate>,
    snapshots: Vec<AnalysisJob>,
    reject_status: Option<JobStatus>,
}

/// [`JobStore`] backed by process memory
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every job save in `status` fail with [`PersistenceError::Unavailable`]
    pub fn reject_saves_in(&self, status: JobStatus) {
        self.lock().reject_status = Some(status);
    }

    /// Every saved job snapshot, oldest first
    pub fn snapshots(&self) -> Vec<AnalysisJob> {
        self.lock().snapshots.clone()
    }

    /// Distinct consecutive statuses saved for one job
    pub fn status_history(&self, job_id: &JobId) -> Vec<JobStatus> {
        let inner = self.lock();
        let mut statuses: Vec<JobStatus> = Vec::new();
        for snapshot in inner.snapshots.iter().filter(|s| s.id == *job_id) {
            if statuses.last() != Some(&snapshot.status()) {
                statuses.push(snapshot.status());
            }
        }
        statuses
    }

    /// Saved progress values for one job, in save order
    pub fn progress_history(&self, job_id: &JobId) -> Vec<u8> {
        self.lock()
            .snapshots
            .iter()
            .filter(|s| s.id == *job_id)
            .map(AnalysisJob::progress)
            .collect()
    }
}

impl JobStore for MemoryJobStore {
    fn save_job(&self, job: &AnalysisJob) -> Result<(), PersistenceError> {
        let mut inner = self.lock();
        if inner.reject_status == Some(job.status()) {
            return Err(PersistenceError::Unavailable(format!(
                "saves of {} jobs are rejected",
                job.status()
            )));
        }
        inner.snapshots.push(job.clone());
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn save_template(&self, template: &WorkflowTemplate) -> Result<(), PersistenceError> {
        self.lock().templates.insert(template.id, template.clone());
        Ok(())
    }

    fn append_execution(
        &self,
        template: &WorkflowTemplate,
        record: ExecutionRecord,
    ) -> Result<WorkflowTemplate, PersistenceError> {
        let mut inner = self.lock();
        let stored = inner
            .templates
            .entry(template.id)
            .or_insert_with(|| template.clone());
        stored.push_record(record);
        Ok(stored.clone())
    }

    fn load_job(&self, job_id: &JobId) -> Result<Option<AnalysisJob>, PersistenceError> {
        Ok(self.lock().jobs.get(job_id).cloned())
    }

    fn load_template(
        &self,
        template_id: &TemplateId,
    ) -> Result<Option<WorkflowTemplate>, PersistenceError> {
        Ok(self.lock().templates.get(template_id).cloned())
    }
}
