// Analysis job records and their lifecycle state machine
//
// A job is one concrete execution attempt of a workflow template. Its status
// only moves forward: pending -> running -> {completed | failed | cancelled},
// with pending -> failed allowed when the pipeline never starts.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

use crate::utils::serde_helpers::optional_duration_millis;

use super::types::TemplateId;

/// Unique identifier for an analysis job
pub type JobId = Uuid;

/// Lifecycle status of an analysis job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the state machine permits moving from `self` to `next`
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Resources allocated to a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResources {
    pub cpu: u32,
    pub memory_mb: u64,
    pub storage_mb: u64,
}

impl Default for JobResources {
    fn default() -> Self {
        Self {
            cpu: 4,
            memory_mb: 8192,
            storage_mb: 10240,
        }
    }
}

/// Rejected job mutation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobStateError {
    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {job_id} is {status} and can no longer be modified")]
    Terminal { job_id: JobId, status: JobStatus },

    #[error("job {job_id} was not launched from template {template_id}")]
    TemplateMismatch {
        job_id: JobId,
        template_id: TemplateId,
    },
}

/// One concrete execution attempt of a workflow template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: JobId,
    pub template_id: TemplateId,
    pub name: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub input_files: Vec<PathBuf>,
    #[serde(default)]
    pub resources: JobResources,
    status: JobStatus,
    progress: u8,
    #[serde(default)]
    logs: Vec<String>,
    #[serde(default)]
    output_files: Vec<PathBuf>,
    #[serde(default)]
    error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
    #[serde(with = "optional_duration_millis", default)]
    actual_duration: Option<Duration>,
}

impl AnalysisJob {
    /// Create a pending job for a template
    pub fn new(template_id: TemplateId, name: impl Into<String>, input_files: Vec<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            template_id,
            name: name.into(),
            owner: None,
            project_id: None,
            priority: JobPriority::default(),
            parameters: BTreeMap::new(),
            input_files,
            resources: JobResources::default(),
            status: JobStatus::Pending,
            progress: 0,
            logs: Vec::new(),
            output_files: Vec::new(),
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            actual_duration: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    pub fn output_files(&self) -> &[PathBuf] {
        &self.output_files
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn actual_duration(&self) -> Option<Duration> {
        self.actual_duration
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall-clock time between start and completion
    pub fn execution_time(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some(completed - started),
            _ => None,
        }
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), JobStateError> {
        if self.status.is_terminal() {
            return Err(JobStateError::Terminal {
                job_id: self.id,
                status: self.status,
            });
        }
        if !self.status.can_transition_to(to) {
            return Err(JobStateError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    fn ensure_mutable(&self) -> Result<(), JobStateError> {
        if self.status.is_terminal() {
            return Err(JobStateError::Terminal {
                job_id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    /// pending -> running
    pub fn start(&mut self) -> Result<(), JobStateError> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        self.progress = 0;
        Ok(())
    }

    /// Raise progress and append log lines
    ///
    /// Progress is clamped to 0..=100 and never decreases; a lower value only
    /// appends the lines. Returns whether progress moved.
    pub fn update_progress(&mut self, progress: u32, lines: Vec<String>) -> Result<bool, JobStateError> {
        self.ensure_mutable()?;
        let clamped = progress.min(100) as u8;
        let advanced = clamped > self.progress;
        if advanced {
            self.progress = clamped;
        }
        self.logs.extend(lines);
        Ok(advanced)
    }

    pub fn append_logs(&mut self, lines: Vec<String>) -> Result<(), JobStateError> {
        self.ensure_mutable()?;
        self.logs.extend(lines);
        Ok(())
    }

    /// running -> completed
    pub fn complete(&mut self, output_files: Vec<PathBuf>, duration: Duration) -> Result<(), JobStateError> {
        self.transition(JobStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        self.progress = 100;
        self.output_files = output_files;
        self.actual_duration = Some(duration);
        Ok(())
    }

    /// pending | running -> failed
    pub fn fail(&mut self, message: impl Into<String>, duration: Option<Duration>) -> Result<(), JobStateError> {
        self.transition(JobStatus::Failed)?;
        let message = message.into();
        self.completed_at = Some(Utc::now());
        self.logs.push(format!("ERROR: {}", message));
        self.error_message = Some(message);
        self.actual_duration = duration;
        Ok(())
    }

    /// running -> cancelled
    pub fn cancel(&mut self, duration: Duration) -> Result<(), JobStateError> {
        self.transition(JobStatus::Cancelled)?;
        self.completed_at = Some(Utc::now());
        self.actual_duration = Some(duration);
        Ok(())
    }
}
