// JSON document store on the local filesystem
//
// Layout: `<root>/jobs/<job id>.json` and `<root>/templates/<template id>.json`.
// Documents are written to a temp file in the same directory and renamed into
// place, so readers never observe a half-written record.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::NamedTempFile;
use tracing::debug;

use super::{JobStore, PersistenceError};
use crate::workflow::{AnalysisJob, ExecutionRecord, JobId, TemplateId, WorkflowTemplate};

const JOBS_DIR: &str = "jobs";
const TEMPLATES_DIR: &str = "templates";

/// File-backed [`JobStore`]
///
/// Clones share one template lock, which serializes history appends within
/// the process.
#[derive(Debug, Clone)]
pub struct FileJobStore {
    root: PathBuf,
    template_lock: Arc<Mutex<()>>,
}

impl FileJobStore {
    /// Open a store rooted at `root`, creating its directories
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, PersistenceError> {
        let root = root.as_ref().to_path_buf();

        for dir in [root.join(JOBS_DIR), root.join(TEMPLATES_DIR)] {
            fs::create_dir_all(&dir).map_err(|source| PersistenceError::Io {
                path: dir.clone(),
                source,
            })?;
        }

        debug!("Opened job store at {}", root.display());
        Ok(Self {
            root,
            template_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_path(&self, job_id: &JobId) -> PathBuf {
        self.root.join(JOBS_DIR).join(format!("{}.json", job_id))
    }

    pub fn template_path(&self, template_id: &TemplateId) -> PathBuf {
        self.root
            .join(TEMPLATES_DIR)
            .join(format!("{}.json", template_id))
    }

    /// IDs of all stored jobs
    pub fn list_jobs(&self) -> Result<Vec<JobId>, PersistenceError> {
        let dir = self.root.join(JOBS_DIR);
        let entries = fs::read_dir(&dir).map_err(|source| PersistenceError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut ids: Vec<JobId> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().map_or(false, |ext| ext == "json") {
                    path.file_stem()
                        .and_then(|stem| stem.to_str())
                        .and_then(|stem| stem.parse().ok())
                } else {
                    None
                }
            })
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn write_document<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec_pretty(value).map_err(|source| PersistenceError::Serde {
            path: path.to_path_buf(),
            source,
        })?;

        let io_err = |source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        };
        let dir = path.parent().unwrap_or_else(|| Path::new("."));

        let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;

        debug!("Saved document {}", path.display());
        Ok(())
    }

    fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path).map_err(|source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let value = serde_json::from_str(&content).map_err(|source| PersistenceError::Serde {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Some(value))
    }
}

impl JobStore for FileJobStore {
    fn save_job(&self, job: &AnalysisJob) -> Result<(), PersistenceError> {
        Self::write_document(&self.job_path(&job.id), job)
    }

    fn save_template(&self, template: &WorkflowTemplate) -> Result<(), PersistenceError> {
        let _guard = self.template_lock.lock().unwrap_or_else(PoisonError::into_inner);
        Self::write_document(&self.template_path(&template.id), template)
    }

    fn append_execution(
        &self,
        template: &WorkflowTemplate,
        record: ExecutionRecord,
    ) -> Result<WorkflowTemplate, PersistenceError> {
        let _guard = self.template_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let path = self.template_path(&template.id);

        let mut stored: WorkflowTemplate =
            Self::read_document(&path)?.unwrap_or_else(|| template.clone());
        stored.push_record(record);
        Self::write_document(&path, &stored)?;
        Ok(stored)
    }

    fn load_job(&self, job_id: &JobId) -> Result<Option<AnalysisJob>, PersistenceError> {
        Self::read_document(&self.job_path(job_id))
    }

    fn load_template(
        &self,
        template_id: &TemplateId,
    ) -> Result<Option<WorkflowTemplate>, PersistenceError> {
        Self::read_document(&self.template_path(template_id))
    }
}
