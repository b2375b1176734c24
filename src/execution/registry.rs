// Registry of in-flight pipeline processes
//
// The registry is the only state shared between jobs. It maps a job id to the
// handle of its running engine process so other tasks can list running jobs
// and request cancellation. The runner owning the child process performs the
// actual termination once it observes the request.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use crate::workflow::JobId;

/// One-shot cancellation request shared between the registry and a runner
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; later calls are no-ops
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.notify.notify_one();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.notify.notified().await;
        }
    }

    fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

/// Handle to a running engine process
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    /// OS process id, when the platform reports one
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    token: CancellationToken,
}

impl ProcessHandle {
    pub fn new(pid: Option<u32>, token: CancellationToken) -> Self {
        Self {
            pid,
            started_at: Utc::now(),
            token,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Concurrency-safe index of running jobs
///
/// Cheap to clone; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    running: Arc<Mutex<HashMap<JobId, ProcessHandle>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, ProcessHandle>> {
        // entries stay consistent even if a holder panicked mid-operation
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a running process
    ///
    /// The returned guard deregisters the job when dropped, however the
    /// runner exits. Registering an id twice replaces the earlier handle; the
    /// earlier guard then leaves the new entry alone.
    pub fn register(&self, job_id: JobId, handle: ProcessHandle) -> RegistrationGuard {
        let token = handle.token.clone();
        if self.lock().insert(job_id, handle).is_some() {
            tracing::warn!(job_id = %job_id, "Replaced an existing registry entry");
        }
        tracing::debug!(job_id = %job_id, "Registered running job");

        RegistrationGuard {
            registry: self.clone(),
            job_id,
            token,
        }
    }

    /// Remove a job; returns whether it was registered
    pub fn deregister(&self, job_id: &JobId) -> bool {
        let removed = self.lock().remove(job_id).is_some();
        if removed {
            tracing::debug!(job_id = %job_id, "Deregistered job");
        }
        removed
    }

    /// Request cancellation of a running job
    ///
    /// Returns `false` for ids that are not running. Best effort: the job may
    /// still finish on its own before the termination signal lands.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        match self.lock().get(job_id) {
            Some(handle) => {
                tracing::info!(job_id = %job_id, pid = ?handle.pid, "Cancellation requested");
                handle.token.cancel();
                true
            },
            None => {
                tracing::debug!(job_id = %job_id, "Cancel ignored for unknown job");
                false
            },
        }
    }

    /// Ids of all registered jobs, in no particular order
    pub fn list_running(&self) -> Vec<JobId> {
        self.lock().keys().copied().collect()
    }

    pub fn is_running(&self, job_id: &JobId) -> bool {
        self.lock().contains_key(job_id)
    }

    pub fn get(&self, job_id: &JobId) -> Option<ProcessHandle> {
        self.lock().get(job_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Cancel every running job; returns how many were signalled
    pub fn cancel_all(&self) -> usize {
        let running = self.lock();
        for handle in running.values() {
            handle.token.cancel();
        }
        running.len()
    }
}

/// Deregisters a job when dropped
#[derive(Debug)]
pub struct RegistrationGuard {
    registry: JobRegistry,
    job_id: JobId,
    token: CancellationToken,
}

impl RegistrationGuard {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        let mut running = self.registry.lock();
        let owned = running
            .get(&self.job_id)
            .map_or(false, |handle| handle.token.same_as(&self.token));
        if owned {
            running.remove(&self.job_id);
            tracing::debug!(job_id = %self.job_id, "Deregistered job on exit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn test_cancel_unknown_job_returns_false() {
        let registry = JobRegistry::new();
        assert!(!registry.cancel(&Uuid::new_v4()));
    }

    #[test]
    fn test_guard_deregisters_on_drop() {
        let registry = JobRegistry::new();
        let job_id = Uuid::new_v4();

        {
            let guard = registry.register(job_id, ProcessHandle::new(Some(42), CancellationToken::new()));
            assert_eq!(guard.job_id(), job_id);
            assert_eq!(registry.list_running(), vec![job_id]);
            assert_eq!(registry.get(&job_id).unwrap().pid, Some(42));
        }

        assert!(registry.is_empty());
        assert!(!registry.cancel(&job_id));
    }

    #[test]
    fn test_cancel_sets_token() {
        let registry = JobRegistry::new();
        let job_id = Uuid::new_v4();
        let token = CancellationToken::new();
        let _guard = registry.register(job_id, ProcessHandle::new(None, token.clone()));

        assert!(registry.cancel(&job_id));
        assert!(token.is_cancelled());
        assert!(registry.is_running(&job_id));
    }

    #[test]
    fn test_stale_guard_keeps_replacement_entry() {
        let registry = JobRegistry::new();
        let job_id = Uuid::new_v4();

        let first = registry.register(job_id, ProcessHandle::new(Some(1), CancellationToken::new()));
        let _second = registry.register(job_id, ProcessHandle::new(Some(2), CancellationToken::new()));
        drop(first);

        assert_eq!(registry.get(&job_id).unwrap().pid, Some(2));
        assert!(registry.deregister(&job_id));
        assert!(!registry.deregister(&job_id));
    }

    #[test]
    fn test_cancel_all() {
        let registry = JobRegistry::new();
        let tokens: Vec<_> = (0..3).map(|_| CancellationToken::new()).collect();
        let _guards: Vec<_> = tokens
            .iter()
            .map(|t| registry.register(Uuid::new_v4(), ProcessHandle::new(None, t.clone())))
            .collect();

        assert_eq!(registry.cancel_all(), 3);
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
    }

    #[tokio::test]
    async fn test_cancelled_future_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_before_wait_resolves_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .unwrap();
    }

    #[test]
    fn test_registry_shared_across_threads() {
        let registry = JobRegistry::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let job_id = Uuid::new_v4();
                    let guard = registry.register(job_id, ProcessHandle::new(None, CancellationToken::new()));
                    assert!(registry.cancel(&job_id));
                    drop(guard);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.is_empty());
    }
}
