//! In-process provisioner
//!
//! Runs each worker as a tokio task against a shared store handle. Used by
//! the test suite and by embedders that already run on a build host.

use crate::error::{VendError, VendResult};
use crate::orchestration::{LaunchSpec, WorkerExit, WorkerJob, WorkerProvisioner};
use crate::store::ArtifactStore;
use crate::worker::{execute, BuildWorker, ExitOnly, TerminationGuard, Toolchain, WorkerOutcome};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

/// Runs workers as tasks of the current runtime
pub struct InProcessProvisioner {
    store: Arc<dyn ArtifactStore>,
    toolchain: Arc<dyn Toolchain>,
    tasks: Mutex<HashMap<String, JoinHandle<WorkerOutcome>>>,
    launches: AtomicUsize,
    failing_launches: AtomicUsize,
}

impl InProcessProvisioner {
    pub fn new(store: Arc<dyn ArtifactStore>, toolchain: Arc<dyn Toolchain>) -> Self {
        Self {
            store,
            toolchain,
            tasks: Mutex::new(HashMap::new()),
            launches: AtomicUsize::new(0),
            failing_launches: AtomicUsize::new(0),
        }
    }

    /// Number of workers launched so far
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Reject the next `n` launches with a provisioning failure
    pub fn fail_next_launches(&self, n: usize) {
        self.failing_launches.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkerProvisioner for InProcessProvisioner {
    async fn launch(&self, spec: &LaunchSpec) -> VendResult<WorkerJob> {
        let rejected = self
            .failing_launches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(VendError::provision("no build capacity available"));
        }

        let worker = BuildWorker::new(spec.params.clone(), self.store.clone(), self.toolchain.clone())
            .map_err(|e| VendError::provision(e.to_string()))?;

        self.launches.fetch_add(1, Ordering::SeqCst);
        let handle = spec.params.worker_id.to_string();
        let task = tokio::spawn(execute(worker, TerminationGuard::new(Box::new(ExitOnly))));
        info!("Worker {} started in process", handle);

        self.tasks.lock().await.insert(handle.clone(), task);
        Ok(WorkerJob::from_spec(spec, handle))
    }

    async fn await_termination(
        &self,
        job: &WorkerJob,
        timeout: Duration,
    ) -> VendResult<WorkerExit> {
        let Some(mut task) = self.tasks.lock().await.remove(&job.handle) else {
            return Ok(WorkerExit::Unknown);
        };

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(outcome)) if outcome.is_success() => Ok(WorkerExit::Exited(0)),
            Ok(Ok(_)) => Ok(WorkerExit::Exited(1)),
            Ok(Err(_)) => Ok(WorkerExit::Killed),
            Err(_) => {
                self.tasks.lock().await.insert(job.handle.clone(), task);
                Ok(WorkerExit::Running)
            }
        }
    }

    fn provisioner_name(&self) -> &'static str {
        "in-process"
    }
}
