//! Worker provisioning abstraction
//!
//! A provisioner launches one disposable worker per build. Implementations:
//! - `LocalProvisioner`: child process on this machine
//! - `PodmanProvisioner`: disposable container with a platform timeout
//! - `InProcessProvisioner`: tokio task, for tests and embedding

use crate::cache::Fingerprint;
use crate::error::VendResult;
use crate::orchestration::BootstrapParams;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// What to launch
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub fingerprint: Fingerprint,
    /// Build image (container backends only)
    pub image: Option<String>,
    pub params: BootstrapParams,
    /// Hard lifetime enforced by the platform where it can
    pub max_lifetime: Duration,
}

/// A launched worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerJob {
    /// Backend handle (process id, container id, task id)
    pub handle: String,
    pub fingerprint: Fingerprint,
    pub worker_id: Uuid,
    pub launch_time: DateTime<Utc>,
    pub max_lifetime: Duration,
    /// Store key of the build input handed to the worker
    pub build_input: String,
}

impl WorkerJob {
    pub fn from_spec(spec: &LaunchSpec, handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            fingerprint: spec.fingerprint.clone(),
            worker_id: spec.params.worker_id,
            launch_time: Utc::now(),
            max_lifetime: spec.max_lifetime,
            build_input: spec.params.source_key(),
        }
    }
}

/// How a worker ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Exited with a status code
    Exited(i32),
    /// Killed by a signal or the platform
    Killed,
    /// Still running when the wait gave up
    Running,
    /// The backend no longer knows the worker
    Unknown,
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with {}", code),
            Self::Killed => write!(f, "killed"),
            Self::Running => write!(f, "running"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Launches and observes disposable build workers
#[async_trait]
pub trait WorkerProvisioner: Send + Sync {
    /// Launch one worker. Errors are `ProvisionFailure`.
    async fn launch(&self, spec: &LaunchSpec) -> VendResult<WorkerJob>;

    /// Wait up to `timeout` for the worker to end
    async fn await_termination(&self, job: &WorkerJob, timeout: Duration)
        -> VendResult<WorkerExit>;

    /// Human-readable backend name
    fn provisioner_name(&self) -> &'static str;
}
