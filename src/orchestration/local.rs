//! Local subprocess provisioner
//!
//! Starts the worker command as a detached child with the bootstrap
//! parameters in its environment, along with the dispatcher's config file.
//! The child is not killed when the dispatcher exits; it is bounded by its
//! own lifetime timeout.

use crate::error::{VendError, VendResult};
use crate::orchestration::{LaunchSpec, WorkerExit, WorkerJob, WorkerProvisioner};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Read by the worker's `--config` option
const CONFIG_ENV: &str = "WHEELVEND_CONFIG";

/// Runs workers as child processes
pub struct LocalProvisioner {
    command: Vec<String>,
    log_dir: Option<PathBuf>,
    config_path: Option<PathBuf>,
    children: Mutex<HashMap<String, Child>>,
}

impl LocalProvisioner {
    /// `command` is the worker argv; output goes to `log_dir/<worker>.log` when set
    pub fn new(command: Vec<String>, log_dir: Option<PathBuf>) -> Self {
        Self {
            command,
            log_dir,
            config_path: None,
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Config file the worker loads, so it sees the same store and toolchain
    pub fn with_config_path(mut self, path: &Path) -> Self {
        self.config_path = Some(path.to_path_buf());
        self
    }

    fn output(&self, spec: &LaunchSpec) -> VendResult<(Stdio, Stdio)> {
        let Some(ref dir) = self.log_dir else {
            return Ok((Stdio::null(), Stdio::null()));
        };
        std::fs::create_dir_all(dir)
            .map_err(|e| VendError::io(format!("create {}", dir.display()), e))?;
        let path = dir.join(format!("{}.log", spec.params.worker_id));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| VendError::io(format!("open {}", path.display()), e))?;
        let err = file
            .try_clone()
            .map_err(|e| VendError::io(format!("clone {}", path.display()), e))?;
        Ok((Stdio::from(file), Stdio::from(err)))
    }
}

#[async_trait]
impl WorkerProvisioner for LocalProvisioner {
    async fn launch(&self, spec: &LaunchSpec) -> VendResult<WorkerJob> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| VendError::provision("worker command is empty"))?;
        let (stdout, stderr) = self.output(spec)?;

        debug!("Launching worker: {} {:?}", program, args);
        let mut command = Command::new(program);
        command.args(args).envs(spec.params.to_env());
        if let Some(ref path) = self.config_path {
            command.env(CONFIG_ENV, path);
        }
        let child = command
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|e| VendError::provision(format!("spawn {}: {}", program, e)))?;

        let handle = child
            .id()
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| spec.params.worker_id.to_string());
        info!("Worker {} started as pid {}", spec.params.worker_id, handle);

        self.children.lock().await.insert(handle.clone(), child);
        Ok(WorkerJob::from_spec(spec, handle))
    }

    async fn await_termination(
        &self,
        job: &WorkerJob,
        timeout: Duration,
    ) -> VendResult<WorkerExit> {
        let Some(mut child) = self.children.lock().await.remove(&job.handle) else {
            return Ok(WorkerExit::Unknown);
        };

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => Ok(match status.code() {
                Some(code) => WorkerExit::Exited(code),
                None => WorkerExit::Killed,
            }),
            Ok(Err(e)) => Err(VendError::io(format!("wait for worker {}", job.handle), e)),
            Err(_) => {
                self.children.lock().await.insert(job.handle.clone(), child);
                Ok(WorkerExit::Running)
            }
        }
    }

    fn provisioner_name(&self) -> &'static str {
        "local"
    }
}
