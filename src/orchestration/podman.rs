//! Podman provisioner
//!
//! Each worker is a detached `--rm` container. `--timeout` makes Podman
//! kill the container once its lifetime is spent, which backs up the
//! worker's own deadline.

use crate::error::{VendError, VendResult};
use crate::orchestration::{
    build_error_output, LaunchSpec, WorkerExit, WorkerJob, WorkerProvisioner,
};
use crate::orchestration::params::ENV_STORE_ROOT;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Exit status Podman reports for a container it had to kill
const KILLED_STATUS: i32 = 137;

/// Container settings shared by every worker
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Network mode
    pub network: String,
    /// Host directory of the filesystem store
    pub store_root: PathBuf,
    /// Mount point of the store inside the container
    pub store_mount: String,
    /// Worker command run inside the image
    pub command: Vec<String>,
}

/// Launches workers as Podman containers
pub struct PodmanProvisioner {
    config: ContainerConfig,
}

impl PodmanProvisioner {
    pub fn new(config: ContainerConfig) -> Self {
        Self { config }
    }

    /// Execute a Podman command and return the output
    async fn exec(&self, args: &[String]) -> VendResult<std::process::Output> {
        debug!("Executing: podman {:?}", args);

        Command::new("podman")
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| VendError::command_failed(format!("podman {:?}", args), e))
    }

    /// Arguments of the `podman run` that starts a worker
    pub fn run_args(&self, spec: &LaunchSpec, image: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--rm".to_string(),
            "--timeout".to_string(),
            spec.max_lifetime.as_secs().max(1).to_string(),
            "--name".to_string(),
            format!("wheelvend-{}", spec.params.worker_id),
            "--label".to_string(),
            format!("io.wheelvend.fingerprint={}", spec.fingerprint),
            "--network".to_string(),
            self.config.network.clone(),
            "-v".to_string(),
            format!(
                "{}:{}",
                self.config.store_root.display(),
                self.config.store_mount
            ),
        ];

        let mut env = spec.params.to_env();
        env.insert(ENV_STORE_ROOT.to_string(), self.config.store_mount.clone());
        for (k, v) in env {
            args.push("-e".to_string());
            args.push(format!("{}={}", k, v));
        }

        args.push(image.to_string());
        args.extend(self.config.command.iter().cloned());
        args
    }
}

#[async_trait]
impl WorkerProvisioner for PodmanProvisioner {
    async fn launch(&self, spec: &LaunchSpec) -> VendResult<WorkerJob> {
        let image = spec
            .image
            .as_deref()
            .ok_or_else(|| VendError::provision("no build image selected"))?;
        let args = self.run_args(spec, image);

        let output = self
            .exec(&args)
            .await
            .map_err(|e| VendError::provision(e.to_string()))?;

        if output.status.success() {
            let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
            info!(
                "Worker container started: {}",
                &container_id[..12.min(container_id.len())]
            );
            Ok(WorkerJob::from_spec(spec, container_id))
        } else {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(VendError::provision(build_error_output(&stdout, &stderr)))
        }
    }

    async fn await_termination(
        &self,
        job: &WorkerJob,
        timeout: Duration,
    ) -> VendResult<WorkerExit> {
        let args = vec!["wait".to_string(), job.handle.clone()];
        let output = match tokio::time::timeout(timeout, self.exec(&args)).await {
            Ok(output) => output?,
            Err(_) => return Ok(WorkerExit::Running),
        };

        if !output.status.success() {
            // --rm containers vanish once they exit
            return Ok(WorkerExit::Unknown);
        }

        let code = String::from_utf8_lossy(&output.stdout).trim().parse::<i32>();
        Ok(match code {
            Ok(KILLED_STATUS) => WorkerExit::Killed,
            Ok(code) => WorkerExit::Exited(code),
            Err(_) => WorkerExit::Unknown,
        })
    }

    fn provisioner_name(&self) -> &'static str {
        "podman"
    }
}
