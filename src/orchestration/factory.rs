//! Provisioner factory
//!
//! Builds the configured provisioning backend.

use crate::config::{Config, ProvisionerKind};
use crate::error::{VendError, VendResult};
use crate::orchestration::local::LocalProvisioner;
use crate::orchestration::podman::{ContainerConfig, PodmanProvisioner};
use crate::orchestration::provisioner::WorkerProvisioner;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Worker command inside build images that do not override it
const IMAGE_WORKER_COMMAND: [&str; 2] = ["wheelvend", "worker"];

/// This executable with the `worker` subcommand
pub fn default_worker_command() -> VendResult<Vec<String>> {
    let exe = std::env::current_exe().map_err(|e| VendError::io("locate current executable", e))?;
    Ok(vec![exe.display().to_string(), "worker".to_string()])
}

/// Create the provisioner selected by `config.provisioner.kind`
///
/// # Arguments
/// * `config` - The application configuration
/// * `store_root` - Host directory of the filesystem store
/// * `config_path` - Config file local workers load
/// * `log_dir` - Where local workers write their output
pub fn create_provisioner(
    config: &Config,
    store_root: &Path,
    config_path: &Path,
    log_dir: Option<PathBuf>,
) -> VendResult<Arc<dyn WorkerProvisioner>> {
    let configured = config.provisioner.worker_command.clone();
    match config.provisioner.kind {
        ProvisionerKind::Local => {
            let command = if configured.is_empty() {
                default_worker_command()?
            } else {
                configured
            };
            Ok(Arc::new(
                LocalProvisioner::new(command, log_dir).with_config_path(config_path),
            ))
        }
        ProvisionerKind::Podman => {
            let command = if configured.is_empty() {
                IMAGE_WORKER_COMMAND.iter().map(|s| s.to_string()).collect()
            } else {
                configured
            };
            Ok(Arc::new(PodmanProvisioner::new(ContainerConfig {
                network: config.provisioner.network.clone(),
                store_root: store_root.to_path_buf(),
                store_mount: config.provisioner.store_mount.clone(),
                command,
            })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_worker_command_runs_worker_subcommand() {
        let command = default_worker_command().unwrap();
        assert_eq!(command.len(), 2);
        assert_eq!(command[1], "worker");
    }

    #[test]
    fn creates_configured_backend() {
        let mut config = Config::default();
        let local = create_provisioner(&config, Path::new("/tmp/store"), Path::new("/tmp/config.toml"), None).unwrap();
        assert_eq!(local.provisioner_name(), "local");

        config.provisioner.kind = ProvisionerKind::Podman;
        let podman = create_provisioner(&config, Path::new("/tmp/store"), Path::new("/tmp/config.toml"), None).unwrap();
        assert_eq!(podman.provisioner_name(), "podman");
    }
}
