//! Configuration schema for wheelvend
//!
//! Configuration is stored at `~/.config/wheelvend/config.toml`

use crate::orchestration::ImageTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Artifact store settings
    pub store: StoreConfig,

    /// Build dispatch settings
    pub build: BuildConfig,

    /// Worker provisioning settings
    pub provisioner: ProvisionerConfig,

    /// Settings used inside the build worker
    pub worker: WorkerConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,

    /// Enable audit logging
    pub audit_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
            audit_log: true,
        }
    }
}

/// Artifact store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory of the filesystem store (default: state dir)
    pub root: Option<PathBuf>,

    /// Key prefix for every object written by this deployment
    pub prefix: String,

    /// Base URL clients use to download artifacts (default: file:// URL of root)
    pub public_url: Option<String>,
}

/// Build dispatch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Deployment region, used to select the build image
    pub region: String,

    /// Hard lifetime of a build worker
    pub max_lifetime_secs: u64,

    /// Extra time before an unfinished reservation counts as stale
    pub grace_secs: u64,

    /// How long a single vend invocation waits for completion
    pub deadline_secs: u64,

    /// First poll interval
    pub poll_initial_ms: u64,

    /// Poll interval ceiling
    pub poll_max_ms: u64,

    /// Build images per region and runtime
    pub images: ImageTable,
}

impl BuildConfig {
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn poll_initial(&self) -> Duration {
        Duration::from_millis(self.poll_initial_ms)
    }

    pub fn poll_max(&self) -> Duration {
        Duration::from_millis(self.poll_max_ms)
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            max_lifetime_secs: 900,
            grace_secs: 120,
            deadline_secs: 25,
            poll_initial_ms: 250,
            poll_max_ms: 4000,
            images: ImageTable::default(),
        }
    }
}

/// Provisioning backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionerKind {
    /// Child process on the local machine
    #[default]
    Local,
    /// Disposable Podman container
    Podman,
}

/// Worker provisioning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    /// Which backend launches workers
    pub kind: ProvisionerKind,

    /// Command that starts a worker (empty = this executable with `worker`)
    pub worker_command: Vec<String>,

    /// Network mode for worker containers
    pub network: String,

    /// Path the store root is mounted at inside worker containers
    pub store_mount: String,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            kind: ProvisionerKind::Local,
            worker_command: vec![],
            network: "host".to_string(),
            store_mount: "/store".to_string(),
        }
    }
}

/// Settings used inside the build worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Command that installs the native compilation toolchain
    pub toolchain_install: Vec<String>,

    /// Command that installs OS packages (package names are appended)
    pub package_install: Vec<String>,

    /// Interpreter per runtime tag
    pub python: BTreeMap<String, String>,

    /// Command run when the worker terminates (unset = exit only)
    pub shutdown_command: Option<Vec<String>>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let mut python = BTreeMap::new();
        python.insert("py27".to_string(), "python2.7".to_string());
        python.insert("py36".to_string(), "python3.6".to_string());

        Self {
            toolchain_install: vec![
                "yum".to_string(),
                "-y".to_string(),
                "groupinstall".to_string(),
                "Development Tools".to_string(),
            ],
            package_install: vec!["yum".to_string(), "-y".to_string(), "install".to_string()],
            python,
            shutdown_command: None,
        }
    }
}
