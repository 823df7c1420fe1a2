//! Build worker runtime
//!
//! Runs inside the disposable compute unit. The sequence is fixed:
//!
//! 1. Stage the toolchain and extra OS packages
//! 2. Fetch the build input from the store
//! 3. Build wheels into a local staging directory
//! 4. Upload every wheel under the destination prefix
//! 5. Publish the manifest, only if every upload succeeded
//! 6. Release the reservation and terminate
//!
//! A failed build writes a failure marker instead of a manifest. The worker
//! never retries; termination happens on every path via `TerminationGuard`.

pub mod guard;
pub mod toolchain;
pub mod wheel;

pub use guard::{ExitOnly, ShutdownCommand, Terminate, TerminationGuard};
pub use toolchain::{BuildLog, PipToolchain, Toolchain};
pub use wheel::WheelFilename;

use crate::cache::{checksum, ArtifactRecord, CacheCoordinator, Fingerprint, Manifest, Reservation};
use crate::error::{VendError, VendResult};
use crate::orchestration::BootstrapParams;
use crate::store::{ArtifactStore, ScopedStore, WritePrecondition};
use bytes::Bytes;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Time kept back from the lifetime for failure reporting and release
const CLEANUP_MARGIN: Duration = Duration::from_secs(10);

/// Terminal result of a worker run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    Published { artifacts: usize },
    Failed { summary: String },
}

impl WorkerOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Published { .. })
    }
}

/// One build, bound to its parameters and a scoped store
pub struct BuildWorker {
    params: BootstrapParams,
    fingerprint: Fingerprint,
    coordinator: CacheCoordinator,
    toolchain: Arc<dyn Toolchain>,
}

impl BuildWorker {
    /// Bind a worker to `store`, restricted to the parameters' prefixes
    pub fn new(
        params: BootstrapParams,
        store: Arc<dyn ArtifactStore>,
        toolchain: Arc<dyn Toolchain>,
    ) -> VendResult<Self> {
        let fingerprint = params.fingerprint()?;
        let layout = params.layout()?;
        let scoped: Arc<dyn ArtifactStore> = Arc::new(ScopedStore::new(
            store,
            params.source_base.clone(),
            params.destination_prefix.clone(),
        )?);
        let lifetime = Duration::from_secs(params.max_lifetime_secs);
        let coordinator = CacheCoordinator::new(scoped, layout, lifetime, Duration::ZERO);

        Ok(Self {
            params,
            fingerprint,
            coordinator,
            toolchain,
        })
    }

    pub fn params(&self) -> &BootstrapParams {
        &self.params
    }

    /// The reservation this worker runs under, as far as release needs it
    fn reservation(&self) -> Reservation {
        Reservation {
            fingerprint: self.fingerprint.clone(),
            owner: self.params.worker_id,
            created_at: Utc::now(),
            max_lifetime_secs: self.params.max_lifetime_secs,
        }
    }

    /// Run the build within the worker lifetime. Never returns an error;
    /// failures are recorded in the store and reported in the outcome.
    pub async fn run(&self) -> WorkerOutcome {
        let lifetime = Duration::from_secs(self.params.max_lifetime_secs);
        let budget = lifetime.saturating_sub(CLEANUP_MARGIN).max(Duration::from_secs(1));

        let result = match tokio::time::timeout(budget, self.build()).await {
            Ok(result) => result,
            Err(_) => Err(VendError::WorkerLifetimeExceeded {
                secs: self.params.max_lifetime_secs,
            }),
        };

        let reservation = self.reservation();
        let outcome = match result {
            Ok(manifest) => {
                info!(
                    "Build {} published {} artifact(s)",
                    self.fingerprint.short(),
                    manifest.artifacts.len()
                );
                WorkerOutcome::Published {
                    artifacts: manifest.artifacts.len(),
                }
            }
            Err(e) => {
                let (summary, diagnostic) = match e {
                    VendError::BuildFailure {
                        summary,
                        diagnostic,
                    } => (summary, diagnostic),
                    other => (other.to_string(), String::new()),
                };
                error!("Build {} failed: {}", self.fingerprint.short(), summary);
                if let Err(e) = self
                    .coordinator
                    .record_failure(&reservation, &summary, &diagnostic)
                    .await
                {
                    warn!("Could not record failure marker: {}", e);
                }
                WorkerOutcome::Failed { summary }
            }
        };

        if let Err(e) = self.coordinator.release(&reservation).await {
            warn!("Could not release reservation: {}", e);
        }
        outcome
    }

    async fn build(&self) -> VendResult<Manifest> {
        let runtime = self.params.runtime;
        let work = tempfile::Builder::new()
            .prefix("wheelvend-build-")
            .tempdir()
            .map_err(|e| VendError::io("create build directory", e))?;
        let out_dir = work.path().join("wheels");
        tokio::fs::create_dir_all(&out_dir)
            .await
            .map_err(|e| VendError::io(format!("create {}", out_dir.display()), e))?;

        let mut log = BuildLog::new();

        info!("Staging toolchain for {}", runtime);
        self.toolchain
            .stage(runtime, &self.params.extra_packages, &mut log)
            .await?;

        let input = self.fetch_input(work.path()).await?;

        info!("Building wheels from {}", self.params.archive_name);
        self.toolchain
            .build(runtime, &input, &out_dir, &mut log)
            .await?;

        let artifacts = self.upload(&out_dir, &log).await?;

        let manifest = Manifest::new(
            self.fingerprint.clone(),
            runtime,
            requirement_lines(&input).await,
            self.params.worker_id,
            artifacts,
        );
        self.coordinator.publish_manifest(&manifest).await?;
        Ok(manifest)
    }

    async fn fetch_input(&self, work_dir: &Path) -> VendResult<std::path::PathBuf> {
        let key = self.params.source_key();
        let data = self
            .coordinator
            .store()
            .get(&key)
            .await?
            .ok_or_else(|| VendError::build(format!("build input {} is missing", key), ""))?;

        let file_name = Path::new(&self.params.archive_name)
            .file_name()
            .ok_or_else(|| {
                VendError::InvalidRequest(format!(
                    "bad archive name '{}'",
                    self.params.archive_name
                ))
            })?;
        let path = work_dir.join(file_name);
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| VendError::io(format!("write {}", path.display()), e))?;
        debug!("Fetched {} ({} bytes)", key, data.len());
        Ok(path)
    }

    async fn upload(&self, out_dir: &Path, log: &BuildLog) -> VendResult<Vec<ArtifactRecord>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(out_dir)
            .await
            .map_err(|e| VendError::io(format!("read {}", out_dir.display()), e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| VendError::io(format!("read {}", out_dir.display()), e))?
        {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();

        let layout = self.coordinator.layout().clone();
        let mut artifacts = Vec::new();
        for name in names {
            let Some(wheel) = WheelFilename::parse(&name) else {
                debug!("Skipping non-wheel output {}", name);
                continue;
            };
            let path = out_dir.join(&name);
            let data = tokio::fs::read(&path)
                .await
                .map_err(|e| VendError::io(format!("read {}", path.display()), e))?;

            let key = layout.artifact_key(&self.fingerprint, &name);
            let size = data.len() as u64;
            let sum = checksum(&data);
            self.coordinator
                .store()
                .put(&key, Bytes::from(data), WritePrecondition::None)
                .await
                .map_err(|e| VendError::build(format!("upload of {} failed", name), e.to_string()))?;
            debug!("Uploaded {}", key);

            artifacts.push(ArtifactRecord {
                package_name: wheel.name,
                resolved_version: wheel.version,
                object_key: key,
                checksum: sum,
                size,
            });
        }

        if artifacts.is_empty() {
            return Err(VendError::build("the build produced no wheels", log.tail()));
        }
        Ok(artifacts)
    }
}

/// Requirement lines of a requirements-file input, or the archive name
async fn requirement_lines(input: &Path) -> Vec<String> {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if !name.ends_with(".txt") {
        return vec![name];
    }
    match tokio::fs::read_to_string(input).await {
        Ok(text) => text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect(),
        Err(_) => vec![name],
    }
}

/// Run a worker, then drop the caller's termination guard
pub async fn execute(worker: BuildWorker, guard: TerminationGuard) -> WorkerOutcome {
    let _guard = guard;
    info!(
        "Worker {} building {}",
        worker.params.worker_id,
        worker.fingerprint.short()
    );
    worker.run().await
}
