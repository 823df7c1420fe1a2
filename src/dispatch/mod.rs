//! Dispatch entry point
//!
//! One `vend` call is one stateless invocation:
//!
//! 1. Validate the request and fingerprint it
//! 2. Resolve the fingerprint against the cache (hit, acquire or join)
//! 3. As owner: publish the build input and launch one worker
//! 4. Wait for completion until the invocation deadline
//! 5. Assemble the response
//!
//! All coordination with other invocations goes through the store.

pub mod monitor;
pub mod response;

pub use monitor::{Completion, CompletionMonitor, PollPolicy};
pub use response::{
    ArtifactSet, BuildInProgress, ErrorBody, ResolvedRequirement, VendResponse, VersionInfo,
};

use crate::audit::AuditLog;
use crate::cache::{fingerprint, CacheCoordinator, Fingerprint, Resolution, Reservation};
use crate::config::Config;
use crate::error::{VendError, VendResult};
use crate::orchestration::{BootstrapParams, ImageTable, LaunchSpec, WorkerProvisioner};
use crate::request::{BuildRequest, VendRequest};
use crate::store::layout::BUILD_INPUT_NAME;
use crate::store::WritePrecondition;
use bytes::Bytes;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Per-invocation dispatch settings
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Deployment region, selects the build image
    pub region: String,
    pub images: ImageTable,
    /// How long one invocation waits before answering "building"
    pub deadline: Duration,
    pub poll: PollPolicy,
    /// Store root handed to workers that open the filesystem store
    pub store_root: Option<PathBuf>,
}

impl DispatchSettings {
    pub fn from_config(config: &Config, store_root: Option<PathBuf>) -> Self {
        Self {
            region: config.build.region.clone(),
            images: config.build.images.clone(),
            deadline: config.build.deadline(),
            poll: PollPolicy::new(config.build.poll_initial(), config.build.poll_max()),
            store_root,
        }
    }
}

/// Serves vend requests from the cache or through a single worker
pub struct Dispatcher {
    coordinator: CacheCoordinator,
    provisioner: Arc<dyn WorkerProvisioner>,
    settings: DispatchSettings,
    audit: AuditLog,
}

impl Dispatcher {
    pub fn new(
        coordinator: CacheCoordinator,
        provisioner: Arc<dyn WorkerProvisioner>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            coordinator,
            provisioner,
            settings,
            audit: AuditLog::disabled(),
        }
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    pub fn coordinator(&self) -> &CacheCoordinator {
        &self.coordinator
    }

    /// Version of the running orchestrator
    pub fn version() -> VersionInfo {
        VersionInfo::default()
    }

    /// Handle one request. Every failure is folded into the response.
    pub async fn vend(&self, request: &VendRequest) -> VendResponse {
        let deadline = Instant::now() + self.settings.deadline;

        let build = match request.validate() {
            Ok(build) => build,
            Err(e) => {
                debug!("Rejected request: {}", e);
                return VendResponse::error(&e);
            }
        };

        match self.dispatch(&build, deadline).await {
            Ok((fp, Completion::Ready(manifest))) => {
                let location = self
                    .coordinator
                    .store()
                    .location(&self.coordinator.layout().build_prefix(&fp));
                VendResponse::ready(&manifest, location, request.minimal)
            }
            Ok((_, Completion::Failed {
                summary,
                diagnostic,
            })) => VendResponse::error(&VendError::build(summary, diagnostic)),
            Ok((fp, Completion::TimedOut)) => {
                VendResponse::building(&fp, self.settings.poll.max.as_secs())
            }
            Err(e) => {
                warn!("Dispatch failed: {}", e);
                VendResponse::error(&e)
            }
        }
    }

    /// Resolve, launch if owner, and wait for a validated build request
    pub async fn dispatch(
        &self,
        build: &BuildRequest,
        deadline: Instant,
    ) -> VendResult<(Fingerprint, Completion)> {
        let fp = fingerprint(build);
        debug!("Request fingerprint {}", fp);

        let reservation = match self.coordinator.resolve(&fp).await? {
            Resolution::Hit(manifest) => {
                debug!("Serving {} from cache", fp.short());
                return Ok((fp, Completion::Ready(manifest)));
            }
            Resolution::Acquired {
                reservation,
                reclaimed,
            } => {
                let event = if reclaimed {
                    "build.reclaimed"
                } else {
                    "build.reserved"
                };
                self.audit
                    .log(
                        event,
                        &json!({"fingerprint": fp, "owner": reservation.owner}),
                    )
                    .await;

                if let Err(e) = self.launch(build, &reservation).await {
                    if let Err(release_err) = self.coordinator.release(&reservation).await {
                        warn!("Could not release reservation: {}", release_err);
                    }
                    self.audit
                        .log(
                            "build.failed",
                            &json!({"fingerprint": fp, "error": e.to_string()}),
                        )
                        .await;
                    return Err(e);
                }
                reservation
            }
            Resolution::InFlight(reservation) => {
                info!("Joining in-flight build {}", fp.short());
                self.audit
                    .log(
                        "build.joined",
                        &json!({"fingerprint": fp, "owner": reservation.owner}),
                    )
                    .await;
                reservation
            }
        };

        let monitor = CompletionMonitor::new(&self.coordinator, self.settings.poll);
        let completion = monitor.await_completion(&reservation, deadline).await?;
        self.record(&fp, &completion).await;
        Ok((fp, completion))
    }

    async fn launch(&self, build: &BuildRequest, reservation: &Reservation) -> VendResult<()> {
        let fp = &reservation.fingerprint;
        let layout = self.coordinator.layout();

        self.coordinator
            .store()
            .put(
                &layout.source_key(fp),
                Bytes::from(build.requirements_txt()),
                WritePrecondition::None,
            )
            .await?;

        let runtime = build.runtime();
        let spec = LaunchSpec {
            fingerprint: fp.clone(),
            image: self
                .settings
                .images
                .get(&self.settings.region, runtime.tag())
                .map(str::to_string),
            params: BootstrapParams {
                runtime,
                extra_packages: build.extra_system_packages().map(str::to_string).collect(),
                source_base: layout.source_base(fp),
                archive_name: BUILD_INPUT_NAME.to_string(),
                destination_prefix: layout.build_prefix(fp),
                worker_id: reservation.owner,
                max_lifetime_secs: reservation.max_lifetime_secs,
                store_root: self.settings.store_root.clone(),
            },
            max_lifetime: self.coordinator.max_lifetime(),
        };

        let job = self.provisioner.launch(&spec).await?;
        info!(
            "Launched {} worker {} for {}",
            self.provisioner.provisioner_name(),
            job.handle,
            fp.short()
        );
        self.audit
            .log(
                "worker.launched",
                &json!({
                    "fingerprint": fp,
                    "owner": reservation.owner,
                    "provisioner": self.provisioner.provisioner_name(),
                    "handle": job.handle,
                    "image": spec.image,
                }),
            )
            .await;
        Ok(())
    }

    async fn record(&self, fp: &Fingerprint, completion: &Completion) {
        match completion {
            Completion::Ready(manifest) => {
                self.audit
                    .log(
                        "build.ready",
                        &json!({"fingerprint": fp, "artifacts": manifest.artifacts.len()}),
                    )
                    .await
            }
            Completion::Failed { summary, .. } => {
                self.audit
                    .log("build.failed", &json!({"fingerprint": fp, "summary": summary}))
                    .await
            }
            Completion::TimedOut => {
                self.audit
                    .log("build.timed_out", &json!({"fingerprint": fp}))
                    .await
            }
        }
    }
}
