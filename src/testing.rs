//! Shared test doubles

use crate::cache::Reservation;
use crate::error::{VendError, VendResult};
use crate::orchestration::BootstrapParams;
use crate::request::Runtime;
use crate::store::layout::BUILD_INPUT_NAME;
use crate::store::StoreLayout;
use crate::worker::{BuildLog, Toolchain};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Worker parameters for a reservation under `layout`
pub(crate) fn params_for(layout: &StoreLayout, reservation: &Reservation) -> BootstrapParams {
    BootstrapParams {
        runtime: Runtime::Py36,
        extra_packages: vec![],
        source_base: layout.source_base(&reservation.fingerprint),
        archive_name: BUILD_INPUT_NAME.to_string(),
        destination_prefix: layout.build_prefix(&reservation.fingerprint),
        worker_id: reservation.owner,
        max_lifetime_secs: reservation.max_lifetime_secs,
        store_root: None,
    }
}

/// Toolchain that writes canned wheel files instead of compiling
pub(crate) struct FakeToolchain {
    wheels: Vec<String>,
    failure: Option<String>,
    required_package: Option<String>,
    delay: Duration,
    builds: AtomicUsize,
}

impl Default for FakeToolchain {
    fn default() -> Self {
        Self::producing(vec![
            "numpy-1.15.0-cp36-cp36m-manylinux1_x86_64.whl",
            "six-1.11.0-py2.py3-none-any.whl",
        ])
    }
}

impl FakeToolchain {
    pub(crate) fn producing(wheels: Vec<&str>) -> Self {
        Self {
            wheels: wheels.into_iter().map(String::from).collect(),
            failure: None,
            required_package: None,
            delay: Duration::ZERO,
            builds: AtomicUsize::new(0),
        }
    }

    /// Fail the build with `diagnostic` as compiler output
    pub(crate) fn failing(diagnostic: &str) -> Self {
        Self {
            failure: Some(diagnostic.to_string()),
            ..Self::default()
        }
    }

    /// Fail staging unless `package` is among the extra OS packages
    pub(crate) fn requiring_package(mut self, package: &str) -> Self {
        self.required_package = Some(package.to_string());
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Toolchain for FakeToolchain {
    async fn stage(
        &self,
        _runtime: Runtime,
        extra_packages: &[String],
        log: &mut BuildLog,
    ) -> VendResult<()> {
        log.push(format!("staged {}", extra_packages.join(" ")));
        match self.required_package {
            Some(ref package) if !extra_packages.contains(package) => {
                log.push(format!("fatal error: {package} headers not found"));
                Err(VendError::build("pip wheel failed", log.tail()))
            }
            _ => Ok(()),
        }
    }

    async fn build(
        &self,
        _runtime: Runtime,
        _input: &Path,
        out_dir: &Path,
        log: &mut BuildLog,
    ) -> VendResult<()> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(ref diagnostic) = self.failure {
            log.push(diagnostic.clone());
            return Err(VendError::build("pip wheel failed", log.tail()));
        }
        for wheel in &self.wheels {
            tokio::fs::write(out_dir.join(wheel), wheel.as_bytes())
                .await
                .map_err(|e| VendError::io(format!("write {}", wheel), e))?;
        }
        Ok(())
    }
}
