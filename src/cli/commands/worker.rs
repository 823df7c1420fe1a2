//! Worker command - the entry action of a disposable build worker

use crate::cli::commands::store_root;
use crate::config::Config;
use crate::error::{VendError, VendResult};
use crate::orchestration::BootstrapParams;
use crate::store::FsStore;
use crate::worker::{
    self, BuildWorker, ExitOnly, PipToolchain, ShutdownCommand, Terminate, TerminationGuard,
    WorkerOutcome,
};
use std::sync::Arc;
use tracing::info;

/// Execute the worker command
///
/// The termination guard is armed before anything can fail, so a worker with
/// bad parameters or an unreachable store still ends its compute unit.
pub async fn execute(config: &Config) -> VendResult<()> {
    let guard = TerminationGuard::new(terminator(config));

    let params = BootstrapParams::from_env()?;
    let root = params
        .store_root
        .clone()
        .unwrap_or_else(|| store_root(config));
    info!("Worker {} using store at {}", params.worker_id, root.display());

    let store = Arc::new(FsStore::open(root, config.store.public_url.clone()).await?);
    let toolchain = Arc::new(PipToolchain::new(config.worker.clone()));
    let build = BuildWorker::new(params, store, toolchain)?;

    match worker::execute(build, guard).await {
        WorkerOutcome::Published { .. } => Ok(()),
        WorkerOutcome::Failed { summary } => Err(VendError::build(summary, "")),
    }
}

fn terminator(config: &Config) -> Box<dyn Terminate> {
    match config.worker.shutdown_command {
        Some(ref argv) => Box::new(ShutdownCommand::new(argv.clone())),
        None => Box::new(ExitOnly),
    }
}
