//! Guaranteed worker termination
//!
//! `TerminationGuard` owns the termination action of a worker and runs it
//! from `Drop`, so it fires on every exit path: success, build failure,
//! early `?` return, timeout, and panic unwind.

use crate::error::VendError;
use std::process::Command;
use tracing::{info, warn};

/// How a worker ends its compute unit
pub trait Terminate: Send {
    fn terminate(&mut self);
}

/// Leave termination to process exit (container backends stop with PID 1)
#[derive(Debug, Default)]
pub struct ExitOnly;

impl Terminate for ExitOnly {
    fn terminate(&mut self) {
        info!("Worker finished, exiting");
    }
}

/// Run a command such as `shutdown -h now` on termination
#[derive(Debug, Clone)]
pub struct ShutdownCommand {
    argv: Vec<String>,
}

impl ShutdownCommand {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

impl Terminate for ShutdownCommand {
    fn terminate(&mut self) {
        let Some((program, args)) = self.argv.split_first() else {
            warn!("Empty shutdown command, exiting only");
            return;
        };
        info!("Running shutdown command: {:?}", self.argv);
        match Command::new(program).args(args).status() {
            Ok(status) if status.success() => {}
            Ok(status) => warn!("Shutdown command exited with {}", status),
            Err(e) => warn!("{}", VendError::command_failed(program.clone(), e)),
        }
    }
}

/// Runs its `Terminate` exactly once, when dropped
pub struct TerminationGuard {
    terminator: Option<Box<dyn Terminate>>,
}

impl TerminationGuard {
    pub fn new(terminator: Box<dyn Terminate>) -> Self {
        Self {
            terminator: Some(terminator),
        }
    }
}

impl Drop for TerminationGuard {
    fn drop(&mut self) {
        if let Some(mut terminator) = self.terminator.take() {
            if std::thread::panicking() {
                warn!("Worker panicked, terminating");
            }
            terminator.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting(Arc<AtomicUsize>);

    impl Terminate for Counting {
        fn terminate(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn terminates_once_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let _guard = TerminationGuard::new(Box::new(Counting(count.clone())));
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn terminates_on_early_return() {
        fn step(count: Arc<AtomicUsize>) -> Result<(), &'static str> {
            let _guard = TerminationGuard::new(Box::new(Counting(count)));
            let staged: Result<(), &'static str> = Err("toolchain install failed");
            staged?;
            Ok(())
        }
        let count = Arc::new(AtomicUsize::new(0));
        assert!(step(count.clone()).is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn terminates_on_panic() {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = TerminationGuard::new(Box::new(Counting(inner)));
            panic!("build crashed");
        });
        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[test]
    fn shutdown_command_runs() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("terminated");
        {
            let _guard = TerminationGuard::new(Box::new(ShutdownCommand::new(vec![
                "touch".to_string(),
                marker.display().to_string(),
            ])));
        }
        assert!(marker.exists());
    }
}
