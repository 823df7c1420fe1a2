//! Worker provisioning
//!
//! Launches one disposable build worker per reserved fingerprint:
//! - Local: child process running `wheelvend worker`
//! - Podman: disposable container with a platform-enforced timeout
//! - In-process: tokio task (tests, embedding)

mod factory;
pub mod images;
mod inprocess;
mod local;
pub mod params;
pub mod podman;
mod provisioner;

pub use factory::{create_provisioner, default_worker_command};
pub use images::ImageTable;
pub use inprocess::InProcessProvisioner;
pub use local::LocalProvisioner;
pub use params::BootstrapParams;
pub use podman::{ContainerConfig, PodmanProvisioner};
pub use provisioner::{LaunchSpec, WorkerExit, WorkerJob, WorkerProvisioner};

use crate::error::{VendError, VendResult};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Max number of output lines to include in build error messages.
pub(crate) const BUILD_ERROR_TAIL_LINES: usize = 50;

/// Extract the useful tail of build output for error diagnostics.
///
/// Combines stdout and stderr, then returns the last `BUILD_ERROR_TAIL_LINES`
/// lines so error messages are actionable without being overwhelming.
pub(crate) fn build_error_output(stdout: &str, stderr: &str) -> String {
    let lines: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    let total = lines.len();
    let tail: Vec<&str> = if total > BUILD_ERROR_TAIL_LINES {
        lines[total - BUILD_ERROR_TAIL_LINES..].to_vec()
    } else {
        lines
    };
    tail.join("\n")
}

/// Stream stdout+stderr from a child process, calling `on_output` for each line.
///
/// Returns all collected output lines. The child must have been spawned
/// with both streams piped.
pub(crate) async fn stream_child_output(
    child: &mut tokio::process::Child,
    on_output: &(dyn Fn(String) + Send + Sync),
) -> VendResult<Vec<String>> {
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(VendError::Internal(
            "child output was not piped".to_string(),
        ));
    };

    let mut stderr_reader = BufReader::new(stderr).lines();
    let mut stdout_reader = BufReader::new(stdout).lines();

    let mut all_output = Vec::new();
    let mut stderr_done = false;
    let mut stdout_done = false;

    while !stderr_done || !stdout_done {
        tokio::select! {
            line = stderr_reader.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    _ => stderr_done = true,
                }
            }
            line = stdout_reader.next_line(), if !stdout_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    _ => stdout_done = true,
                }
            }
        }
    }

    Ok(all_output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_output_keeps_tail() {
        let stdout: String = (0..40).map(|i| format!("out {i}\n")).collect();
        let stderr: String = (0..20).map(|i| format!("err {i}\n")).collect();
        let tail = build_error_output(&stdout, &stderr);
        assert_eq!(tail.lines().count(), BUILD_ERROR_TAIL_LINES);
        assert!(tail.starts_with("out 10"));
        assert!(tail.ends_with("err 19"));
    }

    #[test]
    fn short_output_kept_whole() {
        assert_eq!(build_error_output("a\nb", "c"), "a\nb\nc");
    }
}
