//! Build toolchains
//!
//! A toolchain stages the native compiler and OS packages, then turns a
//! build input into wheels in an output directory.

use crate::config::schema::WorkerConfig;
use crate::error::{VendError, VendResult};
use crate::orchestration::{build_error_output, stream_child_output, BUILD_ERROR_TAIL_LINES};
use crate::request::Runtime;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// The most recent output of a build, for failure diagnostics
#[derive(Debug, Default, Clone)]
pub struct BuildLog {
    lines: VecDeque<String>,
}

impl BuildLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == BUILD_ERROR_TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn extend(&mut self, lines: impl IntoIterator<Item = String>) {
        for line in lines {
            self.push(line);
        }
    }

    /// The last lines of output
    pub fn tail(&self) -> String {
        let lines: Vec<&str> = self.lines.iter().map(String::as_str).collect();
        build_error_output(&lines.join("\n"), "")
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Produces wheels from a build input
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Install the compiler toolchain and extra OS packages
    async fn stage(
        &self,
        runtime: Runtime,
        extra_packages: &[String],
        log: &mut BuildLog,
    ) -> VendResult<()>;

    /// Build `input` (requirements file or source distribution) into `out_dir`
    async fn build(
        &self,
        runtime: Runtime,
        input: &Path,
        out_dir: &Path,
        log: &mut BuildLog,
    ) -> VendResult<()>;
}

/// Toolchain driving the OS package manager and `pip wheel`
#[derive(Debug, Clone)]
pub struct PipToolchain {
    config: WorkerConfig,
}

impl PipToolchain {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    /// Interpreter for a runtime, from config or the runtime default
    pub fn interpreter(&self, runtime: Runtime) -> String {
        self.config
            .python
            .get(runtime.tag())
            .cloned()
            .unwrap_or_else(|| runtime.interpreter().to_string())
    }

    /// Arguments of the `pip wheel` invocation for an input
    pub fn wheel_args(input: &Path, out_dir: &Path) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            "pip".to_string(),
            "wheel".to_string(),
            "--wheel-dir".to_string(),
            out_dir.display().to_string(),
        ];
        if input.extension().is_some_and(|ext| ext == "txt") {
            args.push("-r".to_string());
        }
        args.push(input.display().to_string());
        args
    }

    async fn run(&self, argv: &[String], log: &mut BuildLog) -> VendResult<()> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| VendError::Internal("empty toolchain command".to_string()))?;

        log.push(format!("$ {}", argv.join(" ")));
        debug!("Running: {:?}", argv);

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                VendError::build(
                    format!("could not run {}", program),
                    e.to_string(),
                )
            })?;

        let output = stream_child_output(&mut child, &|line: String| debug!("{}", line)).await?;
        log.extend(output);

        let status = child
            .wait()
            .await
            .map_err(|e| VendError::io(format!("wait for {}", program), e))?;
        if status.success() {
            Ok(())
        } else {
            Err(VendError::build(
                format!("`{}` failed ({})", argv.join(" "), status),
                log.tail(),
            ))
        }
    }
}

#[async_trait]
impl Toolchain for PipToolchain {
    async fn stage(
        &self,
        runtime: Runtime,
        extra_packages: &[String],
        log: &mut BuildLog,
    ) -> VendResult<()> {
        if !self.config.toolchain_install.is_empty() {
            self.run(&self.config.toolchain_install, log).await?;
        }
        if !extra_packages.is_empty() && !self.config.package_install.is_empty() {
            let mut argv = self.config.package_install.clone();
            argv.extend(extra_packages.iter().cloned());
            self.run(&argv, log).await?;
        }
        let python = self.interpreter(runtime);
        let argv: Vec<String> = [python.as_str(), "-m", "pip", "install", "wheel"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        self.run(&argv, log).await
    }

    async fn build(
        &self,
        runtime: Runtime,
        input: &Path,
        out_dir: &Path,
        log: &mut BuildLog,
    ) -> VendResult<()> {
        let mut argv = vec![self.interpreter(runtime)];
        argv.extend(Self::wheel_args(input, out_dir));
        self.run(&argv, log).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn toolchain(toolchain_install: Vec<&str>) -> PipToolchain {
        let mut config = WorkerConfig::default();
        config.toolchain_install = toolchain_install.into_iter().map(String::from).collect();
        PipToolchain::new(config)
    }

    #[test]
    fn requirements_file_uses_dash_r() {
        let args = PipToolchain::wheel_args(
            &PathBuf::from("/w/requirements.txt"),
            &PathBuf::from("/w/out"),
        );
        assert_eq!(
            args,
            vec!["-m", "pip", "wheel", "--wheel-dir", "/w/out", "-r", "/w/requirements.txt"]
        );
    }

    #[test]
    fn sdist_built_directly() {
        let args = PipToolchain::wheel_args(
            &PathBuf::from("/w/numpy-1.15.0.tar.gz"),
            &PathBuf::from("/w/out"),
        );
        assert_eq!(args.last().unwrap(), "/w/numpy-1.15.0.tar.gz");
        assert!(!args.contains(&"-r".to_string()));
    }

    #[test]
    fn interpreter_from_config() {
        let mut config = WorkerConfig::default();
        config.python.insert("py36".to_string(), "/opt/python/bin/python3".to_string());
        config.python.remove("py27");
        let toolchain = PipToolchain::new(config);
        assert_eq!(toolchain.interpreter(Runtime::Py36), "/opt/python/bin/python3");
        assert_eq!(toolchain.interpreter(Runtime::Py27), "python2.7");
    }

    #[test]
    fn log_keeps_only_the_tail() {
        let mut log = BuildLog::new();
        for i in 0..80 {
            log.push(format!("line {i}"));
        }
        assert_eq!(log.len(), BUILD_ERROR_TAIL_LINES);
        let tail = log.tail();
        assert_eq!(tail.lines().count(), BUILD_ERROR_TAIL_LINES);
        assert!(tail.starts_with("line 30"));
        assert!(tail.ends_with("line 79"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_step_is_build_failure_with_output() {
        let toolchain = toolchain(vec!["sh", "-c", "echo 'No package gcc available'; exit 1"]);
        let mut log = BuildLog::new();
        let err = toolchain
            .stage(Runtime::Py36, &[], &mut log)
            .await
            .unwrap_err();
        match err {
            VendError::BuildFailure { diagnostic, .. } => {
                assert!(diagnostic.contains("No package gcc available"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_program_is_build_failure() {
        let toolchain = toolchain(vec!["/nonexistent/yum"]);
        let mut log = BuildLog::new();
        assert!(matches!(
            toolchain.stage(Runtime::Py36, &[], &mut log).await,
            Err(VendError::BuildFailure { .. })
        ));
    }
}
