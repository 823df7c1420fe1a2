//! Integration tests for wheelvend

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    const NUMPY_FINGERPRINT_INPUT: [&str; 3] = ["fingerprint", "3", "numpy==1.15.0"];

    /// Isolated home, config and store for one test
    struct Sandbox {
        dir: TempDir,
    }

    impl Sandbox {
        fn new() -> Self {
            let sandbox = Self {
                dir: TempDir::new().unwrap(),
            };
            sandbox.write_config("");
            sandbox
        }

        fn config_path(&self) -> PathBuf {
            self.dir.path().join("config.toml")
        }

        fn store_root(&self) -> PathBuf {
            self.dir.path().join("store")
        }

        /// Write a config with the sandbox store and no toolchain install
        fn write_config(&self, extra: &str) {
            let config = format!(
                "[store]\nroot = {:?}\nprefix = \"test\"\n\n\
                 [build]\ndeadline_secs = 60\npoll_initial_ms = 20\npoll_max_ms = 200\n\n\
                 [worker]\ntoolchain_install = []\n{}",
                self.store_root().display().to_string(),
                extra
            );
            std::fs::write(self.config_path(), config).unwrap();
        }

        fn cmd(&self) -> Command {
            let home = self.dir.path().join("home");
            let mut cmd = cargo_bin_cmd!("wheelvend");
            cmd.env("HOME", &home)
                .env("XDG_CONFIG_HOME", home.join(".config"))
                .env("XDG_STATE_HOME", home.join(".local/state"))
                .env("XDG_DATA_HOME", home.join(".local/share"))
                .env("WHEELVEND_CONFIG", self.config_path())
                .env_remove("RUST_LOG");
            cmd
        }
    }

    #[test]
    fn help_displays() {
        Sandbox::new()
            .cmd()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("binary wheels for sandboxed Python"));
    }

    #[test]
    fn version_displays() {
        Sandbox::new()
            .cmd()
            .arg("version")
            .assert()
            .success()
            .stdout(predicate::str::starts_with("wheelvend "));
    }

    #[test]
    fn version_json() {
        Sandbox::new()
            .cmd()
            .args(["version", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains(format!(
                "{{\"version\":\"{}\"}}",
                env!("CARGO_PKG_VERSION")
            )));
    }

    #[test]
    fn fingerprint_is_stable() {
        let sandbox = Sandbox::new();
        let first = sandbox
            .cmd()
            .args(NUMPY_FINGERPRINT_INPUT)
            .output()
            .unwrap();
        let second = sandbox
            .cmd()
            .args(["fingerprint", "3", "NumPy == 1.15.0"])
            .output()
            .unwrap();

        assert!(first.status.success());
        let fp = String::from_utf8(first.stdout).unwrap();
        assert_eq!(fp.trim().len(), 32);
        assert_eq!(fp, String::from_utf8(second.stdout).unwrap());
    }

    #[test]
    fn fingerprint_depends_on_extras() {
        let sandbox = Sandbox::new();
        let plain = sandbox.cmd().args(NUMPY_FINGERPRINT_INPUT).output().unwrap();
        let with_extra = sandbox
            .cmd()
            .args(NUMPY_FINGERPRINT_INPUT)
            .args(["--extra", "atlas-devel"])
            .output()
            .unwrap();
        assert_ne!(plain.stdout, with_extra.stdout);
    }

    #[test]
    fn vend_rejects_unknown_runtime() {
        let sandbox = Sandbox::new();
        sandbox
            .cmd()
            .args(["vend", "4", "numpy==1.15.0", "--json"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("\"error\": \"invalid_request\""));

        assert!(!sandbox.store_root().join("test/builds").exists());
    }

    #[test]
    fn config_path_honours_override() {
        let sandbox = Sandbox::new();
        sandbox
            .cmd()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        Sandbox::new()
            .cmd()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[build]"))
            .stdout(predicate::str::contains("prefix = \"test\""));
    }

    #[test]
    fn config_init_refuses_overwrite() {
        let sandbox = Sandbox::new();
        sandbox
            .cmd()
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--force"));

        sandbox
            .cmd()
            .args(["config", "init", "--force"])
            .assert()
            .success();
        let written = std::fs::read_to_string(sandbox.config_path()).unwrap();
        assert!(written.contains("max_lifetime_secs = 900"));
    }

    #[test]
    fn cache_list_empty() {
        Sandbox::new()
            .cmd()
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No builds found"));
    }

    #[test]
    fn cache_show_rejects_bad_fingerprint() {
        Sandbox::new()
            .cmd()
            .args(["cache", "show", "not-a-fingerprint"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn worker_without_parameters_fails() {
        Sandbox::new()
            .cmd()
            .arg("worker")
            .assert()
            .failure()
            .stderr(predicate::str::contains("WHEELVEND_RUNTIME"));
    }

    /// Interpreter stand-in: `-m pip install` succeeds, `-m pip wheel`
    /// drops a wheel into `--wheel-dir`
    #[cfg(unix)]
    fn fake_python(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-python");
        let script = r#"#!/bin/sh
if [ "$3" = "wheel" ]; then
    echo "Building wheels for collected packages: six"
    printf 'wheel' > "$5/six-1.11.0-py2.py3-none-any.whl"
fi
exit 0
"#;
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn vend_builds_once_then_serves_from_cache() {
        let sandbox = Sandbox::new();
        let python = fake_python(sandbox.dir.path());
        sandbox.write_config(&format!(
            "\n[worker.python]\npy36 = {:?}\n",
            python.display().to_string()
        ));

        sandbox
            .cmd()
            .args(["vend", "3", "six==1.11.0", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"artifactLocation\""))
            .stdout(predicate::str::contains("\"name\": \"six\""));

        // The wheel is now served without launching a worker
        std::fs::remove_file(&python).unwrap();
        sandbox
            .cmd()
            .args(["vend", "3", "six==1.11.0", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"version\": \"1.11.0\""));

        sandbox
            .cmd()
            .args(["cache", "list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"state\": \"ready\""));
    }

    #[cfg(unix)]
    #[test]
    fn vend_with_config_flag_reaches_worker() {
        let sandbox = Sandbox::new();
        let python = fake_python(sandbox.dir.path());
        sandbox.write_config(&format!(
            "\n[worker.python]\npy36 = {:?}\n",
            python.display().to_string()
        ));

        sandbox
            .cmd()
            .env_remove("WHEELVEND_CONFIG")
            .arg("-c")
            .arg(sandbox.config_path())
            .args(["vend", "3", "six==1.11.0", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"name\": \"six\""));

        assert!(sandbox.store_root().join("test/builds").exists());
    }

    #[cfg(unix)]
    #[test]
    fn failed_build_reports_diagnostic() {
        let sandbox = Sandbox::new();
        sandbox.write_config(
            "\n[worker.python]\npy36 = \"/nonexistent/python3.6\"\n",
        );

        sandbox
            .cmd()
            .args(["vend", "3", "six==1.11.0", "--json"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("\"error\": \"build_failure\""));
    }
}
