//! Worker bootstrap parameters
//!
//! Passed to a worker at launch as environment variables, the same way for
//! every provisioning backend.

use crate::cache::Fingerprint;
use crate::error::{VendError, VendResult};
use crate::request::Runtime;
use crate::store::StoreLayout;
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

pub const ENV_RUNTIME: &str = "WHEELVEND_RUNTIME";
pub const ENV_PYTHON_VERSION: &str = "WHEELVEND_PYTHON_VERSION";
pub const ENV_EXTRA_PACKAGES: &str = "WHEELVEND_EXTRA_PACKAGES";
pub const ENV_SOURCE_BASE: &str = "WHEELVEND_SOURCE_BASE";
pub const ENV_ARCHIVE_NAME: &str = "WHEELVEND_ARCHIVE_NAME";
pub const ENV_DESTINATION_PREFIX: &str = "WHEELVEND_DESTINATION_PREFIX";
pub const ENV_WORKER_ID: &str = "WHEELVEND_WORKER_ID";
pub const ENV_MAX_LIFETIME_SECS: &str = "WHEELVEND_MAX_LIFETIME_SECS";
pub const ENV_STORE_ROOT: &str = "WHEELVEND_STORE_ROOT";

/// Everything a worker needs to run one build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapParams {
    /// Selects the toolchain and interpreter
    pub runtime: Runtime,
    /// OS packages installed before the build
    pub extra_packages: Vec<String>,
    /// Store prefix holding the build input, ends in `/`
    pub source_base: String,
    /// File name of the build input under `source_base`
    pub archive_name: String,
    /// Store prefix receiving artifacts and the manifest, ends in `/`
    pub destination_prefix: String,
    /// Owner id of the reservation the worker runs under
    pub worker_id: Uuid,
    pub max_lifetime_secs: u64,
    /// Filesystem store root as seen by the worker
    pub store_root: Option<PathBuf>,
}

impl BootstrapParams {
    /// Environment variables carrying the parameters
    pub fn to_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(ENV_RUNTIME.to_string(), self.runtime.tag().to_string());
        env.insert(
            ENV_PYTHON_VERSION.to_string(),
            self.runtime.python_version().to_string(),
        );
        env.insert(ENV_EXTRA_PACKAGES.to_string(), self.extra_packages.join(","));
        env.insert(ENV_SOURCE_BASE.to_string(), self.source_base.clone());
        env.insert(ENV_ARCHIVE_NAME.to_string(), self.archive_name.clone());
        env.insert(
            ENV_DESTINATION_PREFIX.to_string(),
            self.destination_prefix.clone(),
        );
        env.insert(ENV_WORKER_ID.to_string(), self.worker_id.to_string());
        env.insert(
            ENV_MAX_LIFETIME_SECS.to_string(),
            self.max_lifetime_secs.to_string(),
        );
        if let Some(ref root) = self.store_root {
            env.insert(ENV_STORE_ROOT.to_string(), root.display().to_string());
        }
        env
    }

    /// Read parameters from the process environment
    pub fn from_env() -> VendResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read parameters through an arbitrary lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> VendResult<Self> {
        let required = |key: &'static str| -> VendResult<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(VendError::MissingParameter(key))
        };

        let runtime: Runtime = required(ENV_RUNTIME)?.parse()?;
        if let Some(version) = lookup(ENV_PYTHON_VERSION) {
            if version != runtime.python_version() {
                return Err(VendError::InvalidRequest(format!(
                    "{ENV_PYTHON_VERSION}={version} does not match runtime {runtime}"
                )));
            }
        }

        let extra_packages = lookup(ENV_EXTRA_PACKAGES)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();

        let worker_id = required(ENV_WORKER_ID)?
            .parse::<Uuid>()
            .map_err(|e| VendError::InvalidRequest(format!("{ENV_WORKER_ID}: {e}")))?;

        let max_lifetime_secs = required(ENV_MAX_LIFETIME_SECS)?
            .parse::<u64>()
            .map_err(|e| VendError::InvalidRequest(format!("{ENV_MAX_LIFETIME_SECS}: {e}")))?;

        let params = Self {
            runtime,
            extra_packages,
            source_base: required(ENV_SOURCE_BASE)?,
            archive_name: required(ENV_ARCHIVE_NAME)?,
            destination_prefix: required(ENV_DESTINATION_PREFIX)?,
            worker_id,
            max_lifetime_secs,
            store_root: lookup(ENV_STORE_ROOT).map(PathBuf::from),
        };
        params.layout()?;
        Ok(params)
    }

    /// Fingerprint named by the destination prefix
    pub fn fingerprint(&self) -> VendResult<Fingerprint> {
        self.destination_prefix
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .parse()
    }

    /// Store layout the destination prefix was derived from
    pub fn layout(&self) -> VendResult<StoreLayout> {
        let fp = self.fingerprint()?;
        let suffix = format!("builds/{}/", fp);
        let prefix = self
            .destination_prefix
            .strip_suffix(&suffix)
            .ok_or_else(|| {
                VendError::InvalidRequest(format!(
                    "destination prefix '{}' is not a build prefix",
                    self.destination_prefix
                ))
            })?;
        let layout = StoreLayout::new(prefix);
        if layout.build_prefix(&fp) != self.destination_prefix {
            return Err(VendError::InvalidRequest(format!(
                "destination prefix '{}' is not normalized",
                self.destination_prefix
            )));
        }
        Ok(layout)
    }

    /// Store key of the build input
    pub fn source_key(&self) -> String {
        format!("{}{}", self.source_base, self.archive_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> BootstrapParams {
        let fp: Fingerprint = "00112233445566778899aabbccddeeff".parse().unwrap();
        let layout = StoreLayout::new("prod");
        BootstrapParams {
            runtime: Runtime::Py36,
            extra_packages: vec!["atlas-devel".to_string(), "gcc".to_string()],
            source_base: layout.source_base(&fp),
            archive_name: "requirements.txt".to_string(),
            destination_prefix: layout.build_prefix(&fp),
            worker_id: Uuid::new_v4(),
            max_lifetime_secs: 900,
            store_root: Some(PathBuf::from("/store")),
        }
    }

    #[test]
    fn env_roundtrip() {
        let original = params();
        let env = original.to_env();
        assert_eq!(env[ENV_PYTHON_VERSION], "36");
        assert_eq!(env[ENV_EXTRA_PACKAGES], "atlas-devel,gcc");

        let parsed = BootstrapParams::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn missing_parameter_is_named() {
        let mut env = params().to_env();
        env.remove(ENV_DESTINATION_PREFIX);
        let err = BootstrapParams::from_lookup(|k| env.get(k).cloned()).unwrap_err();
        assert!(matches!(err, VendError::MissingParameter(ENV_DESTINATION_PREFIX)));
    }

    #[test]
    fn mismatched_python_version_rejected() {
        let mut env = params().to_env();
        env.insert(ENV_PYTHON_VERSION.to_string(), "27".to_string());
        assert!(BootstrapParams::from_lookup(|k| env.get(k).cloned()).is_err());
    }

    #[test]
    fn layout_recovered_from_destination() {
        let p = params();
        let layout = p.layout().unwrap();
        assert_eq!(layout.prefix(), "prod/");
        assert_eq!(p.source_key(), layout.source_key(&p.fingerprint().unwrap()));
    }

    #[test]
    fn foreign_destination_rejected() {
        let mut p = params();
        p.destination_prefix = "elsewhere/00112233445566778899aabbccddeeff/".to_string();
        assert!(p.layout().is_err());
    }

    #[test]
    #[serial_test::serial]
    fn from_process_environment() {
        let original = params();
        let env = original.to_env();
        for (key, value) in &env {
            std::env::set_var(key, value);
        }
        let parsed = BootstrapParams::from_env();
        for key in env.keys() {
            std::env::remove_var(key);
        }
        assert_eq!(parsed.unwrap(), original);
    }
}
