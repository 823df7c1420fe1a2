//! Build requests
//!
//! A `VendRequest` is what a caller sends; validating it yields an
//! immutable `BuildRequest` that the rest of the pipeline works with.

pub mod requirement;

pub use requirement::{normalize_name, split_specification, Requirement};

use crate::error::{VendError, VendResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Supported interpreter tracks of the target sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    /// CPython 2.7
    Py27,
    /// CPython 3.6
    Py36,
}

impl Runtime {
    /// Tag used in fingerprints, image tables and config keys
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Py27 => "py27",
            Self::Py36 => "py36",
        }
    }

    /// `major minor` digits, e.g. `36`
    pub fn python_version(&self) -> &'static str {
        match self {
            Self::Py27 => "27",
            Self::Py36 => "36",
        }
    }

    /// Default interpreter executable
    pub fn interpreter(&self) -> &'static str {
        match self {
            Self::Py27 => "python2.7",
            Self::Py36 => "python3.6",
        }
    }

    /// All runtimes
    pub fn all() -> &'static [Self] {
        &[Self::Py27, Self::Py36]
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl FromStr for Runtime {
    type Err = VendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "2" | "2.7" | "27" | "py27" | "python2.7" => Ok(Self::Py27),
            "3" | "3.6" | "36" | "py36" | "python3.6" => Ok(Self::Py36),
            other => Err(VendError::UnsupportedRuntime(other.to_string())),
        }
    }
}

fn system_package_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._+:-]*$").expect("system package regex is valid")
    })
}

/// A request as received from a caller, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VendRequest {
    /// Runtime selector (`2`, `3`, `py36`, ...)
    pub runtime: String,
    /// Requirement specifiers; each entry may hold several separated by `/` or spaces
    pub requirements: Vec<String>,
    /// Extra OS packages installed before the build
    pub extra_system_packages: Vec<String>,
    /// Only report platform-specific wheels in the response
    pub minimal: bool,
}

impl VendRequest {
    pub fn new(runtime: impl Into<String>, requirements: Vec<String>) -> Self {
        Self {
            runtime: runtime.into(),
            requirements,
            ..Self::default()
        }
    }

    pub fn with_extras(mut self, extras: Vec<String>) -> Self {
        self.extra_system_packages = extras;
        self
    }

    pub fn with_minimal(mut self, minimal: bool) -> Self {
        self.minimal = minimal;
        self
    }

    /// Validate into a `BuildRequest`
    pub fn validate(&self) -> VendResult<BuildRequest> {
        let runtime: Runtime = self.runtime.parse()?;
        let requirements = self
            .requirements
            .iter()
            .flat_map(|raw| split_specification(raw))
            .map(|spec| Requirement::parse(&spec))
            .collect::<VendResult<Vec<_>>>()?;
        BuildRequest::new(runtime, requirements, self.extra_system_packages.clone())
    }
}

/// A validated, immutable build request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    runtime: Runtime,
    requirements: Vec<Requirement>,
    extra_system_packages: BTreeSet<String>,
}

impl BuildRequest {
    /// Create a build request, validating the extra system packages
    pub fn new(
        runtime: Runtime,
        requirements: Vec<Requirement>,
        extra_system_packages: impl IntoIterator<Item = String>,
    ) -> VendResult<Self> {
        if requirements.is_empty() {
            return Err(VendError::InvalidRequest(
                "at least one requirement is needed".to_string(),
            ));
        }

        let mut extras = BTreeSet::new();
        for package in extra_system_packages {
            let package = package.trim().to_string();
            if package.is_empty() {
                continue;
            }
            if !system_package_re().is_match(&package) {
                return Err(VendError::InvalidRequest(format!(
                    "invalid system package name '{package}'"
                )));
            }
            extras.insert(package);
        }

        Ok(Self {
            runtime,
            requirements,
            extra_system_packages: extras,
        })
    }

    pub fn runtime(&self) -> Runtime {
        self.runtime
    }

    /// Requirements in the order they were received
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Sorted extra system packages
    pub fn extra_system_packages(&self) -> impl Iterator<Item = &str> {
        self.extra_system_packages.iter().map(String::as_str)
    }

    /// Canonical requirement strings, sorted and deduplicated
    pub fn canonical_requirements(&self) -> Vec<String> {
        let mut reqs: Vec<String> = self.requirements.iter().map(ToString::to_string).collect();
        reqs.sort();
        reqs.dedup();
        reqs
    }

    /// The build input handed to the worker, in requirements-file format
    pub fn requirements_txt(&self) -> String {
        let mut out = String::new();
        for req in self.canonical_requirements() {
            out.push_str(&req);
            out.push('\n');
        }
        out
    }
}
