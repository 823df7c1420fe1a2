//! Result assembly
//!
//! Folds completions and errors into the response a caller receives. An
//! in-progress build is its own variant, distinct from every error.

use crate::cache::{Fingerprint, Manifest};
use crate::error::VendError;
use serde::{Deserialize, Serialize};

/// A resolved `{name, version}` pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResolvedRequirement {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSet {
    /// Location of the fingerprint's build prefix, ends in `/`
    pub artifact_location: String,
    pub requirements: Vec<ResolvedRequirement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInProgress {
    pub status: String,
    pub fingerprint: String,
    pub message: String,
    pub retry_after_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Machine-readable kind, e.g. `build_failure`
    pub error: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Tail of the worker's build output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    #[serde(skip)]
    pub status: u16,
}

/// Response of one vend invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VendResponse {
    Ready(ArtifactSet),
    Building(BuildInProgress),
    Error(ErrorBody),
}

impl VendResponse {
    /// Success response for a manifest; `minimal` keeps native wheels only
    pub fn ready(manifest: &Manifest, artifact_location: String, minimal: bool) -> Self {
        let mut requirements: Vec<ResolvedRequirement> = manifest
            .artifacts(minimal)
            .map(|a| ResolvedRequirement {
                name: a.package_name.clone(),
                version: a.resolved_version.clone(),
            })
            .collect();
        requirements.sort();
        requirements.dedup();

        Self::Ready(ArtifactSet {
            artifact_location,
            requirements,
        })
    }

    pub fn building(fingerprint: &Fingerprint, retry_after_secs: u64) -> Self {
        Self::Building(BuildInProgress {
            status: "building".to_string(),
            fingerprint: fingerprint.to_string(),
            message: "The build is still in progress, retry the same request".to_string(),
            retry_after_secs: retry_after_secs.max(1),
        })
    }

    pub fn error(err: &VendError) -> Self {
        let (message, diagnostic) = match err {
            VendError::BuildFailure {
                summary,
                diagnostic,
            } => (
                format!("Build failed: {}", summary),
                Some(diagnostic.clone()).filter(|d| !d.is_empty()),
            ),
            other => (other.to_string(), None),
        };
        Self::Error(ErrorBody {
            error: err.kind().to_string(),
            message,
            retryable: err.is_retryable(),
            hint: err.hint().map(str::to_string),
            diagnostic,
            status: err.status_code(),
        })
    }

    /// HTTP-equivalent status code
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Ready(_) => 200,
            Self::Building(_) => 202,
            Self::Error(body) => body.status,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Response of the version query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
