//! Build manifest (the cache entry of a fingerprint)
//!
//! Published exactly once, after every artifact is stored. Its presence is
//! the single commit point of a build.

use crate::cache::Fingerprint;
use crate::error::{VendError, VendResult};
use crate::request::Runtime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const CHECKSUM_PREFIX: &str = "sha256:";

/// Checksum string recorded for an artifact (`sha256:<hex>`)
pub fn checksum(data: &[u8]) -> String {
    format!("{}{}", CHECKSUM_PREFIX, hex::encode(Sha256::digest(data)))
}

/// One stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    /// Normalized distribution name
    pub package_name: String,
    /// Version the build tool resolved
    pub resolved_version: String,
    /// Store key of the wheel
    pub object_key: String,
    /// `sha256:<hex>` of the wheel bytes
    pub checksum: String,
    /// Size in bytes
    pub size: u64,
}

impl ArtifactRecord {
    /// Wheel file name (last key segment)
    pub fn file_name(&self) -> &str {
        self.object_key.rsplit('/').next().unwrap_or(&self.object_key)
    }

    /// Whether the wheel is pure Python (`*-none-any.whl`)
    pub fn is_pure(&self) -> bool {
        self.file_name().ends_with("-none-any.whl")
    }
}

/// Completion record of a build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub fingerprint: Fingerprint,
    pub runtime: Runtime,
    /// Canonical requirement strings the build was made from
    pub requirements: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Reservation owner that produced the build
    pub worker_id: Uuid,
    pub artifacts: Vec<ArtifactRecord>,
}

impl Manifest {
    pub fn new(
        fingerprint: Fingerprint,
        runtime: Runtime,
        requirements: Vec<String>,
        worker_id: Uuid,
        mut artifacts: Vec<ArtifactRecord>,
    ) -> Self {
        artifacts.sort_by(|a, b| a.object_key.cmp(&b.object_key));
        Self {
            fingerprint,
            runtime,
            requirements,
            created_at: Utc::now(),
            worker_id,
            artifacts,
        }
    }

    /// Check that the manifest belongs to `fingerprint` and every artifact
    /// lives under `build_prefix` with a well-formed checksum.
    pub fn validate(&self, fingerprint: &Fingerprint, build_prefix: &str) -> VendResult<()> {
        if &self.fingerprint != fingerprint {
            return Err(malformed(format!(
                "manifest is for {}, expected {}",
                self.fingerprint, fingerprint
            )));
        }
        if self.artifacts.is_empty() {
            return Err(malformed("manifest lists no artifacts"));
        }
        for artifact in &self.artifacts {
            if !artifact.object_key.starts_with(build_prefix) {
                return Err(malformed(format!(
                    "artifact {} is outside {}",
                    artifact.object_key, build_prefix
                )));
            }
            let digest_ok = artifact
                .checksum
                .strip_prefix(CHECKSUM_PREFIX)
                .is_some_and(|hex| hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit()));
            if !digest_ok {
                return Err(malformed(format!(
                    "artifact {} has malformed checksum",
                    artifact.object_key
                )));
            }
            if artifact.package_name.is_empty() || artifact.resolved_version.is_empty() {
                return Err(malformed(format!(
                    "artifact {} has no name or version",
                    artifact.object_key
                )));
            }
        }
        Ok(())
    }

    /// Artifacts, optionally restricted to platform-specific wheels
    pub fn artifacts(&self, native_only: bool) -> impl Iterator<Item = &ArtifactRecord> {
        self.artifacts
            .iter()
            .filter(move |a| !native_only || !a.is_pure())
    }

    /// Total size of all artifacts
    pub fn total_size(&self) -> u64 {
        self.artifacts.iter().map(|a| a.size).sum()
    }
}

fn malformed(reason: impl Into<String>) -> VendError {
    VendError::Internal(format!("malformed manifest: {}", reason.into()))
}
