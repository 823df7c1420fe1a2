//! Request fingerprinting for content-addressed build caching
//!
//! Canonicalizes a build request and hashes it into a cache key.
//! Same canonical request = same fingerprint, on any machine, forever.

use crate::error::{VendError, VendResult};
use crate::request::BuildRequest;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Bumped whenever the canonical form changes
const FINGERPRINT_DOMAIN: &str = "wheelvend-build:v1";

/// Number of digest bytes kept (32 hex characters)
const FINGERPRINT_BYTES: usize = 16;

/// Deterministic cache key of a build request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a build request
    pub fn of(request: &BuildRequest) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_DOMAIN.as_bytes());
        hasher.update(b"\n");
        hasher.update(b"runtime:");
        hasher.update(request.runtime().tag().as_bytes());
        hasher.update(b"\n");
        for req in request.canonical_requirements() {
            hasher.update(b"req:");
            hasher.update(req.as_bytes());
            hasher.update(b"\n");
        }
        for package in request.extra_system_packages() {
            hasher.update(b"sys:");
            hasher.update(package.as_bytes());
            hasher.update(b"\n");
        }
        let digest = hasher.finalize();

        Self(hex::encode(&digest[..FINGERPRINT_BYTES]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = VendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == FINGERPRINT_BYTES * 2
            && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(VendError::InvalidRequest(format!("not a fingerprint: '{s}'")))
        }
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = VendError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

/// Fingerprint a request (free-function form)
pub fn fingerprint(request: &BuildRequest) -> Fingerprint {
    Fingerprint::of(request)
}

/// Parse a fingerprint given on the command line
pub fn parse_fingerprint(s: &str) -> VendResult<Fingerprint> {
    s.trim().parse()
}
