//! Key layout of the artifact store
//!
//! ```text
//! <prefix>builds/<fingerprint>/<wheel file>      built artifacts
//! <prefix>builds/<fingerprint>/manifest.json     completion record
//! <prefix>builds/<fingerprint>/.reservation      in-flight marker
//! <prefix>builds/<fingerprint>/.failed           failure marker
//! <prefix>sources/<fingerprint>/requirements.txt build input
//! ```

use crate::cache::Fingerprint;

pub const MANIFEST_NAME: &str = "manifest.json";
pub const RESERVATION_NAME: &str = ".reservation";
pub const FAILURE_NAME: &str = ".failed";
pub const BUILD_INPUT_NAME: &str = "requirements.txt";

/// Computes store keys under a deployment prefix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreLayout {
    prefix: String,
}

impl StoreLayout {
    /// `prefix` may be empty; otherwise it is normalized to end in `/`
    pub fn new(prefix: impl AsRef<str>) -> Self {
        let trimmed = prefix.as_ref().trim_matches('/');
        let prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("{trimmed}/")
        };
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn builds_root(&self) -> String {
        format!("{}builds/", self.prefix)
    }

    /// Destination prefix of one build, ends in `/`
    pub fn build_prefix(&self, fp: &Fingerprint) -> String {
        format!("{}builds/{}/", self.prefix, fp)
    }

    pub fn manifest_key(&self, fp: &Fingerprint) -> String {
        format!("{}{}", self.build_prefix(fp), MANIFEST_NAME)
    }

    pub fn reservation_key(&self, fp: &Fingerprint) -> String {
        format!("{}{}", self.build_prefix(fp), RESERVATION_NAME)
    }

    pub fn failure_key(&self, fp: &Fingerprint) -> String {
        format!("{}{}", self.build_prefix(fp), FAILURE_NAME)
    }

    pub fn artifact_key(&self, fp: &Fingerprint, file_name: &str) -> String {
        format!("{}{}", self.build_prefix(fp), file_name)
    }

    /// Base prefix holding a build's input archive, ends in `/`
    pub fn source_base(&self, fp: &Fingerprint) -> String {
        format!("{}sources/{}/", self.prefix, fp)
    }

    pub fn source_key(&self, fp: &Fingerprint) -> String {
        format!("{}{}", self.source_base(fp), BUILD_INPUT_NAME)
    }

    /// Fingerprint named by a key under `builds/`, if any
    pub fn fingerprint_of(&self, key: &str) -> Option<Fingerprint> {
        let rest = key.strip_prefix(&self.builds_root())?;
        let (fp, _) = rest.split_once('/')?;
        fp.parse().ok()
    }

    /// Whether a file name inside a build prefix is bookkeeping, not an artifact
    pub fn is_bookkeeping(file_name: &str) -> bool {
        file_name == MANIFEST_NAME || file_name.starts_with('.')
    }
}
