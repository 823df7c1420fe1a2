//! Region to build image table
//!
//! Each deployment region maps runtime tags to a compatible build image.
//! The `*` region is the fallback for regions without their own entry.

use crate::error::{VendError, VendResult};
use crate::request::Runtime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fallback region key
pub const ANY_REGION: &str = "*";

/// `region -> runtime tag -> image`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageTable(BTreeMap<String, BTreeMap<String, String>>);

impl Default for ImageTable {
    fn default() -> Self {
        let mut any = BTreeMap::new();
        any.insert(
            Runtime::Py27.tag().to_string(),
            "docker.io/lambci/lambda:build-python2.7".to_string(),
        );
        any.insert(
            Runtime::Py36.tag().to_string(),
            "docker.io/lambci/lambda:build-python3.6".to_string(),
        );
        let mut table = BTreeMap::new();
        table.insert(ANY_REGION.to_string(), any);
        Self(table)
    }
}

impl ImageTable {
    /// Empty table (no fallback)
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Set the image of a region and runtime tag
    pub fn insert(&mut self, region: &str, tag: &str, image: impl Into<String>) {
        self.0
            .entry(region.to_string())
            .or_default()
            .insert(tag.to_string(), image.into());
    }

    /// Image for `region`/`tag`, falling back to the `*` region
    pub fn get(&self, region: &str, tag: &str) -> Option<&str> {
        self.0
            .get(region)
            .and_then(|images| images.get(tag))
            .or_else(|| self.0.get(ANY_REGION).and_then(|images| images.get(tag)))
            .map(String::as_str)
    }

    /// Image for a runtime, or a provisioning error naming what is missing
    pub fn select(&self, region: &str, runtime: Runtime) -> VendResult<String> {
        self.get(region, runtime.tag())
            .map(str::to_string)
            .ok_or_else(|| {
                VendError::provision(format!(
                    "no build image configured for {} in region {}",
                    runtime, region
                ))
            })
    }

    /// Regions with explicit entries
    pub fn regions(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_entry_wins_over_fallback() {
        let mut table = ImageTable::default();
        table.insert("eu-west-1", "py36", "registry.example/build:py36");
        assert_eq!(
            table.get("eu-west-1", "py36"),
            Some("registry.example/build:py36")
        );
        assert_eq!(
            table.get("eu-west-1", "py27"),
            Some("docker.io/lambci/lambda:build-python2.7")
        );
        assert_eq!(
            table.get("us-east-1", "py36"),
            Some("docker.io/lambci/lambda:build-python3.6")
        );
    }

    #[test]
    fn missing_image_is_provision_failure() {
        let table = ImageTable::empty();
        assert!(matches!(
            table.select("us-east-1", Runtime::Py36),
            Err(VendError::ProvisionFailure { .. })
        ));
    }

    #[test]
    fn parses_from_toml() {
        let table: ImageTable = toml::from_str(
            r#"
            [us-west-2]
            py27 = "a"
            py36 = "b"
            "#,
        )
        .unwrap();
        assert_eq!(table.get("us-west-2", "py36"), Some("b"));
        assert_eq!(table.regions().collect::<Vec<_>>(), vec!["us-west-2"]);
    }
}
