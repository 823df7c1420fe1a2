//! Wheel filename parsing (PEP 427)
//!
//! `{distribution}-{version}(-{build})?-{python}-{abi}-{platform}.whl`

use crate::request::normalize_name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelFilename {
    /// Normalized distribution name
    pub name: String,
    pub version: String,
    pub build: Option<String>,
    pub python_tag: String,
    pub abi_tag: String,
    pub platform_tag: String,
}

impl WheelFilename {
    /// Parse a wheel file name; `None` if it is not one
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".whl")?;
        let parts: Vec<&str> = stem.split('-').collect();
        let (name, version, build, tags) = match parts.as_slice() {
            [name, version, python, abi, platform] => (name, version, None, [python, abi, platform]),
            [name, version, build, python, abi, platform] => {
                if !build.starts_with(|c: char| c.is_ascii_digit()) {
                    return None;
                }
                (name, version, Some(build.to_string()), [python, abi, platform])
            }
            _ => return None,
        };
        if name.is_empty() || version.is_empty() || tags.iter().any(|t| t.is_empty()) {
            return None;
        }
        Some(Self {
            name: normalize_name(name),
            version: version.to_string(),
            build,
            python_tag: tags[0].to_string(),
            abi_tag: tags[1].to_string(),
            platform_tag: tags[2].to_string(),
        })
    }

    /// Pure-Python wheel, usable on any platform
    pub fn is_pure(&self) -> bool {
        self.abi_tag == "none" && self.platform_tag == "any"
    }
}
