//! Requirement specifier parsing and canonical form
//!
//! Accepts a permissive subset of PEP 508: a distribution name, optional
//! extras, optional comma-separated version clauses (optionally wrapped in
//! parentheses) and an optional environment marker after `;`.

use crate::error::{VendError, VendResult};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

fn requirement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<name>[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?:\[(?P<extras>[^\]]*)\])?\s*(?P<spec>[^;]*?)\s*(?:;(?P<marker>.*))?$",
        )
        .expect("requirement regex is valid")
    })
}

fn clause_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<op>===|==|~=|!=|<=|>=|<|>)\s*(?P<version>[A-Za-z0-9.*+!_-]+)$")
            .expect("clause regex is valid")
    })
}

fn extra_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?$").expect("extra regex is valid")
    })
}

/// Normalize a distribution or extra name (PEP 503): lowercase, with runs
/// of `-`, `_` and `.` collapsed to a single `-`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                out.push('-');
            }
            in_separator = true;
        } else {
            out.extend(c.to_lowercase());
            in_separator = false;
        }
    }
    out
}

/// A validated requirement in canonical form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Requirement {
    name: String,
    extras: Vec<String>,
    clauses: Vec<String>,
    marker: Option<String>,
}

impl Requirement {
    /// Parse and canonicalize a single requirement string
    pub fn parse(raw: &str) -> VendResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(VendError::InvalidRequest(
                "empty requirement specifier".to_string(),
            ));
        }

        let caps = requirement_re()
            .captures(trimmed)
            .ok_or_else(|| invalid(raw, "not a package specifier"))?;

        let name = normalize_name(&caps["name"]);

        let mut extras = Vec::new();
        if let Some(list) = caps.name("extras") {
            for extra in list.as_str().split(',').map(str::trim) {
                if extra.is_empty() {
                    continue;
                }
                if !extra_re().is_match(extra) {
                    return Err(invalid(raw, &format!("bad extra '{extra}'")));
                }
                extras.push(normalize_name(extra));
            }
        }
        extras.sort();
        extras.dedup();

        let clauses = parse_clauses(raw, caps.name("spec").map_or("", |m| m.as_str()))?;

        let marker = match caps.name("marker") {
            Some(m) => {
                let collapsed = m.as_str().split_whitespace().collect::<Vec<_>>().join(" ");
                if collapsed.is_empty() {
                    return Err(invalid(raw, "empty environment marker"));
                }
                Some(collapsed)
            }
            None => None,
        };

        Ok(Self {
            name,
            extras,
            clauses,
            marker,
        })
    }

    /// Normalized distribution name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normalized, sorted extras
    pub fn extras(&self) -> &[String] {
        &self.extras
    }

    /// Sorted version clauses without whitespace (e.g. `<2`, `>=1.0`)
    pub fn clauses(&self) -> &[String] {
        &self.clauses
    }

    /// Pinned version if the requirement is an exact `==` pin
    pub fn pinned_version(&self) -> Option<&str> {
        match self.clauses.as_slice() {
            [only] => only.strip_prefix("==").filter(|v| !v.starts_with('=')),
            _ => None,
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        write!(f, "{}", self.clauses.join(","))?;
        if let Some(ref marker) = self.marker {
            write!(f, "; {}", marker)?;
        }
        Ok(())
    }
}

fn parse_clauses(raw: &str, spec: &str) -> VendResult<Vec<String>> {
    let mut spec = spec.trim();
    if let Some(inner) = spec.strip_prefix('(') {
        spec = inner
            .strip_suffix(')')
            .ok_or_else(|| invalid(raw, "unbalanced parentheses"))?
            .trim();
    }
    if spec.is_empty() {
        return Ok(vec![]);
    }

    let mut clauses = Vec::new();
    for clause in spec.split(',').map(str::trim) {
        let caps = clause_re()
            .captures(clause)
            .ok_or_else(|| invalid(raw, &format!("bad version clause '{clause}'")))?;
        clauses.push(format!("{}{}", &caps["op"], &caps["version"]));
    }
    clauses.sort();
    clauses.dedup();
    Ok(clauses)
}

fn invalid(raw: &str, reason: &str) -> VendError {
    VendError::InvalidRequest(format!("'{}': {}", raw.trim(), reason))
}

/// A token starting with one of these continues the previous specifier
const LEADING_JOINERS: &[char] = &['=', '<', '>', '!', '~', ',', '(', '['];
/// A specifier ending in one of these continues with the next token
const TRAILING_JOINERS: &[char] = &['=', '<', '>', '!', '~', ','];

/// Split a raw requirement specification into individual specifiers.
///
/// Specifiers are separated by `/` (the path form used by
/// `/3/vend/numpy==1.15.0/scipy`) or by whitespace. Whitespace next to an
/// operator or comma, or inside an open `[` or `(`, does not start a new
/// specifier, so `numpy == 1.15.0 six` yields two. A segment containing a `;` marker is
/// kept whole. Percent-escapes such as `%20` are decoded per segment; `+`
/// stays literal since local versions (`1.0+cpu`) use it.
pub fn split_specification(raw: &str) -> Vec<String> {
    let mut specs = Vec::new();

    for segment in raw.split('/') {
        let segment = percent_decode(segment);
        if segment.contains(';') {
            let whole = segment.trim();
            if !whole.is_empty() {
                specs.push(whole.to_string());
            }
            continue;
        }

        let mut current = String::new();
        for token in segment.split_whitespace() {
            let joins = !current.is_empty()
                && (open_brackets(&current) > 0
                    || token.starts_with(LEADING_JOINERS)
                    || current.ends_with(TRAILING_JOINERS));
            if joins {
                current.push_str(token);
            } else {
                if !current.is_empty() {
                    specs.push(std::mem::take(&mut current));
                }
                current.push_str(token);
            }
        }
        if !current.is_empty() {
            specs.push(current);
        }
    }

    specs
}

/// Brackets and parentheses opened but not yet closed
fn open_brackets(text: &str) -> i32 {
    text.chars().fold(0, |depth, c| match c {
        '[' | '(' => depth + 1,
        ']' | ')' => depth - 1,
        _ => depth,
    })
}

/// Decode `%XX` escapes. Malformed escapes are kept as written.
fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let (hi, lo) = (bytes[i + 1], bytes[i + 2]);
            if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() {
                out.push((hex_value(hi) << 4) | hex_value(lo));
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_separators() {
        assert_eq!(normalize_name("Foo_Bar"), "foo-bar");
        assert_eq!(normalize_name("zope.interface"), "zope-interface");
        assert_eq!(normalize_name("a-_.b"), "a-b");
    }

    #[test]
    fn parse_pinned() {
        let req = Requirement::parse("numpy==1.15.0").unwrap();
        assert_eq!(req.name(), "numpy");
        assert_eq!(req.pinned_version(), Some("1.15.0"));
        assert_eq!(req.to_string(), "numpy==1.15.0");
    }

    #[test]
    fn parse_strips_whitespace_and_case() {
        let a = Requirement::parse("  NumPy == 1.15.0 ").unwrap();
        let b = Requirement::parse("numpy==1.15.0").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn clauses_are_sorted() {
        let a = Requirement::parse("six>=1.0,<2").unwrap();
        let b = Requirement::parse("six < 2, >= 1.0").unwrap();
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(a.to_string(), "six<2,>=1.0");
        assert_eq!(a.pinned_version(), None);
    }

    #[test]
    fn extras_are_normalized() {
        let req = Requirement::parse("requests[Socks, security]>=2").unwrap();
        assert_eq!(req.extras(), ["security", "socks"]);
        assert_eq!(req.to_string(), "requests[security,socks]>=2");
    }

    #[test]
    fn parenthesized_clauses() {
        let req = Requirement::parse("lxml (>=4.2)").unwrap();
        assert_eq!(req.to_string(), "lxml>=4.2");
    }

    #[test]
    fn marker_whitespace_collapsed() {
        let req = Requirement::parse("futures; python_version  <  \"3\"").unwrap();
        assert_eq!(req.to_string(), "futures; python_version < \"3\"");
    }

    #[test]
    fn rejects_malformed() {
        for raw in ["", "==1.0", "numpy=1.0", "numpy==", "numpy[bad extra]", "numpy (>=1", "-rfile"] {
            assert!(
                matches!(Requirement::parse(raw), Err(VendError::InvalidRequest(_))),
                "accepted {raw:?}"
            );
        }
    }

    #[test]
    fn split_path_form() {
        assert_eq!(
            split_specification("numpy==1.15.0/scipy  pandas"),
            vec!["numpy==1.15.0", "scipy", "pandas"]
        );
        assert!(split_specification(" / ").is_empty());
    }

    #[test]
    fn split_decodes_escapes() {
        assert_eq!(
            split_specification("numpy%3D%3D1.15.0%20six/torch==1.0+cpu"),
            vec!["numpy==1.15.0", "six", "torch==1.0+cpu"]
        );
        assert_eq!(split_specification("six%2"), vec!["six%2"]);
    }

    #[test]
    fn split_keeps_spaced_operators_together() {
        assert_eq!(
            split_specification("numpy == 1.15.0 six < 2, >= 1.0 lxml"),
            vec!["numpy==1.15.0", "six<2,>=1.0", "lxml"]
        );
        assert_eq!(
            split_specification("futures; python_version < \"3\""),
            vec!["futures; python_version < \"3\""]
        );
    }

    #[test]
    fn split_keeps_bracketed_extras_together() {
        assert_eq!(split_specification("requests[socks ]"), vec!["requests[socks]"]);
        assert_eq!(
            split_specification("requests [socks] six"),
            vec!["requests[socks]", "six"]
        );

        let specs = split_specification("requests[ socks , security ]");
        assert_eq!(specs.len(), 1);
        assert_eq!(
            Requirement::parse(&specs[0]).unwrap().to_string(),
            "requests[security,socks]"
        );
    }

    #[test]
    fn split_after_closing_parenthesis() {
        assert_eq!(
            split_specification("six ( >= 1.0 ) lxml"),
            vec!["six(>=1.0)", "lxml"]
        );
    }
}
