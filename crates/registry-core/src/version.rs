//! Version constraint parsing and matching.
//!
//! Supported expressions:
//!
//! - `==1.2.3` (or `=1.2.3`, or bare `1.2.3`): exact match
//! - `>=1.2.0`, `>1.2.0`, `<=1.2.0`, `<1.2.0`, `!=1.2.0`: comparisons
//! - `^1.2.0`: same major (`>=1.2.0, <2.0.0`); zero majors tighten to the
//!   first non-zero component (`^0.2.3` is `>=0.2.3, <0.3.0`)
//! - `~1.2.0`: same major.minor (`>=1.2.0, <1.3.0`)
//! - `1.*`, `1.2.*`, `1.x`, `*`: wildcards over trailing components
//! - comma-separated compounds, all of which must hold: `>=1.0.0, <1.5.0`
//!
//! Comparisons follow semver precedence: pre-releases sort before their
//! release and build metadata is ignored. Upper bounds produced by `^`, `~`
//! and wildcards exclude pre-releases of the bound itself, so `^1.2.0` does
//! not admit `2.0.0-alpha`.
//!
//! # Examples
//!
//! ```
//! use registry_core::version::VersionConstraint;
//!
//! let constraint = VersionConstraint::parse("^1.2.0").unwrap();
//! assert!(constraint.satisfies("1.9.9"));
//! assert!(!constraint.satisfies("2.0.0"));
//!
//! let constraint = VersionConstraint::parse("~1.2.0").unwrap();
//! assert!(constraint.satisfies("1.2.9"));
//! assert!(!constraint.satisfies("1.3.0"));
//! ```

use std::cmp::Ordering;

use semver::{BuildMetadata, Prerelease, Version};

use crate::error::{Error, Result};

/// A single version comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    /// `>=`
    Gte,
    /// `>`
    Gt,
    /// `<=`
    Lte,
    /// `<`
    Lt,
    /// `==`
    Eq,
    /// `!=`
    Ne,
}

/// A single version specifier: an operator paired with a version.
#[derive(Debug, Clone)]
struct Specifier {
    op: CompareOp,
    version: Version,
}

impl Specifier {
    fn new(op: CompareOp, version: Version) -> Self {
        Self { op, version }
    }

    fn matches(&self, candidate: &Version) -> bool {
        let ord = compare_precedence(candidate, &self.version);
        match self.op {
            CompareOp::Gte => ord != Ordering::Less,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Lte => ord != Ordering::Greater,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
        }
    }
}

/// A parsed version constraint that can be checked against concrete versions.
///
/// Every operator is lowered to plain comparisons at parse time; a
/// constraint matches when all of its comparisons hold. `*` lowers to no
/// comparisons and matches everything.
#[derive(Debug, Clone)]
pub struct VersionConstraint {
    specifiers: Vec<Specifier>,
    /// The original constraint string for display.
    raw: String,
}

impl VersionConstraint {
    /// Parse a version constraint string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConstraint`] naming the offending expression
    /// for empty input, unknown operators or malformed versions.
    pub fn parse(constraint: &str) -> Result<Self> {
        let raw = constraint.trim().to_string();
        let mut specifiers = Vec::new();
        let mut seen_part = false;

        for part in raw.split(',').map(str::trim) {
            if part.is_empty() {
                continue;
            }
            seen_part = true;
            let lowered = parse_part(part).map_err(|reason| Error::InvalidConstraint {
                constraint: raw.clone(),
                reason,
            })?;
            specifiers.extend(lowered);
        }

        if !seen_part {
            return Err(Error::InvalidConstraint {
                constraint: raw,
                reason: "empty constraint".to_string(),
            });
        }

        Ok(Self { specifiers, raw })
    }

    /// Check if a `semver::Version` satisfies this constraint.
    pub fn matches(&self, version: &Version) -> bool {
        self.specifiers.iter().all(|spec| spec.matches(version))
    }

    /// Check if a version string satisfies this constraint.
    ///
    /// Returns `false` if the version string cannot be parsed.
    pub fn satisfies(&self, version: &str) -> bool {
        match normalize_version(version) {
            Ok(v) => self.matches(&v),
            Err(_) => false,
        }
    }

    /// Whether this constraint accepts every version.
    pub fn is_any(&self) -> bool {
        self.specifiers.is_empty()
    }

    /// Return the original constraint string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for VersionConstraint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Parse `constraint` and test it against `version` in one step.
pub fn matches(constraint: &str, version: &str) -> Result<bool> {
    let constraint = VersionConstraint::parse(constraint)?;
    Ok(constraint.matches(&parse_version(version)?))
}

/// Parse a concrete, fully specified semantic version.
pub fn parse_version(version: &str) -> Result<Version> {
    Version::parse(version.trim()).map_err(|source| Error::InvalidVersion {
        version: version.to_string(),
        source,
    })
}

/// Compare two versions by semver precedence.
///
/// Unlike `Version`'s `Ord`, build metadata does not participate.
pub fn compare_precedence(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch, &a.pre).cmp(&(b.major, b.minor, b.patch, &b.pre))
}

/// Compare only the numeric release triple, ignoring pre-release and build.
pub fn compare_release(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch).cmp(&(b.major, b.minor, b.patch))
}

/// A version as written in a constraint, possibly missing trailing parts.
#[derive(Debug)]
struct Partial {
    major: u64,
    minor: Option<u64>,
    patch: Option<u64>,
    pre: Prerelease,
}

impl Partial {
    fn floor(&self) -> Version {
        Version {
            major: self.major,
            minor: self.minor.unwrap_or(0),
            patch: self.patch.unwrap_or(0),
            pre: self.pre.clone(),
            build: BuildMetadata::EMPTY,
        }
    }
}

/// Lower one comma-separated part into comparisons.
fn parse_part(part: &str) -> std::result::Result<Vec<Specifier>, String> {
    if let Some(rest) = part.strip_prefix('^') {
        let partial = parse_partial(rest)?;
        let upper = caret_upper(&partial)?;
        return Ok(vec![
            Specifier::new(CompareOp::Gte, partial.floor()),
            Specifier::new(CompareOp::Lt, upper),
        ]);
    }
    if let Some(rest) = part.strip_prefix('~') {
        let partial = parse_partial(rest)?;
        let upper = match partial.minor {
            Some(minor) => exclusive_bound(partial.major, successor(minor)?, 0)?,
            None => exclusive_bound(successor(partial.major)?, 0, 0)?,
        };
        return Ok(vec![
            Specifier::new(CompareOp::Gte, partial.floor()),
            Specifier::new(CompareOp::Lt, upper),
        ]);
    }

    let (op, version_str) = if let Some(rest) = part.strip_prefix(">=") {
        (Some(CompareOp::Gte), rest)
    } else if let Some(rest) = part.strip_prefix("<=") {
        (Some(CompareOp::Lte), rest)
    } else if let Some(rest) = part.strip_prefix("!=") {
        (Some(CompareOp::Ne), rest)
    } else if let Some(rest) = part.strip_prefix("==") {
        (Some(CompareOp::Eq), rest)
    } else if let Some(rest) = part.strip_prefix('>') {
        (Some(CompareOp::Gt), rest)
    } else if let Some(rest) = part.strip_prefix('<') {
        (Some(CompareOp::Lt), rest)
    } else if let Some(rest) = part.strip_prefix('=') {
        (Some(CompareOp::Eq), rest)
    } else {
        (None, part)
    };
    let version_str = version_str.trim();

    if is_wildcard_pattern(version_str) {
        if op.is_some() {
            return Err(format!("wildcard cannot follow an operator in '{part}'"));
        }
        return parse_wildcard(version_str);
    }

    match version_str.chars().next() {
        Some(c) if c.is_ascii_digit() => {}
        Some(_) => return Err(format!("unknown operator in '{part}'")),
        None => return Err(format!("missing version in '{part}'")),
    }

    let version = normalize_version(version_str)?;
    // Bare version implies ==
    Ok(vec![Specifier::new(op.unwrap_or(CompareOp::Eq), version)])
}

fn is_wildcard_pattern(s: &str) -> bool {
    s.split('.').any(|c| matches!(c, "*" | "x" | "X"))
}

/// `1.*` is `>=1.0.0, <2.0.0`; `1.2.*` is `>=1.2.0, <1.3.0`; `*` is anything.
fn parse_wildcard(s: &str) -> std::result::Result<Vec<Specifier>, String> {
    let components: Vec<&str> = s.split('.').collect();
    if components.len() > 3 {
        return Err(format!("too many components in '{s}'"));
    }

    let mut fixed = Vec::new();
    let mut wildcard_seen = false;
    for component in &components {
        if matches!(*component, "*" | "x" | "X") {
            wildcard_seen = true;
        } else if wildcard_seen {
            return Err(format!("numeric component after wildcard in '{s}'"));
        } else {
            fixed.push(parse_numeric(component, s)?);
        }
    }

    let specs = match fixed.as_slice() {
        [] => Vec::new(),
        [major] => vec![
            Specifier::new(CompareOp::Gte, Version::new(*major, 0, 0)),
            Specifier::new(CompareOp::Lt, exclusive_bound(successor(*major)?, 0, 0)?),
        ],
        [major, minor] => vec![
            Specifier::new(CompareOp::Gte, Version::new(*major, *minor, 0)),
            Specifier::new(CompareOp::Lt, exclusive_bound(*major, successor(*minor)?, 0)?),
        ],
        _ => return Err(format!("wildcard pattern '{s}' has no wildcard position")),
    };
    Ok(specs)
}

/// Upper bound of a caret range, tightened on leading zeros.
fn caret_upper(p: &Partial) -> std::result::Result<Version, String> {
    match (p.major, p.minor, p.patch) {
        (0, Some(0), Some(patch)) => exclusive_bound(0, 0, successor(patch)?),
        (0, Some(minor), _) => exclusive_bound(0, successor(minor)?, 0),
        (major, _, _) => exclusive_bound(successor(major)?, 0, 0),
    }
}

/// Next value of a version component, for exclusive upper bounds.
fn successor(component: u64) -> std::result::Result<u64, String> {
    component
        .checked_add(1)
        .ok_or_else(|| format!("version component {component} has no upper bound"))
}

/// The smallest version at `major.minor.patch`, including its pre-releases.
fn exclusive_bound(major: u64, minor: u64, patch: u64) -> std::result::Result<Version, String> {
    let pre = Prerelease::new("0").map_err(|e| e.to_string())?;
    Ok(Version {
        major,
        minor,
        patch,
        pre,
        build: BuildMetadata::EMPTY,
    })
}

fn parse_numeric(component: &str, whole: &str) -> std::result::Result<u64, String> {
    component
        .parse::<u64>()
        .map_err(|_| format!("invalid version component '{component}' in '{whole}'"))
}

/// Parse `1`, `1.2`, `1.2.3` or a full semver with pre-release/build.
fn parse_partial(s: &str) -> std::result::Result<Partial, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("missing version".to_string());
    }
    if s.contains('-') || s.contains('+') {
        let v = Version::parse(s).map_err(|e| format!("invalid version '{s}': {e}"))?;
        return Ok(Partial {
            major: v.major,
            minor: Some(v.minor),
            patch: Some(v.patch),
            pre: v.pre,
        });
    }

    let components: Vec<&str> = s.split('.').collect();
    if components.len() > 3 {
        return Err(format!("too many components in '{s}'"));
    }
    let major = parse_numeric(components[0], s)?;
    let minor = components.get(1).map(|c| parse_numeric(c, s)).transpose()?;
    let patch = components.get(2).map(|c| parse_numeric(c, s)).transpose()?;
    Ok(Partial {
        major,
        minor,
        patch,
        pre: Prerelease::EMPTY,
    })
}

/// Normalize a version string to semver by filling in missing components.
///
/// - `"1.2"` -> `1.2.0`
/// - `"1"` -> `1.0.0`
/// - `"1.2.3-rc.1"` -> `1.2.3-rc.1`
fn normalize_version(s: &str) -> std::result::Result<Version, String> {
    let s = s.trim();

    if let Ok(v) = Version::parse(s) {
        return Ok(v);
    }

    let partial = parse_partial(s)?;
    Ok(partial.floor())
}
