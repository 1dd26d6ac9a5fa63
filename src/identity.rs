//! Module identities: the `{name, major}` key that addresses a module.
//!
//! Names are case-insensitive and stored lowercase. A major version that is
//! empty or mentions `snapshot` is normalized away, making the identity a
//! floating snapshot. The minor version is carried as a compatibility floor
//! but never participates in equality or hashing.

use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;
use crate::provenance::Dependency;
use crate::version::VersionKey;

/// Canonical identity of a module.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModuleIdentity {
    name: String,
    major: Option<String>,
    minor: Option<String>,
}

fn is_numeric_version(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || c == '.')
}

fn normalize_major(major: Option<&str>) -> Option<String> {
    let major = major?.trim();
    if major.is_empty() || major.to_lowercase().contains("snapshot") {
        return None;
    }
    Some(major.to_string())
}

fn normalize_minor(minor: Option<&str>) -> Option<String> {
    let minor = minor?.trim();
    (!minor.is_empty()).then(|| minor.to_lowercase())
}

impl ModuleIdentity {
    /// Build an identity, normalizing name case and snapshot majors.
    pub fn new(name: &str, major: Option<&str>, minor: Option<&str>) -> Self {
        Self {
            name: name.trim().to_lowercase(),
            major: normalize_major(major),
            minor: normalize_minor(minor),
        }
    }

    /// Parse a reference such as `core-v1`, `core-v1.2`, `core-snapshot` or `core`.
    ///
    /// The split happens at the last hyphen. A `v` followed by digits and
    /// periods yields a numeric major; any other suffix is taken verbatim
    /// (and normalized, so `-snapshot` yields an unversioned identity).
    pub fn parse(reference: &str) -> Result<Self, IdentityError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(IdentityError::Malformed {
                input: reference.to_string(),
                reason: "empty reference",
            });
        }

        let (name, major) = match reference.rsplit_once('-') {
            None => (reference, None),
            Some((name, suffix)) => {
                let major = match suffix.strip_prefix(['v', 'V']) {
                    Some(rest) if is_numeric_version(rest) => rest,
                    _ => suffix,
                };
                (name, Some(major))
            }
        };

        if name.trim().is_empty() {
            return Err(IdentityError::Malformed {
                input: reference.to_string(),
                reason: "empty module name",
            });
        }

        Ok(Self::new(name, major, None))
    }

    /// Return a copy carrying `minor` as its compatibility floor.
    pub fn with_minor(mut self, minor: Option<&str>) -> Self {
        self.minor = normalize_minor(minor);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn major(&self) -> Option<&str> {
        self.major.as_deref()
    }

    pub fn minor(&self) -> Option<&str> {
        self.minor.as_deref()
    }

    /// Whether this identity floats (no resolved major version).
    pub fn is_snapshot(&self) -> bool {
        self.major.is_none()
    }

    /// The minor version as an orderable key.
    pub fn minor_key(&self) -> Option<VersionKey> {
        self.minor.as_deref().map(VersionKey::new)
    }

    /// Wrap this identity as a dependency requested by `requester`.
    pub fn as_dependency_of(&self, requester: &Dependency) -> Dependency {
        Dependency::requested_by(self.clone(), Arc::new(requester.clone()))
    }
}

impl PartialEq for ModuleIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.major == other.major
    }
}

impl Eq for ModuleIdentity {}

impl Hash for ModuleIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.major.hash(state);
    }
}

impl std::fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.major {
            Some(major) if is_numeric_version(major) => write!(f, "{}-v{major}", self.name),
            Some(major) => write!(f, "{}-{major}", self.name),
            None => write!(f, "{}-snapshot", self.name),
        }
    }
}

impl FromStr for ModuleIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ModuleIdentity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ModuleIdentity> for String {
    fn from(id: ModuleIdentity) -> Self {
        id.to_string()
    }
}
