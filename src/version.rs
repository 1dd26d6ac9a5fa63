//! Version keys: total ordering over free-form version strings.
//!
//! A [`VersionKey`] splits a raw version into alternating numeric and
//! alphabetic segments and compares the aligned segment sequences. The
//! ordering is deliberately asymmetric at the tail: extra numeric segments
//! make a version newer, extra alphabetic segments (pre-release suffixes such
//! as `-rc4` or `-SNAPSHOT`) make it older, and trailing zeros are ignored.
//!
//! ```
//! use modlink::version::VersionKey;
//!
//! assert!(VersionKey::new("1.10") > VersionKey::new("1.9"));
//! assert!(VersionKey::new("1.2") > VersionKey::new("1.2-rc7"));
//! assert_eq!(VersionKey::new("1.2"), VersionKey::new("1.2.0.0"));
//! ```

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Characters removed from alphabetic segments.
const SEPARATORS: &[char] = &['.', '-', '_', ':', '/', '@', ' '];

/// One segment of a split version string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// A digit run with leading zeros stripped (`"0"` for an all-zero run).
    Number(String),
    /// A lowercased non-digit run with separators removed.
    Text(String),
}

impl Segment {
    fn is_zero(&self) -> bool {
        matches!(self, Self::Number(n) if n == "0")
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(t) => write!(f, "{t}"),
        }
    }
}

/// Compare two normalized digit strings as arbitrary-precision integers.
fn compare_numbers(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn compare_segments(a: &Segment, b: &Segment) -> Ordering {
    match (a, b) {
        (Segment::Number(x), Segment::Number(y)) => compare_numbers(x, y),
        (Segment::Text(x), Segment::Text(y)) => x.cmp(y),
        // A number at the same position is always newer than a string.
        (Segment::Number(_), Segment::Text(_)) => Ordering::Greater,
        (Segment::Text(_), Segment::Number(_)) => Ordering::Less,
    }
}

/// Ordering contributed by the unmatched tail of the longer version.
///
/// Returns the ordering of the longer side relative to the shorter one.
fn compare_tail(tail: &[Segment]) -> Ordering {
    match tail.iter().find(|s| !s.is_zero()) {
        None => Ordering::Equal,
        Some(Segment::Number(_)) => Ordering::Greater,
        Some(Segment::Text(_)) => Ordering::Less,
    }
}

/// Split a raw version string into segments.
pub fn split(raw: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut chars = raw.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            let mut digits = String::new();
            while let Some(&d) = chars.peek() {
                if !d.is_ascii_digit() {
                    break;
                }
                digits.push(d);
                chars.next();
            }
            let trimmed = digits.trim_start_matches('0');
            let normalized = if trimmed.is_empty() { "0" } else { trimmed };
            segments.push(Segment::Number(normalized.to_string()));
        } else {
            let mut text = String::new();
            while let Some(&t) = chars.peek() {
                if t.is_ascii_digit() {
                    break;
                }
                if !SEPARATORS.contains(&t) {
                    text.extend(t.to_lowercase());
                }
                chars.next();
            }
            if !text.is_empty() {
                segments.push(Segment::Text(text));
            }
        }
    }

    segments
}

/// Compare two segment sequences.
pub fn compare(a: &[Segment], b: &[Segment]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = compare_segments(x, y);
        if ord != Ordering::Equal {
            return ord;
        }
    }

    match a.len().cmp(&b.len()) {
        Ordering::Equal => Ordering::Equal,
        Ordering::Greater => compare_tail(&a[b.len()..]),
        Ordering::Less => compare_tail(&b[a.len()..]).reverse(),
    }
}

/// A parsed, totally ordered version string.
///
/// Equality follows the ordering, so `1.2` and `1.2.0` are equal even though
/// their raw strings differ. For that reason `VersionKey` does not implement
/// `Hash`; use [`VersionKey::raw`] as a map key when the spelling matters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct VersionKey {
    raw: String,
    segments: Vec<Segment>,
}

impl VersionKey {
    /// Parse a raw version string.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let segments = split(&raw);
        Self { raw, segments }
    }

    /// The version as originally written.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The cached segment split.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether `self` is at least as new as `floor`.
    pub fn satisfies(&self, floor: &VersionKey) -> bool {
        self >= floor
    }
}

impl From<String> for VersionKey {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for VersionKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<VersionKey> for String {
    fn from(key: VersionKey) -> Self {
        key.raw
    }
}

impl std::fmt::Display for VersionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for VersionKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VersionKey {}

impl PartialOrd for VersionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(&self.segments, &other.segments)
    }
}
