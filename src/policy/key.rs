//! Cache keys.
//!
//! A key is an ordered sequence of string or numeric segments, e.g.
//! `["dashboard", "stats"]` or `["drone", 42]`. Equal segment sequences name
//! the same cache entry. For classification the segments are lowercased and
//! joined with [`SEGMENT_SEPARATOR`]; that string is lossy (`["a-b"]` and
//! `["a", "b"]` normalize identically) and is only used for tier matching.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::tier::Tier;

/// Separator placed between segments in the normalized key.
pub const SEGMENT_SEPARATOR: char = '-';

/// A malformed key. These are programming errors and are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Cache key has no segments")]
    EmptyKey,
}

/// One segment of a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeySegment {
    Num(i64),
    Str(String),
}

impl fmt::Display for KeySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySegment::Num(n) => write!(f, "{n}"),
            KeySegment::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for KeySegment {
    fn from(value: &str) -> Self {
        KeySegment::Str(value.to_string())
    }
}

impl From<String> for KeySegment {
    fn from(value: String) -> Self {
        KeySegment::Str(value)
    }
}

impl From<i64> for KeySegment {
    fn from(value: i64) -> Self {
        KeySegment::Num(value)
    }
}

impl From<i32> for KeySegment {
    fn from(value: i32) -> Self {
        KeySegment::Num(value.into())
    }
}

impl From<u32> for KeySegment {
    fn from(value: u32) -> Self {
        KeySegment::Num(value.into())
    }
}

/// Identifies a requested resource.
///
/// A key may carry an explicit namespace tag, attached at construction time.
/// The tag decides the tier; untagged keys are classified by substring.
/// The tag does not take part in equality: two keys with the same segments
/// refer to the same cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Vec<KeySegment>", into = "Vec<KeySegment>")]
pub struct CacheKey {
    segments: Vec<KeySegment>,
    namespace: Option<Tier>,
}

impl CacheKey {
    /// Build an untagged key.
    pub fn new<I, S>(segments: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = S>,
        S: Into<KeySegment>,
    {
        let segments: Vec<KeySegment> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(PolicyError::EmptyKey);
        }
        Ok(Self {
            segments,
            namespace: None,
        })
    }

    /// Build a key whose tier is fixed by `namespace`.
    pub fn tagged<I, S>(namespace: Tier, segments: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = S>,
        S: Into<KeySegment>,
    {
        let mut key = Self::new(segments)?;
        key.namespace = Some(namespace);
        Ok(key)
    }

    /// Attach (or replace) the namespace tag.
    pub fn with_namespace(mut self, namespace: Tier) -> Self {
        self.namespace = Some(namespace);
        self
    }

    pub fn segments(&self) -> &[KeySegment] {
        &self.segments
    }

    pub fn namespace(&self) -> Option<Tier> {
        self.namespace
    }

    /// Lowercased segments joined by [`SEGMENT_SEPARATOR`].
    pub fn normalized(&self) -> String {
        let mut out = String::new();
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                out.push(SEGMENT_SEPARATOR);
            }
            out.push_str(&segment.to_string().to_lowercase());
        }
        out
    }

    /// Whether `prefix` matches the leading segments of this key.
    pub fn starts_with(&self, prefix: &[KeySegment]) -> bool {
        self.segments.starts_with(prefix)
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.segments == other.segments
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.segments.hash(state);
    }
}

impl TryFrom<Vec<KeySegment>> for CacheKey {
    type Error = PolicyError;

    fn try_from(segments: Vec<KeySegment>) -> Result<Self, Self::Error> {
        CacheKey::new(segments)
    }
}

impl From<CacheKey> for Vec<KeySegment> {
    fn from(key: CacheKey) -> Self {
        key.segments
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}
