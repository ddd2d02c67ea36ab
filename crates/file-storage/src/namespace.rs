//! Storage namespaces
//!
//! A namespace partitions originals and their thumbnails so that equally named
//! files owned by different parties never collide on disk.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical partition key, either a single segment or several joined with `/`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "NamespaceRepr", into = "String")]
pub struct Namespace(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum NamespaceRepr {
    Single(String),
    Segments(Vec<String>),
}

impl From<NamespaceRepr> for Namespace {
    fn from(repr: NamespaceRepr) -> Self {
        match repr {
            NamespaceRepr::Single(value) => Namespace(value),
            NamespaceRepr::Segments(segments) => Namespace::from_segments(segments),
        }
    }
}

impl Namespace {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Join an ordered sequence of segments, e.g. `["users", "42"]` becomes `users/42`
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = segments
            .into_iter()
            .map(|segment| segment.as_ref().to_string())
            .collect::<Vec<_>>()
            .join("/");
        Self(joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Namespace {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Namespace {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<Vec<String>> for Namespace {
    fn from(segments: Vec<String>) -> Self {
        Self::from_segments(segments)
    }
}

impl From<&[&str]> for Namespace {
    fn from(segments: &[&str]) -> Self {
        Self::from_segments(segments)
    }
}

impl From<Namespace> for String {
    fn from(namespace: Namespace) -> Self {
        namespace.0
    }
}
