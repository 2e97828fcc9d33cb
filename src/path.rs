//! Object paths: the keys and indices leading from the root of a value to one
//! of its descendants.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One step of an [`ObjectPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// Index into a sequence.
    Index(usize),
    /// Key of a mapping or name of a record field.
    Key(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Key(k) => f.write_str(k),
        }
    }
}

impl From<usize> for PathSegment {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

impl From<&str> for PathSegment {
    fn from(k: &str) -> Self {
        Self::Key(k.to_owned())
    }
}

impl From<String> for PathSegment {
    fn from(k: String) -> Self {
        Self::Key(k)
    }
}

/// Immutable sequence of [`PathSegment`]s from the root.
///
/// Descending creates a new path; the parent is never modified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectPath(Vec<PathSegment>);

impl ObjectPath {
    /// The empty path.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Returns a new path extended by one segment.
    pub fn child(&self, segment: impl Into<PathSegment>) -> Self {
        let mut segments = Vec::with_capacity(self.0.len() + 1);
        segments.extend_from_slice(&self.0);
        segments.push(segment.into());
        Self(segments)
    }

    /// Segments from the root.
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the root path.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Joins the segments with `/`.
    pub fn join(&self) -> String {
        self.0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("/")
    }

    /// True when `self` is a segment-wise prefix of `other` (or equal to it).
    pub fn is_prefix_of(&self, other: &ObjectPath) -> bool {
        self.0.len() <= other.0.len() && other.0[..self.0.len()] == self.0[..]
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.join())
        }
    }
}

impl From<Vec<PathSegment>> for ObjectPath {
    fn from(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }
}

impl FromIterator<PathSegment> for ObjectPath {
    fn from_iter<I: IntoIterator<Item = PathSegment>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_does_not_touch_parent() {
        let root = ObjectPath::root();
        let a = root.child("a");
        let a0 = a.child(0);
        assert!(root.is_empty());
        assert_eq!(a.len(), 1);
        assert_eq!(a0.join(), "a/0");
    }

    #[test]
    fn prefix_is_segment_wise() {
        let data = ObjectPath::root().child("data");
        let data3 = data.child(3).child("arr");
        let database = ObjectPath::root().child("database");
        assert!(data.is_prefix_of(&data3));
        assert!(!data.is_prefix_of(&database));
        assert!(!data3.is_prefix_of(&data));
    }

    #[test]
    fn serializes_as_plain_list() {
        let path = ObjectPath::root().child("layers").child(2);
        let json = serde_json::to_string(&path).unwrap_or_default();
        assert_eq!(json, r#"["layers",2]"#);
        let back: ObjectPath = serde_json::from_str(&json).unwrap_or_default();
        assert_eq!(back, path);
    }
}
