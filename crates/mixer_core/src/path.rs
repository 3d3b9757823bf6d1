//! Attribute paths
//!
//! An `AttrPath` addresses a value inside a node, relative to the node's
//! root struct: `data.lens`, `nodes["Mix"].inputs[1].default_value`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of an attribute path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// Named attribute of a struct, or key of a keyed collection
    Key(String),
    /// Position in an ordered collection
    Index(usize),
}

/// Path from a node root to one of its attributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttrPath(Vec<PathSegment>);

impl AttrPath {
    /// The node root struct
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build from a list of segments
    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }

    /// Path of a named child
    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.into()));
        Self(segments)
    }

    /// Path of a positional child
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }

    /// Path of a child given as a segment
    pub fn child(&self, segment: PathSegment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Last segment, if any
    pub fn last(&self) -> Option<&PathSegment> {
        self.0.last()
    }

    /// Path without its last segment
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }
}

impl From<&str> for AttrPath {
    /// Dotted names only, `a.b.c`
    fn from(dotted: &str) -> Self {
        Self(
            dotted
                .split('.')
                .filter(|s| !s.is_empty())
                .map(|s| PathSegment::Key(s.to_string()))
                .collect(),
        )
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => write!(f, "{}", k),
            PathSegment::Index(i) => write!(f, "[{}]", i),
        }
    }
}

impl fmt::Display for AttrPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(k) if i > 0 => write!(f, ".{}", k)?,
                other => write!(f, "{}", other)?,
            }
        }
        Ok(())
    }
}
