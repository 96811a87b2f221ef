//! C1: slash-separated paths into the shared tree.
//!
//! Grounded on the `Path` address type used in `calimero-storage`'s entity
//! tests (`crates/storage/src/tests/address.rs`): an owned, immutable
//! sequence of name parts with structural equality and prefix comparison.

use std::fmt;
use std::str::FromStr;

use crate::error::WebcomError;

/// An owned, slash-delimited path into the tree. The root path has zero
/// parts. Parts never contain `/` and are never empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Path {
    parts: Vec<String>,
}

impl Path {
    /// The root path (`"/"`), with zero parts.
    pub fn root() -> Self {
        Self { parts: Vec::new() }
    }

    /// Parses a path string. Trailing slashes are stripped; internal empty
    /// segments (`"a//b"`) are rejected. `"/"` and `""` both parse to root.
    pub fn parse(s: &str) -> Result<Self, WebcomError> {
        let trimmed = s.trim_start_matches('/').trim_end_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let mut parts = Vec::new();
        for seg in trimmed.split('/') {
            if seg.is_empty() {
                return Err(WebcomError::invalid_path(s));
            }
            parts.push(seg.to_string());
        }
        Ok(Self { parts })
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn is_root(&self) -> bool {
        self.parts.is_empty()
    }

    /// The parent path, or `None` if this is already root.
    pub fn parent(&self) -> Option<Path> {
        if self.parts.is_empty() {
            return None;
        }
        Some(Path {
            parts: self.parts[..self.parts.len() - 1].to_vec(),
        })
    }

    /// The last segment's name, or `None` at root.
    pub fn name(&self) -> Option<&str> {
        self.parts.last().map(String::as_str)
    }

    /// Builds a child path by appending one segment.
    pub fn child(&self, name: impl Into<String>) -> Path {
        let mut parts = self.parts.clone();
        parts.push(name.into());
        Path { parts }
    }

    /// True iff `self` is `other` or a descendant of `other`.
    pub fn starts_with(&self, other: &Path) -> bool {
        other.parts.len() <= self.parts.len() && self.parts[..other.parts.len()] == other.parts[..]
    }

    /// Ancestor chain from `self` up to (and including) root, `self` first.
    pub fn ancestors(&self) -> impl Iterator<Item = Path> + '_ {
        let mut cur = Some(self.clone());
        std::iter::from_fn(move || {
            let next = cur.clone();
            cur = cur.take().and_then(|p| p.parent());
            next
        })
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parts.is_empty() {
            return write!(f, "/");
        }
        for part in &self.parts {
            write!(f, "/{part}")?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = WebcomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_parses_from_slash_and_empty() {
        assert_eq!(Path::parse("/").unwrap(), Path::root());
        assert_eq!(Path::parse("").unwrap(), Path::root());
    }

    #[test]
    fn trailing_slash_is_stripped() {
        assert_eq!(Path::parse("/a/b/").unwrap(), Path::parse("/a/b").unwrap());
    }

    #[test]
    fn internal_empty_segment_rejected() {
        assert!(Path::parse("/a//b").is_err());
    }

    #[test]
    fn round_trips_through_display() {
        let p = Path::parse("/a/b/c").unwrap();
        assert_eq!(Path::parse(&p.to_string()).unwrap(), p);
        assert_eq!(Path::root().to_string(), "/");
    }

    #[test]
    fn starts_with_is_prefix_not_equality() {
        let root = Path::root();
        let a = Path::parse("/a").unwrap();
        let ab = Path::parse("/a/b").unwrap();
        assert!(ab.starts_with(&a));
        assert!(ab.starts_with(&root));
        assert!(!a.starts_with(&ab));
    }

    #[test]
    fn parent_of_root_is_none() {
        assert!(Path::root().parent().is_none());
        assert_eq!(Path::parse("/a").unwrap().parent().unwrap(), Path::root());
    }

    #[test]
    fn child_appends_one_segment() {
        let p = Path::root().child("a").child("b");
        assert_eq!(p, Path::parse("/a/b").unwrap());
    }

    #[test]
    fn ancestors_walk_to_root_inclusive() {
        let p = Path::parse("/a/b").unwrap();
        let chain: Vec<_> = p.ancestors().collect();
        assert_eq!(
            chain,
            vec![
                Path::parse("/a/b").unwrap(),
                Path::parse("/a").unwrap(),
                Path::root(),
            ]
        );
    }
}
