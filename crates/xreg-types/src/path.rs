//! Property paths.
//!
//! A [`PropPath`] locates a value inside a property tree. It renders as
//! `labels.env` or `tags[2].name` for humans (error arguments) and has a
//! separate unambiguous storage encoding used as the property-row name.

use std::fmt;

use crate::error::TypeError;

/// Separator between segments in the storage encoding.
const STORAGE_SEP: char = '\u{1e}';

/// One step in a property path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSeg {
    Key(String),
    Index(usize),
}

/// Location of a property inside a property tree.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropPath {
    segments: Vec<PathSeg>,
}

impl PropPath {
    /// The empty path (the tree itself).
    pub fn root() -> Self {
        Self::default()
    }

    /// A single-key path.
    pub fn key(name: impl Into<String>) -> Self {
        Self {
            segments: vec![PathSeg::Key(name.into())],
        }
    }

    /// Build a path from a list of keys.
    pub fn from_keys<S: AsRef<str>>(keys: &[S]) -> Self {
        Self {
            segments: keys
                .iter()
                .map(|k| PathSeg::Key(k.as_ref().to_string()))
                .collect(),
        }
    }

    /// Path extended with a map key.
    pub fn with_key(&self, name: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.segments.push(PathSeg::Key(name.into()));
        next
    }

    /// Path extended with an array index.
    pub fn with_index(&self, index: usize) -> Self {
        let mut next = self.clone();
        next.segments.push(PathSeg::Index(index));
        next
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[PathSeg] {
        &self.segments
    }

    /// The top-level attribute name, if the path starts with a key.
    pub fn top(&self) -> Option<&str> {
        match self.segments.first() {
            Some(PathSeg::Key(k)) => Some(k),
            _ => None,
        }
    }

    /// Encode for use as a property-row name.
    ///
    /// Keys are joined with an ASCII record separator and indexes render as
    /// `[n]`. Neither can appear inside a valid attribute or map key.
    pub fn to_storage(&self) -> String {
        let parts: Vec<String> = self
            .segments
            .iter()
            .map(|seg| match seg {
                PathSeg::Key(k) => k.clone(),
                PathSeg::Index(i) => format!("[{i}]"),
            })
            .collect();
        parts.join(&STORAGE_SEP.to_string())
    }

    /// Decode a property-row name produced by [`PropPath::to_storage`].
    pub fn from_storage(encoded: &str) -> Result<Self, TypeError> {
        if encoded.is_empty() {
            return Err(TypeError::InvalidPropPath(encoded.to_string()));
        }
        let mut segments = Vec::new();
        for part in encoded.split(STORAGE_SEP) {
            if part.is_empty() {
                return Err(TypeError::InvalidPropPath(encoded.to_string()));
            }
            let index = part
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
                .map(|digits| digits.parse::<usize>());
            match index {
                Some(Ok(i)) => segments.push(PathSeg::Index(i)),
                Some(Err(_)) => return Err(TypeError::InvalidPropPath(encoded.to_string())),
                None => segments.push(PathSeg::Key(part.to_string())),
            }
        }
        Ok(Self { segments })
    }
}

impl fmt::Display for PropPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            match seg {
                PathSeg::Key(k) if i == 0 => write!(f, "{k}")?,
                PathSeg::Key(k) => write!(f, ".{k}")?,
                PathSeg::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_format() {
        let path = PropPath::key("labels").with_key("env");
        assert_eq!(path.to_string(), "labels.env");
        let path = PropPath::key("tags").with_index(2).with_key("name");
        assert_eq!(path.to_string(), "tags[2].name");
        assert_eq!(PropPath::root().to_string(), "");
    }

    #[test]
    fn storage_encoding_roundtrip() {
        let path = PropPath::key("labels").with_key("a.b").with_index(7);
        let encoded = path.to_storage();
        assert_eq!(PropPath::from_storage(&encoded).unwrap(), path);
    }

    #[test]
    fn system_keys_survive_storage_encoding() {
        let path = PropPath::key("#nextversionid");
        assert_eq!(PropPath::from_storage(&path.to_storage()).unwrap(), path);
    }

    #[test]
    fn malformed_storage_names_are_rejected() {
        assert!(PropPath::from_storage("").is_err());
        assert!(PropPath::from_storage("a\u{1e}\u{1e}b").is_err());
        assert!(PropPath::from_storage("a\u{1e}[x]").is_err());
    }

    #[test]
    fn top_returns_first_key() {
        assert_eq!(PropPath::key("x").with_index(0).top(), Some("x"));
        assert_eq!(PropPath::root().top(), None);
    }
}
