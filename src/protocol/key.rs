//! Hierarchical state keys
//!
//! A key is an ordered sequence of string segments such as
//! `["gameRoom", "scores"]`. The normalized form joins segments with
//! [`KEY_DELIMITER`], escaping any delimiter or escape characters inside a
//! segment so that distinct sequences never share a normalized form.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::constants::{GLOBAL_KEY, KEY_DELIMITER, KEY_ESCAPE};

/// An ordered sequence of path segments identifying one piece of shared state
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(Vec<String>);

impl Key {
    /// Create a key from its segments
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Key segments in order
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// True for the zero-segment (global) key
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical string used for storage, watch lists and lookup
    pub fn normalize(&self) -> String {
        normalize(&self.0)
    }
}

impl<S: Into<String>> From<Vec<S>> for Key {
    fn from(segments: Vec<S>) -> Self {
        Self::new(segments)
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for Key {
    fn from(segments: [S; N]) -> Self {
        Self::new(segments)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalize())
    }
}

/// Normalize a sequence of segments into a single string
///
/// Pure and deterministic. The empty sequence maps to [`GLOBAL_KEY`].
pub fn normalize<S: AsRef<str>>(segments: &[S]) -> String {
    if segments.is_empty() {
        return GLOBAL_KEY.to_string();
    }

    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            out.push(KEY_DELIMITER);
        }
        for c in segment.as_ref().chars() {
            if c == KEY_DELIMITER || c == KEY_ESCAPE {
                out.push(KEY_ESCAPE);
            }
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_joins_segments() {
        assert_eq!(normalize(&["gameRoom", "scores"]), "gameRoom/scores");
        assert_eq!(normalize(&["single"]), "single");
    }

    #[test]
    fn test_normalize_deterministic() {
        let a = Key::from(["room1", "score"]);
        let b = Key::new(vec!["room1".to_string(), "score".to_string()]);
        assert_eq!(a.normalize(), b.normalize());
    }

    #[test]
    fn test_order_matters() {
        assert_ne!(normalize(&["a", "b"]), normalize(&["b", "a"]));
    }

    #[test]
    fn test_delimiter_inside_segment_is_unambiguous() {
        // ["a/b"] and ["a", "b"] must not collide
        assert_ne!(normalize(&["a/b"]), normalize(&["a", "b"]));
        assert_ne!(normalize(&["a\\", "b"]), normalize(&["a\\/b"]));
        assert_eq!(normalize(&["a/b"]), "a\\/b");
    }

    #[test]
    fn test_empty_segments() {
        let empty: [&str; 0] = [];
        assert_eq!(normalize(&empty), GLOBAL_KEY);
        assert_eq!(normalize(&[""]), "");
        assert_ne!(normalize(&[""]), normalize(&empty));
        assert_ne!(normalize(&["a"]), normalize(&["a", ""]));
        assert_ne!(normalize(&["", ""]), normalize(&[""]));
    }

    #[test]
    fn test_global_sentinel_cannot_be_produced_by_segments() {
        assert_ne!(normalize(&["\\*"]), GLOBAL_KEY);
        assert_ne!(normalize(&["*"]), GLOBAL_KEY);
    }

    #[test]
    fn test_key_serializes_as_array() {
        let key = Key::from(["room1", "score"]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"["room1","score"]"#);

        let back: Key = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
