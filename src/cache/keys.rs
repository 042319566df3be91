//! Query key definitions.
//!
//! A [`QueryKey`] is the only address into the [`CacheStore`](super::CacheStore).
//! The first segment names the query family (`"book-reviews"`, `"home-feed"`,
//! ...); the remaining segments are that family's parameters.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One scalar or scalar-array component of a [`QueryKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeySegment {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<KeySegment>),
}

impl fmt::Display for KeySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySegment::Null => f.write_str("null"),
            KeySegment::Bool(value) => write!(f, "{value}"),
            KeySegment::Int(value) => write!(f, "{value}"),
            KeySegment::Str(value) => write!(f, "{value:?}"),
            KeySegment::List(values) => {
                f.write_str("[")?;
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
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

impl From<&String> for KeySegment {
    fn from(value: &String) -> Self {
        KeySegment::Str(value.clone())
    }
}

impl From<i64> for KeySegment {
    fn from(value: i64) -> Self {
        KeySegment::Int(value)
    }
}

impl From<u32> for KeySegment {
    fn from(value: u32) -> Self {
        KeySegment::Int(i64::from(value))
    }
}

impl From<bool> for KeySegment {
    fn from(value: bool) -> Self {
        KeySegment::Bool(value)
    }
}

impl<T: Into<KeySegment>> From<Option<T>> for KeySegment {
    fn from(value: Option<T>) -> Self {
        value.map_or(KeySegment::Null, Into::into)
    }
}

impl<T: Into<KeySegment>> From<Vec<T>> for KeySegment {
    fn from(values: Vec<T>) -> Self {
        KeySegment::List(values.into_iter().map(Into::into).collect())
    }
}

/// Ordered tuple of segments. Two keys are equal iff every segment is equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey(Vec<KeySegment>);

impl QueryKey {
    /// Start a key for the given query family.
    pub fn family(name: &str) -> Self {
        Self(vec![KeySegment::from(name)])
    }

    pub fn from_segments(segments: Vec<KeySegment>) -> Self {
        Self(segments)
    }

    /// Append a segment, builder style.
    pub fn with(mut self, segment: impl Into<KeySegment>) -> Self {
        self.0.push(segment.into());
        self
    }

    pub fn segments(&self) -> &[KeySegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The family name, when the first segment is a string.
    pub fn family_name(&self) -> Option<&str> {
        match self.0.first() {
            Some(KeySegment::Str(name)) => Some(name.as_str()),
            _ => None,
        }
    }

    /// True when every segment of `prefix` equals the segment at the same
    /// position of `self`. The empty key is a prefix of every key.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (index, segment) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{segment}")?;
        }
        f.write_str("]")
    }
}

/// Query families used by the reading app.
pub mod family {
    pub const HOME_FEED: &str = "home-feed";
    pub const COMMUNITY_REVIEWS: &str = "community-reviews";
    /// `[family, book_id, isbn, sort]`
    pub const BOOK_REVIEWS: &str = "book-reviews";
    pub const USER_REVIEWS: &str = "user-reviews";
    /// `[family, review_id]`
    pub const REVIEW: &str = "review";
    /// `[family, review_id]`
    pub const REVIEW_COMMENTS: &str = "review-comments";
    pub const LIBRARIES: &str = "libraries";
    pub const LIBRARY: &str = "library";
    /// `[family, query]`
    pub const BOOK_SEARCH: &str = "book-search";
    pub const BOOK: &str = "book";
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    use super::*;

    fn hash_of(key: &QueryKey) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn keys_compare_segment_by_segment() {
        let a = QueryKey::family("book-reviews").with("b1").with("isbn").with("latest");
        let b = QueryKey::family("book-reviews").with("b1").with("isbn").with("latest");
        let c = QueryKey::family("book-reviews").with("b1").with("isbn").with("likes");

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, c);
    }

    #[test]
    fn list_segments_compare_deeply() {
        let a = QueryKey::family("books").with(vec!["x", "y"]);
        let b = QueryKey::family("books").with(vec!["x", "y"]);
        let c = QueryKey::family("books").with(vec!["y", "x"]);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn string_and_int_segments_are_distinct() {
        let a = QueryKey::family("review").with("42");
        let b = QueryKey::family("review").with(42_i64);
        assert_ne!(a, b);
    }

    #[test]
    fn prefix_matching() {
        let key = QueryKey::family("book-search").with("dune");

        assert!(key.starts_with(&QueryKey::family("book-search")));
        assert!(key.starts_with(&key));
        assert!(key.starts_with(&QueryKey::from_segments(vec![])));
        assert!(!key.starts_with(&QueryKey::family("book")));
        assert!(!QueryKey::family("book-search").starts_with(&key));
    }

    #[test]
    fn family_name_reads_first_segment() {
        assert_eq!(QueryKey::family("home-feed").family_name(), Some("home-feed"));
        assert_eq!(QueryKey::from_segments(vec![KeySegment::Int(1)]).family_name(), None);
    }

    #[test]
    fn display_is_readable() {
        let key = QueryKey::family("book-reviews")
            .with("b1")
            .with(None::<String>)
            .with(true);
        assert_eq!(key.to_string(), r#"["book-reviews", "b1", null, true]"#);
    }
}
