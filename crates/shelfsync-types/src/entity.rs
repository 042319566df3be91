use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Logical entity families that can appear in more than one feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Review,
    Comment,
    Book,
    Library,
    Activity,
    User,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Review => "review",
            EntityKind::Comment => "comment",
            EntityKind::Book => "book",
            EntityKind::Library => "library",
            EntityKind::Activity => "activity",
            EntityKind::User => "user",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = EntityRefError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "review" => Ok(EntityKind::Review),
            "comment" => Ok(EntityKind::Comment),
            "book" => Ok(EntityKind::Book),
            "library" => Ok(EntityKind::Library),
            "activity" => Ok(EntityKind::Activity),
            "user" => Ok(EntityKind::User),
            other => Err(EntityRefError::UnknownKind(other.to_string())),
        }
    }
}

/// Stable logical identity of a server entity, e.g. `review:42`.
///
/// Independent of any cache key: the same reference identifies every
/// denormalized copy of the entity across feeds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn review(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Review, id)
    }

    pub fn comment(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Comment, id)
    }

    pub fn book(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Book, id)
    }

    pub fn library(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Library, id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for EntityRef {
    type Err = EntityRefError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (kind, id) = value
            .split_once(':')
            .ok_or_else(|| EntityRefError::Malformed(value.to_string()))?;
        if id.is_empty() {
            return Err(EntityRefError::Malformed(value.to_string()));
        }
        Ok(Self::new(kind.parse()?, id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityRefError {
    #[error("malformed entity reference `{0}`, expected `<kind>:<id>`")]
    Malformed(String),
    #[error("unknown entity kind `{0}`")]
    UnknownKind(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_reference() {
        let entity: EntityRef = "review:42".parse().expect("valid reference");
        assert_eq!(entity, EntityRef::review("42"));
        assert_eq!(entity.to_string(), "review:42");
    }

    #[test]
    fn rejects_missing_id() {
        let err = "review:".parse::<EntityRef>().expect_err("empty id rejected");
        assert!(matches!(err, EntityRefError::Malformed(_)));
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = "shelf:1".parse::<EntityRef>().expect_err("unknown kind");
        assert_eq!(err, EntityRefError::UnknownKind("shelf".to_string()));
    }
}
