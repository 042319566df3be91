use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::entity::{EntityKind, EntityRef};
use crate::mutations::ReadingStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: String,
    pub nickname: String,
}

/// Book fields embedded in review feeds. Some feeds omit them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSummary {
    pub isbn: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub book_id: String,
    pub author: UserSummary,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub like_count: u32,
    #[serde(default)]
    pub is_liked: bool,
    #[serde(default)]
    pub comment_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book: Option<BookSummary>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub review_id: String,
    pub author: UserSummary,
    pub body: String,
    /// Set on locally created comments until the server assigns a real id.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending: bool,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub isbn: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reading_status: Option<ReadingStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub my_rating: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Library {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub book_count: u32,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending: bool,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<OffsetDateTime>,
}

/// Home-feed activity row. Carries its own copy of the reviewed entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: String,
    pub actor: UserSummary,
    pub review: Review,
}

/// Any item the backend returns inside a page or as a single value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Item {
    Review(Review),
    Comment(Comment),
    Book(Book),
    Library(Library),
    Activity(ActivityEntry),
}

impl Item {
    /// Identity used for deduplication within an entry.
    pub fn entity_ref(&self) -> EntityRef {
        match self {
            Item::Review(review) => EntityRef::new(EntityKind::Review, review.id.as_str()),
            Item::Comment(comment) => EntityRef::new(EntityKind::Comment, comment.id.as_str()),
            Item::Book(book) => EntityRef::new(EntityKind::Book, book.isbn.as_str()),
            Item::Library(library) => EntityRef::new(EntityKind::Library, library.id.as_str()),
            Item::Activity(activity) => EntityRef::new(EntityKind::Activity, activity.id.as_str()),
        }
    }

    /// Monotonic version in unix milliseconds, when the server provides one.
    pub fn version(&self) -> Option<i128> {
        let stamp = match self {
            Item::Review(review) => review.updated_at,
            Item::Comment(comment) => comment.updated_at,
            Item::Library(library) => library.updated_at,
            Item::Activity(activity) => activity.review.updated_at,
            Item::Book(_) => None,
        };
        stamp.map(|at| at.unix_timestamp_nanos() / 1_000_000)
    }

    pub fn as_review(&self) -> Option<&Review> {
        match self {
            Item::Review(review) => Some(review),
            _ => None,
        }
    }

    pub fn as_comment(&self) -> Option<&Comment> {
        match self {
            Item::Comment(comment) => Some(comment),
            _ => None,
        }
    }

    pub fn as_book(&self) -> Option<&Book> {
        match self {
            Item::Book(book) => Some(book),
            _ => None,
        }
    }

    pub fn as_library(&self) -> Option<&Library> {
        match self {
            Item::Library(library) => Some(library),
            _ => None,
        }
    }

    /// Return a copy with the review rewritten, or `self` unchanged when the
    /// item is not a review.
    pub fn map_review(&self, f: impl FnOnce(&Review) -> Review) -> Item {
        match self {
            Item::Review(review) => Item::Review(f(review)),
            other => other.clone(),
        }
    }

    pub fn map_book(&self, f: impl FnOnce(&Book) -> Book) -> Item {
        match self {
            Item::Book(book) => Item::Book(f(book)),
            other => other.clone(),
        }
    }

    pub fn map_library(&self, f: impl FnOnce(&Library) -> Library) -> Item {
        match self {
            Item::Library(library) => Item::Library(f(library)),
            other => other.clone(),
        }
    }
}
