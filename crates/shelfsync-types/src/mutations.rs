use std::fmt;

use serde::{Deserialize, Serialize};

use crate::items::Item;

/// Remote mutation families. At most one per entity may be in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Like,
    Unlike,
    AddComment,
    DeleteComment,
    SetRating,
    SetReadingStatus,
    CreateLibrary,
    DeleteLibrary,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::Like => "like",
            MutationKind::Unlike => "unlike",
            MutationKind::AddComment => "add_comment",
            MutationKind::DeleteComment => "delete_comment",
            MutationKind::SetRating => "set_rating",
            MutationKind::SetReadingStatus => "set_reading_status",
            MutationKind::CreateLibrary => "create_library",
            MutationKind::DeleteLibrary => "delete_library",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingStatus {
    WantToRead,
    Reading,
    Finished,
    Abandoned,
}

/// Request body handed to the remote mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MutationPayload {
    Empty,
    Comment { review_id: String, body: String },
    Rating { score: u8 },
    ReadingStatus { status: ReadingStatus },
    Library { name: String, is_public: bool },
}

/// Authoritative server response to a mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerResult {
    /// The entity as stored by the server, when the endpoint echoes it.
    #[serde(default)]
    pub item: Option<Item>,
}

impl ServerResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_item(item: Item) -> Self {
        Self { item: Some(item) }
    }
}
