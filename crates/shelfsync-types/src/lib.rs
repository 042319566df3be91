//! Server DTOs for the reading platform.
//!
//! These types mirror the JSON contract of the backend and carry no runtime
//! behavior beyond identity and versioning, which the cache layer relies on
//! for deduplication and cross-feed propagation.

mod entity;
mod items;
mod mutations;

pub use entity::{EntityKind, EntityRef, EntityRefError};
pub use items::{ActivityEntry, Book, BookSummary, Comment, Item, Library, Review, UserSummary};
pub use mutations::{MutationKind, MutationPayload, ReadingStatus, ServerResult};
