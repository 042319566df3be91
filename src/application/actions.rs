//! Action dispatchers for the reading app.
//!
//! Each action validates its input, then hands a [`MutationSpec`] to the
//! coordinator. Validation failures never reach the coordinator.

use std::sync::Arc;

use shelfsync_types::{
    ActivityEntry, Book, Comment, EntityRef, Item, Library, MutationKind, MutationPayload,
    ReadingStatus, Review, UserSummary,
};
use uuid::Uuid;

use crate::application::error::SyncError;
use crate::application::mutation::{MutationCoordinator, MutationHandle, MutationSpec, Mutator};
use crate::cache::pagination::{prepend_item, remove_item};
use crate::cache::{CacheEntry, CacheStore, QueryKey, delta, family};

const TEMP_ID_PREFIX: &str = "tmp-";
const MAX_COMMENT_CHARS: usize = 2_000;
const MAX_LIBRARY_NAME_CHARS: usize = 60;

/// Mutations the view layer can dispatch.
#[derive(Clone)]
pub struct Actions {
    store: Arc<CacheStore>,
    coordinator: MutationCoordinator,
    mutator: Arc<dyn Mutator>,
    viewer: UserSummary,
}

impl Actions {
    pub fn new(
        store: Arc<CacheStore>,
        coordinator: MutationCoordinator,
        mutator: Arc<dyn Mutator>,
        viewer: UserSummary,
    ) -> Self {
        Self {
            store,
            coordinator,
            mutator,
            viewer,
        }
    }

    pub fn coordinator(&self) -> &MutationCoordinator {
        &self.coordinator
    }

    pub fn like_review(&self, review_id: &str) -> Result<MutationHandle, SyncError> {
        self.toggle_like(review_id, true)
    }

    pub fn unlike_review(&self, review_id: &str) -> Result<MutationHandle, SyncError> {
        self.toggle_like(review_id, false)
    }

    fn toggle_like(&self, review_id: &str, liked: bool) -> Result<MutationHandle, SyncError> {
        let review_id = non_empty(review_id, "review id")?;
        let entity = EntityRef::review(review_id.as_str());
        let kind = if liked {
            MutationKind::Like
        } else {
            MutationKind::Unlike
        };

        let settled_id = review_id.clone();
        let spec = self
            .remote(entity.clone(), kind, MutationPayload::Empty)
            .propagating(
                entity,
                delta(move |item| {
                    item.map_review(|review| {
                        if review.is_liked == liked {
                            return review.clone();
                        }
                        let like_count = if liked {
                            review.like_count.saturating_add(1)
                        } else {
                            review.like_count.saturating_sub(1)
                        };
                        Review {
                            like_count,
                            is_liked: liked,
                            ..review.clone()
                        }
                    })
                }),
            )
            .on_settle(move |server, _, entry| {
                let fresh = server.item.as_ref()?.as_review()?.clone();
                rewrite_review(entry, &settled_id, |review| Review {
                    like_count: fresh.like_count,
                    is_liked: fresh.is_liked,
                    ..review.clone()
                })
            });

        Ok(self.coordinator.run(spec))
    }

    /// Post a comment. It shows up at the head of the review's comment list
    /// under a temporary id until the server assigns the real one.
    pub fn add_comment(&self, review_id: &str, body: &str) -> Result<MutationHandle, SyncError> {
        let review_id = non_empty(review_id, "review id")?;
        let body = body.trim();
        if body.is_empty() {
            return Err(SyncError::validation("comment body required"));
        }
        if body.chars().count() > MAX_COMMENT_CHARS {
            return Err(SyncError::validation(format!(
                "comment exceeds {MAX_COMMENT_CHARS} characters"
            )));
        }

        let temp_id = temp_id();
        let placeholder = Item::Comment(Comment {
            id: temp_id.clone(),
            review_id: review_id.clone(),
            author: self.viewer.clone(),
            body: body.to_string(),
            pending: true,
            updated_at: None,
        });

        let spec = self
            .remote(
                EntityRef::comment(temp_id.as_str()),
                MutationKind::AddComment,
                MutationPayload::Comment {
                    review_id: review_id.clone(),
                    body: body.to_string(),
                },
            )
            .touching(comments_key(&review_id))
            .optimistic(move |_, entry| prepend_item(entry, placeholder.clone()))
            .propagating(
                EntityRef::review(review_id.as_str()),
                delta(|item| {
                    item.map_review(|review| Review {
                        comment_count: review.comment_count.saturating_add(1),
                        ..review.clone()
                    })
                }),
            )
            .on_settle(move |server, key, entry| {
                if key.family_name() != Some(family::REVIEW_COMMENTS) {
                    return None;
                }
                let confirmed = match server.item.as_ref().and_then(Item::as_comment) {
                    Some(comment) => Item::Comment(comment.clone()),
                    None => Item::Comment(Comment {
                        pending: false,
                        ..entry
                            .items()
                            .find_map(|item| item.as_comment().filter(|c| c.id == temp_id))?
                            .clone()
                    }),
                };
                entry.map_items(|item| match item {
                    Item::Comment(comment) if comment.id == temp_id => Some(confirmed.clone()),
                    _ => None,
                })
            });

        Ok(self.coordinator.run(spec))
    }

    pub fn delete_comment(
        &self,
        review_id: &str,
        comment_id: &str,
    ) -> Result<MutationHandle, SyncError> {
        let review_id = non_empty(review_id, "review id")?;
        let comment_id = non_empty(comment_id, "comment id")?;
        if comment_id.starts_with(TEMP_ID_PREFIX) {
            return Err(SyncError::validation("comment is still being posted"));
        }
        let entity = EntityRef::comment(comment_id.as_str());

        let removed = entity.clone();
        let spec = self
            .remote(entity, MutationKind::DeleteComment, MutationPayload::Empty)
            .touching(comments_key(&review_id))
            .optimistic(move |_, entry| remove_item(entry, &removed))
            .propagating(
                EntityRef::review(review_id.as_str()),
                delta(|item| {
                    item.map_review(|review| Review {
                        comment_count: review.comment_count.saturating_sub(1),
                        ..review.clone()
                    })
                }),
            );

        Ok(self.coordinator.run(spec))
    }

    /// Rate a book from 1 to 5 stars. `None` is rejected.
    pub fn set_rating(&self, isbn: &str, score: Option<u8>) -> Result<MutationHandle, SyncError> {
        let isbn = non_empty(isbn, "isbn")?;
        let score = score.ok_or_else(|| SyncError::validation("rating required"))?;
        if !(1..=5).contains(&score) {
            return Err(SyncError::validation(format!(
                "rating must be between 1 and 5, got {score}"
            )));
        }

        let entity = EntityRef::book(isbn.as_str());
        let spec = self
            .remote(
                entity.clone(),
                MutationKind::SetRating,
                MutationPayload::Rating { score },
            )
            .propagating(
                entity,
                delta(move |item| {
                    item.map_book(|book| Book {
                        my_rating: Some(score),
                        ..book.clone()
                    })
                }),
            );

        Ok(self.coordinator.run(spec))
    }

    pub fn set_reading_status(
        &self,
        isbn: &str,
        status: ReadingStatus,
    ) -> Result<MutationHandle, SyncError> {
        let isbn = non_empty(isbn, "isbn")?;
        let entity = EntityRef::book(isbn.as_str());
        let spec = self
            .remote(
                entity.clone(),
                MutationKind::SetReadingStatus,
                MutationPayload::ReadingStatus { status },
            )
            .propagating(
                entity,
                delta(move |item| {
                    item.map_book(|book| Book {
                        reading_status: Some(status),
                        ..book.clone()
                    })
                }),
            );

        Ok(self.coordinator.run(spec))
    }

    /// Create a library. Every cached library list shows it immediately.
    pub fn create_library(&self, name: &str, is_public: bool) -> Result<MutationHandle, SyncError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::validation("library name required"));
        }
        if name.chars().count() > MAX_LIBRARY_NAME_CHARS {
            return Err(SyncError::validation(format!(
                "library name exceeds {MAX_LIBRARY_NAME_CHARS} characters"
            )));
        }

        let temp_id = temp_id();
        let placeholder = Item::Library(Library {
            id: temp_id.clone(),
            name: name.to_string(),
            book_count: 0,
            is_public,
            pending: true,
            updated_at: None,
        });

        let spec = self
            .remote(
                EntityRef::library(temp_id.as_str()),
                MutationKind::CreateLibrary,
                MutationPayload::Library {
                    name: name.to_string(),
                    is_public,
                },
            )
            .touching_all(self.library_list_keys())
            .optimistic(move |_, entry| prepend_item(entry, placeholder.clone()))
            .on_settle(move |server, _, entry| {
                let created = server.item.as_ref().and_then(Item::as_library);
                entry.map_items(|item| match item {
                    Item::Library(library) if library.id == temp_id => Some(match created {
                        Some(created) => Item::Library(created.clone()),
                        None => Item::Library(Library {
                            pending: false,
                            ..library.clone()
                        }),
                    }),
                    _ => None,
                })
            });

        Ok(self.coordinator.run(spec))
    }

    pub fn delete_library(&self, library_id: &str) -> Result<MutationHandle, SyncError> {
        let library_id = non_empty(library_id, "library id")?;
        let entity = EntityRef::library(library_id.as_str());

        let removed = entity.clone();
        let spec = self
            .remote(entity, MutationKind::DeleteLibrary, MutationPayload::Empty)
            .touching_all(self.library_list_keys())
            .optimistic(move |_, entry| remove_item(entry, &removed));

        Ok(self.coordinator.run(spec))
    }

    fn remote(&self, entity: EntityRef, kind: MutationKind, payload: MutationPayload) -> MutationSpec {
        let mutator = Arc::clone(&self.mutator);
        let target = entity.clone();
        MutationSpec::new(entity, kind, move || async move {
            mutator.mutate(&target, kind, payload).await
        })
    }

    fn library_list_keys(&self) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = self
            .store
            .keys()
            .into_iter()
            .filter(|key| key.family_name() == Some(family::LIBRARIES))
            .collect();
        keys.sort_by_key(ToString::to_string);
        keys
    }
}

/// `["review-comments", review_id]`
pub fn comments_key(review_id: &str) -> QueryKey {
    QueryKey::family(family::REVIEW_COMMENTS).with(review_id)
}

/// Rewrite review `review_id` wherever it appears in `entry`, embedded in an
/// activity or not.
pub fn rewrite_review(
    entry: &CacheEntry,
    review_id: &str,
    f: impl Fn(&Review) -> Review,
) -> Option<CacheEntry> {
    entry.map_items(|item| match item {
        Item::Review(review) if review.id == review_id => Some(Item::Review(f(review))),
        Item::Activity(activity) if activity.review.id == review_id => {
            Some(Item::Activity(ActivityEntry {
                review: f(&activity.review),
                ..activity.clone()
            }))
        }
        _ => None,
    })
}

fn temp_id() -> String {
    format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4())
}

fn non_empty(value: &str, what: &str) -> Result<String, SyncError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(SyncError::validation(format!("{what} required")));
    }
    Ok(value.to_string())
}
