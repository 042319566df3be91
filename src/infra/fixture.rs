//! In-process backend served from a JSON fixture.
//!
//! Backs the command line and the integration tests. Lists are paginated by
//! offset cursors; mutations update the fixture state and echo the stored
//! entity the way the real endpoints do.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shelfsync_types::{
    ActivityEntry, Book, Comment, EntityKind, EntityRef, Item, Library, MutationKind,
    MutationPayload, Review, ServerResult, UserSummary,
};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::application::error::RemoteError;
use crate::application::mutation::Mutator;
use crate::application::query::{FetcherRegistry, PageFetcher};
use crate::cache::{KeySegment, Page, QueryKey, family, mutex_lock};

use super::error::InfraError;

const SOURCE: &str = "infra::fixture";
const DEFAULT_PAGE_SIZE: usize = 20;

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

/// Serialized backend state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureData {
    pub viewer: UserSummary,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub activity: Vec<ActivityEntry>,
    #[serde(default)]
    pub reviews: Vec<Review>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub books: Vec<Book>,
    #[serde(default)]
    pub libraries: Vec<Library>,
}

impl FixtureData {
    pub fn new(viewer: UserSummary) -> Self {
        Self {
            viewer,
            page_size: DEFAULT_PAGE_SIZE,
            activity: Vec::new(),
            reviews: Vec::new(),
            comments: Vec::new(),
            books: Vec::new(),
            libraries: Vec::new(),
        }
    }
}

/// Scripted failure for the next mutation of one kind.
#[derive(Debug, Clone)]
struct Failure {
    kind: MutationKind,
    error: RemoteError,
}

pub struct FixtureBackend {
    data: Mutex<FixtureData>,
    latency: Duration,
    comment_page_size: Option<usize>,
    failures: Mutex<Vec<Failure>>,
}

impl FixtureBackend {
    pub fn new(data: FixtureData) -> Self {
        Self {
            data: Mutex::new(data),
            latency: Duration::ZERO,
            comment_page_size: None,
            failures: Mutex::new(Vec::new()),
        }
    }

    pub async fn load(path: &Path) -> Result<Self, InfraError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let data: FixtureData = serde_json::from_str(&raw).map_err(|err| {
            InfraError::fixture(format!("{}: {err}", path.display()))
        })?;
        if data.page_size == 0 {
            return Err(InfraError::fixture(format!(
                "{}: page_size must be greater than zero",
                path.display()
            )));
        }
        debug!(
            path = %path.display(),
            reviews = data.reviews.len(),
            books = data.books.len(),
            "Loaded fixture"
        );
        Ok(Self::new(data))
    }

    /// Delay every request by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Page size for comment lists. Other lists use the fixture's `page_size`.
    pub fn with_comment_page_size(mut self, page_size: usize) -> Self {
        self.comment_page_size = Some(page_size.max(1));
        self
    }

    /// Make the next mutation of `kind` fail with `error`.
    pub fn fail_next(&self, kind: MutationKind, error: RemoteError) {
        mutex_lock(&self.failures, SOURCE, "fail_next").push(Failure { kind, error });
    }

    pub fn viewer(&self) -> UserSummary {
        mutex_lock(&self.data, SOURCE, "viewer").viewer.clone()
    }

    pub fn snapshot(&self) -> FixtureData {
        mutex_lock(&self.data, SOURCE, "snapshot").clone()
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn take_failure(&self, kind: MutationKind) -> Option<RemoteError> {
        let mut failures = mutex_lock(&self.failures, SOURCE, "take_failure");
        let index = failures.iter().position(|failure| failure.kind == kind)?;
        Some(failures.remove(index).error)
    }

    fn list(&self, key: &QueryKey) -> Result<Vec<Item>, RemoteError> {
        let data = mutex_lock(&self.data, SOURCE, "list");
        let name = key.family_name().unwrap_or_default();
        let arg = string_arg(key, 1);

        let items = match name {
            family::HOME_FEED => data
                .activity
                .iter()
                .map(|activity| Item::Activity(with_live_review(activity, &data.reviews)))
                .collect(),
            family::COMMUNITY_REVIEWS => data.reviews.iter().cloned().map(Item::Review).collect(),
            family::BOOK_REVIEWS => {
                let isbn = require(arg, key)?;
                data.reviews
                    .iter()
                    .filter(|review| review.book_id == isbn)
                    .cloned()
                    .map(Item::Review)
                    .collect()
            }
            family::USER_REVIEWS => {
                let user = require(arg, key)?;
                data.reviews
                    .iter()
                    .filter(|review| review.author.id == user)
                    .cloned()
                    .map(Item::Review)
                    .collect()
            }
            family::REVIEW => {
                let id = require(arg, key)?;
                data.reviews
                    .iter()
                    .filter(|review| review.id == id)
                    .cloned()
                    .map(Item::Review)
                    .collect()
            }
            family::REVIEW_COMMENTS => {
                let id = require(arg, key)?;
                data.comments
                    .iter()
                    .filter(|comment| comment.review_id == id)
                    .cloned()
                    .map(Item::Comment)
                    .collect()
            }
            family::LIBRARIES => data.libraries.iter().cloned().map(Item::Library).collect(),
            family::LIBRARY => {
                let id = require(arg, key)?;
                data.libraries
                    .iter()
                    .filter(|library| library.id == id)
                    .cloned()
                    .map(Item::Library)
                    .collect()
            }
            family::BOOK_SEARCH => {
                let needle = require(arg, key)?.to_lowercase();
                data.books
                    .iter()
                    .filter(|book| {
                        book.title.to_lowercase().contains(&needle)
                            || book
                                .authors
                                .iter()
                                .any(|author| author.to_lowercase().contains(&needle))
                    })
                    .cloned()
                    .map(Item::Book)
                    .collect()
            }
            family::BOOK => {
                let isbn = require(arg, key)?;
                data.books
                    .iter()
                    .filter(|book| book.isbn == isbn)
                    .cloned()
                    .map(Item::Book)
                    .collect()
            }
            other => {
                return Err(RemoteError::server(404, format!("unknown query family `{other}`")));
            }
        };
        Ok(items)
    }

    fn apply(
        &self,
        entity: &EntityRef,
        kind: MutationKind,
        payload: MutationPayload,
    ) -> Result<ServerResult, RemoteError> {
        let mut guard = mutex_lock(&self.data, SOURCE, "apply");
        let data = &mut *guard;
        let now = Some(OffsetDateTime::now_utc());
        let id = entity.id.as_str();

        match (kind, payload) {
            (MutationKind::Like | MutationKind::Unlike, _) => {
                expect_kind(entity, EntityKind::Review)?;
                let liked = kind == MutationKind::Like;
                let review = find_mut(&mut data.reviews, |review| review.id == id, entity)?;
                if review.is_liked != liked {
                    review.is_liked = liked;
                    review.like_count = if liked {
                        review.like_count.saturating_add(1)
                    } else {
                        review.like_count.saturating_sub(1)
                    };
                    review.updated_at = now;
                }
                Ok(ServerResult::with_item(Item::Review(review.clone())))
            }
            (MutationKind::AddComment, MutationPayload::Comment { review_id, body }) => {
                let author = data.viewer.clone();
                let review = find_mut(
                    &mut data.reviews,
                    |review| review.id == review_id,
                    &EntityRef::review(review_id.as_str()),
                )?;
                review.comment_count = review.comment_count.saturating_add(1);
                let comment = Comment {
                    id: format!("c-{}", Uuid::new_v4().simple()),
                    review_id,
                    author,
                    body,
                    pending: false,
                    updated_at: now,
                };
                data.comments.insert(0, comment.clone());
                Ok(ServerResult::with_item(Item::Comment(comment)))
            }
            (MutationKind::DeleteComment, _) => {
                expect_kind(entity, EntityKind::Comment)?;
                let before = data.comments.len();
                let mut review_id = None;
                data.comments.retain(|comment| {
                    if comment.id == id {
                        review_id = Some(comment.review_id.clone());
                        false
                    } else {
                        true
                    }
                });
                if data.comments.len() == before {
                    return Err(not_found(entity));
                }
                if let Some(review_id) = review_id
                    && let Some(review) = data.reviews.iter_mut().find(|review| review.id == review_id)
                {
                    review.comment_count = review.comment_count.saturating_sub(1);
                }
                Ok(ServerResult::empty())
            }
            (MutationKind::SetRating, MutationPayload::Rating { score }) => {
                expect_kind(entity, EntityKind::Book)?;
                let book = find_mut(&mut data.books, |book| book.isbn == id, entity)?;
                book.my_rating = Some(score);
                Ok(ServerResult::with_item(Item::Book(book.clone())))
            }
            (MutationKind::SetReadingStatus, MutationPayload::ReadingStatus { status }) => {
                expect_kind(entity, EntityKind::Book)?;
                let book = find_mut(&mut data.books, |book| book.isbn == id, entity)?;
                book.reading_status = Some(status);
                Ok(ServerResult::with_item(Item::Book(book.clone())))
            }
            (MutationKind::CreateLibrary, MutationPayload::Library { name, is_public }) => {
                let library = Library {
                    id: format!("lib-{}", Uuid::new_v4().simple()),
                    name,
                    book_count: 0,
                    is_public,
                    pending: false,
                    updated_at: now,
                };
                data.libraries.insert(0, library.clone());
                Ok(ServerResult::with_item(Item::Library(library)))
            }
            (MutationKind::DeleteLibrary, _) => {
                expect_kind(entity, EntityKind::Library)?;
                let before = data.libraries.len();
                data.libraries.retain(|library| library.id != id);
                if data.libraries.len() == before {
                    return Err(not_found(entity));
                }
                Ok(ServerResult::empty())
            }
            (kind, payload) => Err(RemoteError::server(
                422,
                format!("payload {payload:?} does not fit {kind}"),
            )),
        }
    }
}

#[async_trait]
impl PageFetcher for FixtureBackend {
    async fn fetch_page(&self, key: &QueryKey, cursor: Option<&str>) -> Result<Page, RemoteError> {
        self.simulate_latency().await;

        let offset = match cursor {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| RemoteError::server(400, format!("invalid cursor `{cursor}`")))?,
            None => 0,
        };
        let items = self.list(key)?;
        let page_size = match self.comment_page_size {
            Some(size) if key.family_name() == Some(family::REVIEW_COMMENTS) => size,
            _ => mutex_lock(&self.data, SOURCE, "page_size").page_size.max(1),
        };

        let end = items.len().min(offset.saturating_add(page_size));
        let next_cursor = (end < items.len()).then(|| end.to_string());
        let page = items.get(offset..end).map(<[Item]>::to_vec).unwrap_or_default();
        debug!(key = %key, offset, returned = page.len(), "Served fixture page");
        Ok(Page::new(page, next_cursor))
    }
}

#[async_trait]
impl Mutator for FixtureBackend {
    async fn mutate(
        &self,
        entity: &EntityRef,
        kind: MutationKind,
        payload: MutationPayload,
    ) -> Result<ServerResult, RemoteError> {
        self.simulate_latency().await;
        if let Some(error) = self.take_failure(kind) {
            return Err(error);
        }
        self.apply(entity, kind, payload)
    }
}

/// Register `backend` for every query family it serves.
pub fn fetchers(backend: Arc<FixtureBackend>) -> FetcherRegistry {
    let paged = [
        family::HOME_FEED,
        family::COMMUNITY_REVIEWS,
        family::BOOK_REVIEWS,
        family::USER_REVIEWS,
        family::REVIEW_COMMENTS,
        family::LIBRARIES,
        family::BOOK_SEARCH,
    ];
    let single = [family::REVIEW, family::LIBRARY, family::BOOK];

    let registry = paged.into_iter().fold(FetcherRegistry::new(), |registry, name| {
        registry.register(name, backend.clone())
    });
    single.into_iter().fold(registry, |registry, name| {
        registry.register_single(name, backend.clone())
    })
}

fn string_arg(key: &QueryKey, index: usize) -> Option<&str> {
    match key.segments().get(index) {
        Some(KeySegment::Str(value)) => Some(value.as_str()),
        _ => None,
    }
}

fn require<'a>(arg: Option<&'a str>, key: &QueryKey) -> Result<&'a str, RemoteError> {
    arg.ok_or_else(|| RemoteError::server(400, format!("missing argument in {key}")))
}

fn expect_kind(entity: &EntityRef, kind: EntityKind) -> Result<(), RemoteError> {
    if entity.kind == kind {
        Ok(())
    } else {
        Err(RemoteError::server(400, format!("{entity} is not a {kind}")))
    }
}

fn find_mut<'a, T>(
    items: &'a mut [T],
    predicate: impl Fn(&T) -> bool,
    entity: &EntityRef,
) -> Result<&'a mut T, RemoteError> {
    items
        .iter_mut()
        .find(|item| predicate(item))
        .ok_or_else(|| not_found(entity))
}

fn not_found(entity: &EntityRef) -> RemoteError {
    RemoteError::server(404, format!("{entity} not found"))
}

/// Activity rows embed the review as it was when the fixture was written.
fn with_live_review(activity: &ActivityEntry, reviews: &[Review]) -> ActivityEntry {
    match reviews.iter().find(|review| review.id == activity.review.id) {
        Some(review) => ActivityEntry {
            review: review.clone(),
            ..activity.clone()
        },
        None => activity.clone(),
    }
}
