//! Shared builders for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use shelfsync::SyncClient;
use shelfsync::application::error::RemoteError;
use shelfsync::application::mutation::Mutator;
use shelfsync::cache::{CacheEntry, QueryKey, SyncConfig, family};
use shelfsync::infra::fixture::{self, FixtureBackend, FixtureData};
use shelfsync_types::{
    ActivityEntry, Book, Comment, EntityRef, Item, MutationKind, MutationPayload, Review,
    ServerResult, UserSummary,
};

pub fn user(id: &str) -> UserSummary {
    UserSummary {
        id: id.to_string(),
        nickname: format!("{id}-nick"),
    }
}

pub fn review(id: &str, book_id: &str, author: &str) -> Review {
    Review {
        id: id.to_string(),
        book_id: book_id.to_string(),
        author: user(author),
        rating: Some(4),
        body: format!("thoughts on {book_id}"),
        like_count: 3,
        is_liked: false,
        comment_count: 0,
        book: None,
        updated_at: None,
    }
}

pub fn book(isbn: &str, title: &str) -> Book {
    Book {
        isbn: isbn.to_string(),
        title: title.to_string(),
        authors: vec!["Frank Herbert".to_string()],
        cover_url: None,
        reading_status: None,
        my_rating: None,
    }
}

pub fn comment(id: &str, review_id: &str) -> Comment {
    Comment {
        id: id.to_string(),
        review_id: review_id.to_string(),
        author: user("u2"),
        body: format!("comment {id}"),
        pending: false,
        updated_at: None,
    }
}

/// Review 42 (3 likes, not liked) appears in the home feed, the community
/// feed, its book's feed, its author's feed and its detail view.
pub fn bookshelf() -> FixtureData {
    let mut data = FixtureData::new(user("me"));
    data.reviews = vec![
        review("42", "9780441013593", "u1"),
        review("43", "9780441013593", "u2"),
        review("44", "9780553283686", "u1"),
    ];
    data.activity = vec![
        ActivityEntry {
            id: "a1".to_string(),
            actor: user("u1"),
            review: review("42", "9780441013593", "u1"),
        },
        ActivityEntry {
            id: "a2".to_string(),
            actor: user("u2"),
            review: review("43", "9780441013593", "u2"),
        },
    ];
    data.books = vec![
        book("9780441013593", "Dune"),
        book("9780441172696", "Dune Messiah"),
        book("9780553283686", "Hyperion"),
    ];
    data.comments = (1..=3).map(|n| comment(&format!("c{n}"), "42")).collect();
    data
}

/// Every cached view of review 42.
pub fn review_42_feeds() -> Vec<QueryKey> {
    vec![
        QueryKey::family(family::HOME_FEED),
        QueryKey::family(family::COMMUNITY_REVIEWS),
        QueryKey::family(family::BOOK_REVIEWS).with("9780441013593"),
        QueryKey::family(family::USER_REVIEWS).with("u1"),
        QueryKey::family(family::REVIEW).with("42"),
    ]
}

/// Mutator that counts calls before delegating.
pub struct CountingMutator {
    pub inner: Arc<FixtureBackend>,
    pub calls: AtomicUsize,
}

impl CountingMutator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mutator for CountingMutator {
    async fn mutate(
        &self,
        entity: &EntityRef,
        kind: MutationKind,
        payload: MutationPayload,
    ) -> Result<ServerResult, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.mutate(entity, kind, payload).await
    }
}

pub struct Harness {
    pub client: SyncClient,
    pub backend: Arc<FixtureBackend>,
    pub mutator: Arc<CountingMutator>,
}

pub fn harness(data: FixtureData) -> Harness {
    harness_with(FixtureBackend::new(data))
}

pub fn harness_with(backend: FixtureBackend) -> Harness {
    let backend = Arc::new(backend);
    let mutator = Arc::new(CountingMutator {
        inner: Arc::clone(&backend),
        calls: AtomicUsize::new(0),
    });
    let client = SyncClient::new(
        SyncConfig::default(),
        fixture::fetchers(Arc::clone(&backend)),
        mutator.clone(),
        backend.viewer(),
    );
    Harness {
        client,
        backend,
        mutator,
    }
}

/// Copies of review `id` held by `entry`, embedded or not.
pub fn review_copies(entry: &CacheEntry, id: &str) -> Vec<Review> {
    entry
        .items()
        .filter_map(|item| match item {
            Item::Review(review) if review.id == id => Some(review.clone()),
            Item::Activity(activity) if activity.review.id == id => Some(activity.review.clone()),
            _ => None,
        })
        .collect()
}
