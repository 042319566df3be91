//! Properties the sync layer guarantees regardless of timing or order.

mod support;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shelfsync::SyncClient;
use shelfsync::application::error::{RemoteError, SyncError};
use shelfsync::application::mutation::MutationHandle;
use shelfsync::application::query::{FetchOutcome, FetcherRegistry, PageFetcher};
use shelfsync::cache::pagination::{append_page, flatten};
use shelfsync::cache::{CacheEntry, KeySegment, Page, QueryKey, SyncConfig, family};
use shelfsync_types::{EntityRef, Item, MutationKind, ReadingStatus};

use support::{book, bookshelf, comment, harness, review_42_feeds, review_copies};

fn comments(ids: &[u32]) -> Vec<Item> {
    ids.iter()
        .map(|n| Item::Comment(comment(&format!("c{n}"), "42")))
        .collect()
}

fn permutations(len: usize) -> Vec<Vec<usize>> {
    if len == 0 {
        return vec![Vec::new()];
    }
    let mut out = Vec::new();
    for rest in permutations(len - 1) {
        for slot in 0..=rest.len() {
            let mut order = rest.clone();
            order.insert(slot, len - 1);
            out.push(order);
        }
    }
    out
}

#[test]
fn replayed_pages_keep_each_item_once() {
    let pages = [
        Page::new(comments(&[1, 2, 3]), Some("p2".to_string())),
        Page::new(comments(&[3, 4, 5]), Some("p3".to_string())),
        Page::terminal(comments(&[5, 6, 1])),
    ];

    for order in permutations(pages.len()) {
        let mut entry = CacheEntry::empty();
        // every page twice, in this order
        for &index in order.iter().chain(order.iter()) {
            entry = append_page(&entry, pages[index].clone());
        }

        let mut seen = HashMap::new();
        for item in flatten(&entry) {
            *seen.entry(item.entity_ref()).or_insert(0) += 1;
        }
        assert_eq!(seen.len(), 6, "order {order:?}");
        assert!(seen.values().all(|count| *count == 1), "order {order:?}");
    }
}

#[tokio::test]
async fn failed_mutations_restore_entries_exactly() {
    let h = harness(bookshelf());
    let mut keys = review_42_feeds();
    keys.push(QueryKey::family(family::REVIEW_COMMENTS).with("42"));
    keys.push(QueryKey::family(family::BOOK_SEARCH).with("dune"));
    for key in &keys {
        h.client.query().ensure(key).await.expect("loaded");
    }
    let snapshot = || -> Vec<_> { keys.iter().map(|key| h.client.store().get(key)).collect() };

    let actions = h.client.actions();
    let attempts: Vec<(MutationKind, Box<dyn Fn() -> Result<MutationHandle, SyncError>>)> = vec![
        (MutationKind::Like, Box::new(|| actions.like_review("42"))),
        (MutationKind::Like, Box::new(|| actions.like_review("43"))),
        (MutationKind::AddComment, Box::new(|| actions.add_comment("42", "first!"))),
        (MutationKind::DeleteComment, Box::new(|| actions.delete_comment("42", "c2"))),
        (
            MutationKind::SetRating,
            Box::new(|| actions.set_rating("9780441013593", Some(5))),
        ),
        (
            MutationKind::SetReadingStatus,
            Box::new(|| actions.set_reading_status("9780441013593", ReadingStatus::Reading)),
        ),
    ];

    for (kind, attempt) in attempts {
        let before = snapshot();
        h.backend
            .fail_next(kind, RemoteError::server(503, "unavailable"));

        let handle = attempt().expect("valid");
        assert_ne!(snapshot(), before, "{kind} wrote no optimistic state");
        assert!(handle.await.is_err(), "{kind} should fail");

        assert_eq!(snapshot(), before, "{kind} left residue");
    }
}

#[tokio::test]
async fn settled_like_leaves_no_stale_copy() {
    let h = harness(bookshelf());
    for key in review_42_feeds() {
        h.client.query().ensure(&key).await.expect("loaded");
    }

    h.client
        .actions()
        .like_review("42")
        .expect("valid")
        .await
        .expect("liked");

    let mut copies = 0;
    for (key, entry) in h.client.store().entries_matching(|_| true) {
        for copy in review_copies(&entry, "42") {
            copies += 1;
            assert_eq!((copy.like_count, copy.is_liked), (4, true), "stale copy in {key}");
        }
    }
    assert_eq!(copies, review_42_feeds().len());
}

#[tokio::test]
async fn concurrent_runs_share_one_remote_call() {
    let h = harness(bookshelf());
    h.client
        .query()
        .ensure(&QueryKey::family(family::COMMUNITY_REVIEWS))
        .await
        .expect("loaded");

    let first = h.client.actions().like_review("42").expect("valid");
    let second = h.client.actions().like_review("42").expect("valid");
    assert!(!first.is_deduplicated());
    assert!(second.is_deduplicated());
    assert_eq!(first.mutation_id(), second.mutation_id());
    assert!(h.client.mutations().is_pending(&EntityRef::review("42"), MutationKind::Like));

    let (a, b) = tokio::join!(first, second);
    assert_eq!(a.expect("first"), b.expect("second"));
    assert_eq!(h.mutator.calls(), 1);
    assert_eq!(h.backend.snapshot().reviews[0].like_count, 4);
}

/// Search backend whose latency depends on the query.
struct SlowPrefixes {
    delays: HashMap<&'static str, Duration>,
}

#[async_trait]
impl PageFetcher for SlowPrefixes {
    async fn fetch_page(&self, key: &QueryKey, _cursor: Option<&str>) -> Result<Page, RemoteError> {
        let query = match key.segments().get(1) {
            Some(KeySegment::Str(query)) => query.clone(),
            _ => String::new(),
        };
        if let Some(delay) = self.delays.get(query.as_str()) {
            tokio::time::sleep(*delay).await;
        }
        Ok(Page::terminal(vec![Item::Book(book(
            &format!("isbn-{query}"),
            &format!("title {query}"),
        ))]))
    }
}

#[tokio::test(start_paused = true)]
async fn slow_earlier_search_never_becomes_visible() {
    let fetcher = Arc::new(SlowPrefixes {
        delays: HashMap::from([
            ("a", Duration::from_millis(800)),
            ("ab", Duration::from_millis(50)),
        ]),
    });
    let backend = Arc::new(shelfsync::infra::fixture::FixtureBackend::new(bookshelf()));
    let client = SyncClient::new(
        SyncConfig::default(),
        FetcherRegistry::new().register(family::BOOK_SEARCH, fetcher),
        backend.clone(),
        backend.viewer(),
    );
    let search = client.book_search();
    let seen = Arc::new(std::sync::Mutex::new(Vec::<Vec<Item>>::new()));
    let recorder = Arc::clone(&seen);
    search.on_results(move |items| recorder.lock().expect("lock").push(items.to_vec()));

    search.on_input("a");
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(search.is_loading());
    search.on_input("ab");

    let outcome = search.wait_settled().await.expect("committed");
    assert!(matches!(outcome, Ok(FetchOutcome::Stored(_))));
    tokio::time::sleep(Duration::from_secs(2)).await;

    let titles: Vec<String> = search
        .results()
        .iter()
        .filter_map(|item| item.as_book().map(|book| book.title.clone()))
        .collect();
    assert_eq!(titles, vec!["title ab".to_string()]);

    let stale = client
        .store()
        .get(&QueryKey::family(family::BOOK_SEARCH).with("a"));
    assert!(stale.is_none_or(|entry| flatten(&entry).is_empty()));
    assert!(
        seen.lock()
            .expect("lock")
            .iter()
            .flatten()
            .all(|item| item.as_book().is_some_and(|book| book.title == "title ab"))
    );
}
