//! Fetch path: fills the store from backend pages.
//!
//! Reads serve cached data while it is fresh. Otherwise the first page is
//! refetched while the old data stays readable (stale-while-revalidate) and
//! survives a failed refetch (stale-while-erroring). At most one fetch runs
//! per key; a result landing after [`CacheStore::reset`] is discarded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::{counter, histogram};
use time::OffsetDateTime;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::application::error::{ErrorReport, FetchError, RemoteError};
use crate::cache::pagination::{append_page, has_next_page, next_cursor, replace_all};
use crate::cache::{CacheEntry, CacheStore, FetchStatus, Page, QueryKey};

const METRIC_FETCH_TOTAL: &str = "shelfsync_fetch_total";
const METRIC_FETCH_DISCARDED_TOTAL: &str = "shelfsync_fetch_discarded_total";
const METRIC_FETCH_DURATION_MS: &str = "shelfsync_fetch_duration_ms";

/// Backend source of pages for one query family.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, key: &QueryKey, cursor: Option<&str>) -> Result<Page, RemoteError>;
}

/// How a family's results are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    /// Cursor-paginated list.
    Paged,
    /// A single value: the first item of the first page.
    Single,
}

#[derive(Clone)]
struct Registered {
    fetcher: Arc<dyn PageFetcher>,
    shape: ResultShape,
}

/// Page fetchers keyed by query family name.
#[derive(Clone, Default)]
pub struct FetcherRegistry {
    fetchers: HashMap<String, Registered>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(self, family: &str, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.register_shaped(family, fetcher, ResultShape::Paged)
    }

    pub fn register_single(self, family: &str, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.register_shaped(family, fetcher, ResultShape::Single)
    }

    fn register_shaped(
        mut self,
        family: &str,
        fetcher: Arc<dyn PageFetcher>,
        shape: ResultShape,
    ) -> Self {
        self.fetchers
            .insert(family.to_string(), Registered { fetcher, shape });
        self
    }

    pub fn shape_of(&self, key: &QueryKey) -> Option<ResultShape> {
        let family = key.family_name()?;
        self.fetchers.get(family).map(|registered| registered.shape)
    }

    fn lookup(&self, key: &QueryKey) -> Result<&Registered, FetchError> {
        key.family_name()
            .and_then(|family| self.fetchers.get(family))
            .ok_or_else(|| FetchError::NoFetcher {
                family: key.family_name().unwrap_or_default().to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The last stored page has no cursor (or nothing was fetched yet).
    NoMorePages,
    /// Another fetch for the same key is running.
    AlreadyFetching,
}

/// Result of a read through the query layer.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Cached data was fresh; nothing was fetched.
    Fresh(Arc<CacheEntry>),
    /// A page was fetched and written.
    Stored(Arc<CacheEntry>),
    Skipped(SkipReason),
    /// The result arrived after being superseded and was dropped unwritten.
    Discarded,
}

impl FetchOutcome {
    pub fn entry(&self) -> Option<&Arc<CacheEntry>> {
        match self {
            FetchOutcome::Fresh(entry) | FetchOutcome::Stored(entry) => Some(entry),
            FetchOutcome::Skipped(_) | FetchOutcome::Discarded => None,
        }
    }

    pub fn is_discarded(&self) -> bool {
        matches!(self, FetchOutcome::Discarded)
    }
}

/// Tracks keys that currently have a fetch running. Each running fetch owns a
/// [`Notify`] that wakes [`released`](Self::released) waiters when it ends.
#[derive(Default, Clone)]
pub struct InFlightFetches {
    keys: Arc<DashMap<QueryKey, Arc<Notify>>>,
}

impl InFlightFetches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, key: &QueryKey) -> Option<FetchGuard> {
        use dashmap::mapref::entry::Entry;

        match self.keys.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(Notify::new()));
                Some(FetchGuard {
                    key: key.clone(),
                    keys: Arc::clone(&self.keys),
                })
            }
            Entry::Occupied(_) => None,
        }
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.keys.contains_key(key)
    }

    /// Resolve once the fetch running for `key`, if any, has ended.
    pub async fn released(&self, key: &QueryKey) {
        let Some(done) = self.keys.get(key).map(|running| Arc::clone(running.value())) else {
            return;
        };
        let notified = done.notified();
        // the guard may have dropped between the lookup and registering
        let still_running = self
            .keys
            .get(key)
            .is_some_and(|running| Arc::ptr_eq(running.value(), &done));
        if still_running {
            notified.await;
        }
    }
}

pub struct FetchGuard {
    key: QueryKey,
    keys: Arc<DashMap<QueryKey, Arc<Notify>>>,
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        if let Some((_, done)) = self.keys.remove(&self.key) {
            done.notify_waiters();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    First,
    Next,
}

impl FetchMode {
    fn as_str(self) -> &'static str {
        match self {
            FetchMode::First => "first",
            FetchMode::Next => "next",
        }
    }
}

/// Read side of the sync layer.
#[derive(Clone)]
pub struct QueryClient {
    store: Arc<CacheStore>,
    fetchers: Arc<FetcherRegistry>,
    inflight: InFlightFetches,
    stale_time: Duration,
}

impl QueryClient {
    pub fn new(store: Arc<CacheStore>, fetchers: Arc<FetcherRegistry>, stale_time: Duration) -> Self {
        Self {
            store,
            fetchers,
            inflight: InFlightFetches::new(),
            stale_time,
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.inflight.is_fetching(key)
    }

    /// Wait for the fetch currently running for `key` to end. Returns at once
    /// when none is.
    pub async fn wait_released(&self, key: &QueryKey) {
        self.inflight.released(key).await;
    }

    /// Serve the cached entry when fresh, refetch otherwise.
    pub async fn ensure(&self, key: &QueryKey) -> Result<FetchOutcome, FetchError> {
        self.ensure_if(key, || true).await
    }

    /// [`ensure`](Self::ensure) whose fetched result is dropped unless
    /// `still_current` holds when it lands.
    pub async fn ensure_if<F>(&self, key: &QueryKey, still_current: F) -> Result<FetchOutcome, FetchError>
    where
        F: Fn() -> bool + Send + Sync,
    {
        if let Some(entry) = self.store.get(key)
            && !entry.needs_refetch(OffsetDateTime::now_utc(), self.stale_time)
        {
            return Ok(FetchOutcome::Fresh(entry));
        }
        self.fetch(key, FetchMode::First, still_current).await
    }

    /// Fetch the first page and replace whatever is stored.
    pub async fn refetch(&self, key: &QueryKey) -> Result<FetchOutcome, FetchError> {
        self.fetch(key, FetchMode::First, || true).await
    }

    /// Append the page after the stored ones, when there is one.
    pub async fn fetch_next_page(&self, key: &QueryKey) -> Result<FetchOutcome, FetchError> {
        self.fetch(key, FetchMode::Next, || true).await
    }

    /// [`refetch`](Self::refetch) whose result is dropped unless
    /// `still_current` holds when it lands.
    pub async fn refetch_if<F>(&self, key: &QueryKey, still_current: F) -> Result<FetchOutcome, FetchError>
    where
        F: Fn() -> bool + Send + Sync,
    {
        self.fetch(key, FetchMode::First, still_current).await
    }

    /// [`fetch_next_page`](Self::fetch_next_page) with the same guard as
    /// [`refetch_if`](Self::refetch_if).
    pub async fn fetch_next_page_if<F>(
        &self,
        key: &QueryKey,
        still_current: F,
    ) -> Result<FetchOutcome, FetchError>
    where
        F: Fn() -> bool + Send + Sync,
    {
        self.fetch(key, FetchMode::Next, still_current).await
    }

    async fn fetch<F>(
        &self,
        key: &QueryKey,
        mode: FetchMode,
        still_current: F,
    ) -> Result<FetchOutcome, FetchError>
    where
        F: Fn() -> bool + Send + Sync,
    {
        let registered = self.fetchers.lookup(key)?.clone();

        let cursor = match mode {
            FetchMode::First => None,
            FetchMode::Next => {
                let entry = self.store.get(key);
                match entry.as_deref() {
                    Some(entry) if has_next_page(entry) => next_cursor(entry).map(str::to_string),
                    _ => return Ok(FetchOutcome::Skipped(SkipReason::NoMorePages)),
                }
            }
        };

        let Some(_guard) = self.inflight.acquire(key) else {
            debug!(key = %key, mode = mode.as_str(), "Fetch already in flight");
            return Ok(FetchOutcome::Skipped(SkipReason::AlreadyFetching));
        };

        let generation = self.store.generation();
        let previous_status = self.mark_loading(key);

        let started = Instant::now();
        let result = registered
            .fetcher
            .fetch_page(key, cursor.as_deref())
            .await;
        histogram!(METRIC_FETCH_DURATION_MS).record(started.elapsed().as_secs_f64() * 1000.0);

        if self.store.generation() != generation || !still_current() {
            counter!(METRIC_FETCH_DISCARDED_TOTAL).increment(1);
            debug!(key = %key, mode = mode.as_str(), "Discarded superseded fetch result");
            if self.store.generation() == generation {
                self.restore_status(key, previous_status);
            }
            return Ok(FetchOutcome::Discarded);
        }

        match result {
            Ok(page) => {
                counter!(METRIC_FETCH_TOTAL, "result" => "ok").increment(1);
                let entry = self.store.update(key, |prev| {
                    let prev = prev.cloned().unwrap_or_default();
                    match (mode, registered.shape) {
                        (FetchMode::First, ResultShape::Single) => match page.items.into_iter().next() {
                            Some(item) => CacheEntry::single(item),
                            None => prev.with_error("not found"),
                        },
                        (FetchMode::First, ResultShape::Paged) => replace_all(vec![page]),
                        (FetchMode::Next, _) => append_page(&prev, page),
                    }
                });
                debug!(
                    key = %key,
                    mode = mode.as_str(),
                    pages = entry.pages().len(),
                    "Fetched page stored"
                );
                Ok(FetchOutcome::Stored(entry))
            }
            Err(err) => {
                counter!(METRIC_FETCH_TOTAL, "result" => "error").increment(1);
                let report = ErrorReport::from_error("application::query::fetch", &err);
                warn!(key = %key, mode = mode.as_str(), error = %report.joined(), "Fetch failed");
                self.store.update(key, |prev| {
                    prev.cloned().unwrap_or_default().with_error(report.joined())
                });
                Err(FetchError::Remote(err))
            }
        }
    }

    fn mark_loading(&self, key: &QueryKey) -> FetchStatus {
        let mut previous = FetchStatus::Idle;
        self.store.update(key, |prev| {
            let prev = prev.cloned().unwrap_or_default();
            previous = prev.status;
            prev.with_status(FetchStatus::Loading)
        });
        previous
    }

    fn restore_status(&self, key: &QueryKey, status: FetchStatus) {
        self.store.update_existing(key, |entry| {
            entry.is_loading().then(|| entry.with_status(status))
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use shelfsync_types::{Comment, EntityRef, Item, MutationKind, ServerResult, UserSummary};
    use tokio::sync::oneshot;

    use super::*;
    use crate::application::mutation::{MutationCoordinator, MutationSpec};
    use crate::cache::pagination::{flatten, remove_item};
    use crate::cache::{PropagationRegistry, Propagator};

    fn comment(id: &str) -> Item {
        Item::Comment(Comment {
            id: id.to_string(),
            review_id: "r1".to_string(),
            author: UserSummary {
                id: "u1".to_string(),
                nickname: "reader".to_string(),
            },
            body: format!("comment {id}"),
            pending: false,
            updated_at: None,
        })
    }

    /// Serves `pages` by cursor: `None` → page 0, `"c<n>"` → page n.
    struct ScriptedFetcher {
        pages: Vec<Page>,
        calls: AtomicUsize,
        fail: Mutex<Option<RemoteError>>,
    }

    impl ScriptedFetcher {
        fn new(pages: Vec<Page>) -> Arc<Self> {
            Arc::new(Self {
                pages,
                calls: AtomicUsize::new(0),
                fail: Mutex::new(None),
            })
        }

        fn fail_next(&self, error: RemoteError) {
            *self.fail.lock().expect("lock") = Some(error);
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch_page(&self, _key: &QueryKey, cursor: Option<&str>) -> Result<Page, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.fail.lock().expect("lock").take() {
                return Err(error);
            }
            let index = cursor
                .and_then(|cursor| cursor.trim_start_matches('c').parse::<usize>().ok())
                .unwrap_or(0);
            self.pages
                .get(index)
                .cloned()
                .ok_or_else(|| RemoteError::server(404, "no such page"))
        }
    }

    /// Blocks until released, so tests can interleave with an in-flight fetch.
    struct GatedFetcher {
        gate: Notify,
        page: Page,
    }

    #[async_trait]
    impl PageFetcher for GatedFetcher {
        async fn fetch_page(&self, _key: &QueryKey, _cursor: Option<&str>) -> Result<Page, RemoteError> {
            self.gate.notified().await;
            Ok(self.page.clone())
        }
    }

    fn comments_key() -> QueryKey {
        QueryKey::family("review-comments").with("r1")
    }

    fn client(fetcher: Arc<dyn PageFetcher>) -> QueryClient {
        let registry = FetcherRegistry::new().register("review-comments", fetcher);
        QueryClient::new(
            Arc::new(CacheStore::new()),
            Arc::new(registry),
            Duration::from_secs(30),
        )
    }

    fn two_pages() -> Vec<Page> {
        vec![
            Page::new((1..=5).map(|n| comment(&n.to_string())).collect(), Some("c1".to_string())),
            Page::terminal((6..=10).map(|n| comment(&n.to_string())).collect()),
        ]
    }

    #[tokio::test]
    async fn pages_through_comments_until_terminal() {
        let fetcher = ScriptedFetcher::new(two_pages());
        let client = client(fetcher.clone());
        let key = comments_key();

        client.ensure(&key).await.expect("first page");
        client.fetch_next_page(&key).await.expect("second page");
        let third = client.fetch_next_page(&key).await.expect("gated");

        assert_eq!(third, FetchOutcome::Skipped(SkipReason::NoMorePages));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);

        let entry = client.store().get(&key).expect("entry");
        let ids: Vec<String> = flatten(&entry).iter().map(|item| item.entity_ref().id).collect();
        let expected: Vec<String> = (1..=10).map(|n| n.to_string()).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn fresh_entries_are_served_from_cache() {
        let fetcher = ScriptedFetcher::new(two_pages());
        let client = client(fetcher.clone());
        let key = comments_key();

        client.ensure(&key).await.expect("first");
        let second = client.ensure(&key).await.expect("second");

        assert!(matches!(second, FetchOutcome::Fresh(_)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidated_entries_are_refetched() {
        let fetcher = ScriptedFetcher::new(two_pages());
        let client = client(fetcher.clone());
        let key = comments_key();

        client.ensure(&key).await.expect("first");
        client.store().invalidate(&QueryKey::family("review-comments"));
        assert!(client.store().get(&key).expect("kept").stale);

        let outcome = client.ensure(&key).await.expect("refetch");
        assert!(matches!(outcome, FetchOutcome::Stored(_)));
        assert!(!client.store().get(&key).expect("entry").stale);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_refetch_keeps_previous_data() {
        let fetcher = ScriptedFetcher::new(two_pages());
        let client = client(fetcher.clone());
        let key = comments_key();
        client.ensure(&key).await.expect("first");

        fetcher.fail_next(RemoteError::network("offline"));
        let err = client.refetch(&key).await.expect_err("fetch fails");
        assert_eq!(err, FetchError::Remote(RemoteError::network("offline")));

        let entry = client.store().get(&key).expect("entry kept");
        assert_eq!(entry.status, FetchStatus::Error);
        assert_eq!(flatten(&entry).len(), 5);
        let message = entry.error.as_ref().map(|info| info.message.as_str());
        assert_eq!(message, Some("network failure: offline"));
    }

    #[tokio::test]
    async fn unknown_family_is_reported() {
        let client = client(ScriptedFetcher::new(vec![]));
        let err = client
            .ensure(&QueryKey::family("shelves"))
            .await
            .expect_err("no fetcher");
        assert_eq!(
            err,
            FetchError::NoFetcher {
                family: "shelves".to_string()
            }
        );
    }

    #[tokio::test]
    async fn single_shape_stores_first_item() {
        let fetcher = ScriptedFetcher::new(vec![Page::terminal(vec![comment("9")])]);
        let registry = FetcherRegistry::new().register_single("comment", fetcher);
        let client = QueryClient::new(
            Arc::new(CacheStore::new()),
            Arc::new(registry),
            Duration::from_secs(30),
        );
        let key = QueryKey::family("comment").with("9");

        client.ensure(&key).await.expect("fetched");
        let entry = client.store().get(&key).expect("entry");
        assert_eq!(entry.single_item(), Some(&comment("9")));
        assert_eq!(
            client.fetch_next_page(&key).await.expect("gated"),
            FetchOutcome::Skipped(SkipReason::NoMorePages)
        );
    }

    #[tokio::test]
    async fn concurrent_fetch_for_same_key_is_skipped() {
        let fetcher = Arc::new(GatedFetcher {
            gate: Notify::new(),
            page: Page::terminal(vec![comment("1")]),
        });
        let client = client(fetcher.clone());
        let key = comments_key();

        let first = tokio::spawn({
            let client = client.clone();
            let key = key.clone();
            async move { client.refetch(&key).await }
        });
        while !client.is_fetching(&key) {
            tokio::task::yield_now().await;
        }

        let loading = client.store().get(&key).expect("loading entry");
        assert!(loading.is_loading());
        assert_eq!(
            client.refetch(&key).await.expect("skipped"),
            FetchOutcome::Skipped(SkipReason::AlreadyFetching)
        );

        fetcher.gate.notify_one();
        let outcome = first.await.expect("task").expect("fetch");
        assert!(matches!(outcome, FetchOutcome::Stored(_)));
        assert!(!client.is_fetching(&key));
    }

    #[tokio::test]
    async fn result_after_reset_is_discarded() {
        let fetcher = Arc::new(GatedFetcher {
            gate: Notify::new(),
            page: Page::terminal(vec![comment("1")]),
        });
        let client = client(fetcher.clone());
        let key = comments_key();

        let pending = tokio::spawn({
            let client = client.clone();
            let key = key.clone();
            async move { client.refetch(&key).await }
        });
        while !client.is_fetching(&key) {
            tokio::task::yield_now().await;
        }

        client.store().reset();
        fetcher.gate.notify_one();

        let outcome = pending.await.expect("task").expect("fetch");
        assert!(outcome.is_discarded());
        assert!(client.store().get(&key).is_none());
    }

    #[tokio::test]
    async fn superseded_result_is_not_written() {
        let fetcher = ScriptedFetcher::new(two_pages());
        let client = client(fetcher);
        let key = comments_key();

        let outcome = client.refetch_if(&key, || false).await.expect("fetch");
        assert!(outcome.is_discarded());

        let entry = client.store().get(&key).expect("placeholder entry");
        assert!(entry.data.is_none());
        assert_eq!(entry.status, FetchStatus::Idle);
    }

    fn gated(items: Vec<Item>) -> Arc<GatedFetcher> {
        Arc::new(GatedFetcher {
            gate: Notify::new(),
            page: Page::terminal(items),
        })
    }

    async fn start_refetch(
        client: &QueryClient,
        key: &QueryKey,
    ) -> tokio::task::JoinHandle<Result<FetchOutcome, FetchError>> {
        let pending = tokio::spawn({
            let client = client.clone();
            let key = key.clone();
            async move { client.refetch(&key).await }
        });
        while !client.is_fetching(key) {
            tokio::task::yield_now().await;
        }
        pending
    }

    #[tokio::test]
    async fn refetch_keeps_serving_old_data_while_loading() {
        let fetcher = gated(vec![comment("1"), comment("2")]);
        let client = client(fetcher.clone());
        let key = comments_key();

        fetcher.gate.notify_one();
        client.ensure(&key).await.expect("first fetch");
        client.store().invalidate(&key);

        let pending = start_refetch(&client, &key).await;
        let loading = client.store().get(&key).expect("entry");
        assert_eq!(loading.status, FetchStatus::Loading);
        assert_eq!(flatten(&loading), vec![comment("1"), comment("2")]);

        fetcher.gate.notify_one();
        pending.await.expect("task").expect("refetch");
        let settled = client.store().get(&key).expect("entry");
        assert_eq!(settled.status, FetchStatus::Success);
        assert!(!settled.stale);
    }

    #[tokio::test]
    async fn rollback_after_refetch_does_not_bring_back_loading() {
        let fetcher = gated(vec![comment("1"), comment("2")]);
        let client = client(fetcher.clone());
        let key = comments_key();
        let coordinator = MutationCoordinator::new(
            Arc::clone(client.store()),
            Propagator::new(
                Arc::clone(client.store()),
                Arc::new(PropagationRegistry::bookshelf()),
            ),
        );

        fetcher.gate.notify_one();
        client.ensure(&key).await.expect("first fetch");
        let pending = start_refetch(&client, &key).await;

        let (fail, remote) = oneshot::channel::<RemoteError>();
        let removed = EntityRef::comment("1");
        let handle = coordinator.run(
            MutationSpec::new(removed.clone(), MutationKind::DeleteComment, move || async move {
                Err::<ServerResult, _>(
                    remote
                        .await
                        .unwrap_or_else(|_| RemoteError::network("dropped")),
                )
            })
            .touching(key.clone())
            .optimistic(move |_, entry| remove_item(entry, &removed)),
        );
        assert_eq!(flatten(&client.store().get(&key).expect("entry")), vec![comment("2")]);

        fetcher.gate.notify_one();
        pending.await.expect("task").expect("refetch");
        fail.send(RemoteError::server(500, "boom")).expect("remote waiting");
        handle.await.expect_err("rolled back");

        let entry = client.store().get(&key).expect("entry");
        assert!(!client.is_fetching(&key));
        assert_eq!(entry.status, FetchStatus::Success);
        assert_eq!(flatten(&entry), vec![comment("1"), comment("2")]);
        assert!(matches!(
            client.ensure(&key).await.expect("read"),
            FetchOutcome::Fresh(_)
        ));
    }

    #[tokio::test]
    async fn waiting_caller_is_woken_when_the_fetch_releases() {
        let fetcher = gated(vec![comment("1")]);
        let client = client(fetcher.clone());
        let key = comments_key();

        let pending = start_refetch(&client, &key).await;
        let waiter = tokio::spawn({
            let client = client.clone();
            let key = key.clone();
            async move { client.wait_released(&key).await }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        fetcher.gate.notify_one();
        pending.await.expect("task").expect("refetch");
        waiter.await.expect("woken");
        assert!(!client.is_fetching(&key));

        // nothing in flight: returns at once
        client.wait_released(&key).await;
    }
}
