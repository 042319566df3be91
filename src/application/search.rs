//! Debounced incremental search.
//!
//! Keystrokes go through [`SearchController::on_input`]. A query is committed
//! once input has been quiet for the debounce delay; its first page is then
//! fetched under `base + [query]`. Every input bumps the session token, and a
//! fetch whose token was superseded by the time it lands is dropped unwritten.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use shelfsync_types::Item;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::application::error::FetchError;
use crate::application::query::{FetchOutcome, QueryClient, SkipReason};
use crate::cache::pagination::flatten;
use crate::cache::{CacheEntry, QueryKey, Subscription, mutex_lock};

const SOURCE: &str = "application::search";

const METRIC_SEARCH_COMMIT_TOTAL: &str = "shelfsync_search_commit_total";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchSession {
    pub raw_query: String,
    pub debounced_query: String,
    pub session_token: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    Idle,
    /// Waiting for the debounce timer.
    Pending,
    Committed,
}

/// Called with the flattened results whenever the active key is written.
pub type ResultsListener = dyn Fn(&[Item]) + Send + Sync;

type Settled = Option<(u64, Result<FetchOutcome, FetchError>)>;

struct SearchState {
    session: SearchSession,
    phase: SearchPhase,
    active_key: Option<QueryKey>,
    timer: Option<JoinHandle<()>>,
    subscription: Option<Subscription>,
}

struct Inner {
    query: QueryClient,
    base: QueryKey,
    debounce: Duration,
    token: AtomicU64,
    state: Mutex<SearchState>,
    listener: Mutex<Option<Arc<ResultsListener>>>,
    settled: watch::Sender<Settled>,
}

/// Turns raw keystrokes into committed search queries.
#[derive(Clone)]
pub struct SearchController {
    inner: Arc<Inner>,
}

impl SearchController {
    /// `base` is the key prefix the committed query is appended to, e.g.
    /// `["book-search"]`.
    pub fn new(query: QueryClient, base: QueryKey, debounce: Duration) -> Self {
        let (settled, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                query,
                base,
                debounce,
                token: AtomicU64::new(0),
                state: Mutex::new(SearchState {
                    session: SearchSession::default(),
                    phase: SearchPhase::Idle,
                    active_key: None,
                    timer: None,
                    subscription: None,
                }),
                listener: Mutex::new(None),
                settled,
            }),
        }
    }

    /// Register the view callback for result changes of the active query.
    pub fn on_results<F>(&self, listener: F)
    where
        F: Fn(&[Item]) + Send + Sync + 'static,
    {
        *mutex_lock(&self.inner.listener, SOURCE, "on_results") = Some(Arc::new(listener));
    }

    /// Record a keystroke. Must be called from within a Tokio runtime.
    pub fn on_input(&self, raw: &str) {
        let mut state = mutex_lock(&self.inner.state, SOURCE, "on_input");
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        let token = self.inner.token.fetch_add(1, Ordering::SeqCst) + 1;
        state.session.raw_query = raw.to_string();
        state.session.session_token = token;

        if raw.trim().is_empty() {
            state.phase = SearchPhase::Idle;
            state.session.debounced_query.clear();
            state.active_key = None;
            state.subscription = None;
            debug!(token, "Search cleared");
            return;
        }

        state.phase = SearchPhase::Pending;
        let inner = Arc::clone(&self.inner);
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            Inner::commit(&inner, token).await;
        }));
    }

    /// Fetch the page after the stored ones for the committed query.
    pub async fn load_more(&self) -> Result<FetchOutcome, FetchError> {
        let (key, token) = {
            let state = mutex_lock(&self.inner.state, SOURCE, "load_more");
            match (&state.active_key, state.phase) {
                (Some(key), SearchPhase::Committed) => (key.clone(), state.session.session_token),
                _ => return Ok(FetchOutcome::Skipped(SkipReason::NoMorePages)),
            }
        };

        let inner = Arc::clone(&self.inner);
        self.inner
            .query
            .fetch_next_page_if(&key, move || inner.is_current(token))
            .await
    }

    /// Wait until the fetch of the current session has landed. Returns
    /// `None` when the search is idle.
    pub async fn wait_settled(&self) -> Option<Result<FetchOutcome, FetchError>> {
        let mut settled = self.inner.settled.subscribe();
        loop {
            if self.phase() == SearchPhase::Idle {
                return None;
            }
            let token = self.inner.token.load(Ordering::SeqCst);
            if let Some((settled_token, outcome)) = settled.borrow_and_update().clone()
                && settled_token == token
            {
                return Some(outcome);
            }
            if settled.changed().await.is_err() {
                return None;
            }
        }
    }

    pub fn current_debounced_query(&self) -> String {
        mutex_lock(&self.inner.state, SOURCE, "current_debounced_query")
            .session
            .debounced_query
            .clone()
    }

    pub fn session(&self) -> SearchSession {
        mutex_lock(&self.inner.state, SOURCE, "session")
            .session
            .clone()
    }

    pub fn phase(&self) -> SearchPhase {
        mutex_lock(&self.inner.state, SOURCE, "phase").phase
    }

    pub fn active_key(&self) -> Option<QueryKey> {
        mutex_lock(&self.inner.state, SOURCE, "active_key")
            .active_key
            .clone()
    }

    pub fn active_entry(&self) -> Option<Arc<CacheEntry>> {
        self.active_key()
            .and_then(|key| self.inner.query.store().get(&key))
    }

    /// Visible result set: the committed query's flattened pages.
    pub fn results(&self) -> Vec<Item> {
        self.active_entry()
            .map(|entry| flatten(&entry))
            .unwrap_or_default()
    }

    pub fn is_loading(&self) -> bool {
        self.active_key()
            .is_some_and(|key| self.inner.query.is_fetching(&key))
    }
}

impl Inner {
    fn is_current(&self, token: u64) -> bool {
        self.token.load(Ordering::SeqCst) == token
    }

    async fn commit(inner: &Arc<Inner>, token: u64) {
        let key = {
            let mut state = mutex_lock(&inner.state, SOURCE, "commit");
            if !inner.is_current(token) {
                return;
            }
            // the fetch below must survive later keystrokes; they discard it instead
            state.timer = None;

            let query = state.session.raw_query.trim().to_string();
            let key = inner.base.clone().with(query.as_str());
            state.session.debounced_query = query;
            state.phase = SearchPhase::Committed;
            state.active_key = Some(key.clone());
            state.subscription = inner.subscribe(&key);
            key
        };

        counter!(METRIC_SEARCH_COMMIT_TOTAL).increment(1);
        debug!(key = %key, token, "Search committed");

        let outcome = loop {
            let watcher = Arc::clone(inner);
            let outcome = inner
                .query
                .ensure_if(&key, move || watcher.is_current(token))
                .await;
            // a superseded fetch of the same query still holds the key; it
            // will discard its result, so fetch again once it lets go
            if matches!(outcome, Ok(FetchOutcome::Skipped(SkipReason::AlreadyFetching)))
                && inner.is_current(token)
            {
                debug!(key = %key, token, "Waiting for superseded fetch to release");
                inner.query.wait_released(&key).await;
                continue;
            }
            break outcome;
        };

        match &outcome {
            Ok(FetchOutcome::Discarded) => {
                debug!(key = %key, token, "Dropped superseded search results");
            }
            Ok(_) => {}
            Err(err) => warn!(key = %key, token, error = %err, "Search fetch failed"),
        }
        inner.settled.send_replace(Some((token, outcome)));
    }

    fn subscribe(&self, key: &QueryKey) -> Option<Subscription> {
        let listener = mutex_lock(&self.listener, SOURCE, "subscribe").clone()?;
        Some(self.query.store().subscribe(key, move |_, entry| {
            let items = entry.map(|entry| flatten(entry)).unwrap_or_default();
            listener(&items);
        }))
    }
}
