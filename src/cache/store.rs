//! Key-addressed store of fetched data.
//!
//! Entries are immutable values behind `Arc`; every write installs a new
//! value computed from the previous one. Snapshots taken by the mutation
//! coordinator are therefore plain `Arc` clones and can never be altered by
//! later writes.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use metrics::counter;
use shelfsync_types::Item;
use time::OffsetDateTime;
use tracing::debug;

use super::keys::QueryKey;
use super::lock::{mutex_lock, rw_read, rw_write};

const SOURCE: &str = "cache::store";

const METRIC_CACHE_WRITE_TOTAL: &str = "shelfsync_cache_write_total";
const METRIC_CACHE_INVALIDATED_TOTAL: &str = "shelfsync_cache_invalidated_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// Last fetch failure recorded on an entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorInfo {
    pub message: String,
    pub at: OffsetDateTime,
}

/// One server page. `next_cursor == None` marks the last page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<Item>,
    pub next_cursor: Option<String>,
}

impl Page {
    pub fn new(items: Vec<Item>, next_cursor: Option<String>) -> Self {
        Self { items, next_cursor }
    }

    pub fn terminal(items: Vec<Item>) -> Self {
        Self::new(items, None)
    }

    pub fn is_terminal(&self) -> bool {
        self.next_cursor.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryData {
    Single(Item),
    Pages(Vec<Page>),
}

/// Cached state for one [`QueryKey`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub data: Option<EntryData>,
    pub status: FetchStatus,
    pub last_updated_at: Option<OffsetDateTime>,
    pub error: Option<ErrorInfo>,
    /// Set by invalidation; the next read through the query layer refetches.
    pub stale: bool,
}

impl Default for CacheEntry {
    fn default() -> Self {
        Self::empty()
    }
}

impl CacheEntry {
    /// An entry with nothing fetched yet.
    pub fn empty() -> Self {
        Self {
            data: None,
            status: FetchStatus::Idle,
            last_updated_at: None,
            error: None,
            stale: false,
        }
    }

    /// A successfully fetched single value.
    pub fn single(item: Item) -> Self {
        Self {
            data: Some(EntryData::Single(item)),
            status: FetchStatus::Success,
            last_updated_at: Some(OffsetDateTime::now_utc()),
            error: None,
            stale: false,
        }
    }

    pub fn pages(&self) -> &[Page] {
        match &self.data {
            Some(EntryData::Pages(pages)) => pages,
            _ => &[],
        }
    }

    pub fn single_item(&self) -> Option<&Item> {
        match &self.data {
            Some(EntryData::Single(item)) => Some(item),
            _ => None,
        }
    }

    /// Every item held by this entry in display order.
    pub fn items(&self) -> Box<dyn Iterator<Item = &Item> + '_> {
        match &self.data {
            Some(EntryData::Single(item)) => Box::new(std::iter::once(item)),
            Some(EntryData::Pages(pages)) => Box::new(pages.iter().flat_map(|page| &page.items)),
            None => Box::new(std::iter::empty()),
        }
    }

    /// Copy of this entry with every item passed through `f`. Returns `None`
    /// when `f` left every item unchanged.
    pub fn map_items(&self, mut f: impl FnMut(&Item) -> Option<Item>) -> Option<CacheEntry> {
        let mut changed = false;
        let mut rewrite = |item: &Item| match f(item) {
            Some(next) if next != *item => {
                changed = true;
                next
            }
            _ => item.clone(),
        };

        let data = match &self.data {
            Some(EntryData::Single(item)) => Some(EntryData::Single(rewrite(item))),
            Some(EntryData::Pages(pages)) => Some(EntryData::Pages(
                pages
                    .iter()
                    .map(|page| Page {
                        items: page.items.iter().map(&mut rewrite).collect(),
                        next_cursor: page.next_cursor.clone(),
                    })
                    .collect(),
            )),
            None => None,
        };

        changed.then(|| CacheEntry {
            data,
            ..self.clone()
        })
    }

    pub fn is_loading(&self) -> bool {
        self.status == FetchStatus::Loading
    }

    /// Whether the query layer should refetch before trusting this entry.
    pub fn needs_refetch(&self, now: OffsetDateTime, stale_time: Duration) -> bool {
        if self.stale || self.data.is_none() || self.status == FetchStatus::Error {
            return true;
        }
        match self.last_updated_at {
            Some(at) => now - at >= stale_time,
            None => true,
        }
    }

    pub fn with_status(&self, status: FetchStatus) -> CacheEntry {
        CacheEntry {
            status,
            ..self.clone()
        }
    }

    /// Record a failure while keeping the last good data readable.
    pub fn with_error(&self, message: impl Into<String>) -> CacheEntry {
        CacheEntry {
            status: FetchStatus::Error,
            error: Some(ErrorInfo {
                message: message.into(),
                at: OffsetDateTime::now_utc(),
            }),
            ..self.clone()
        }
    }
}

/// An in-place rewrite: the value that was stored and the one that replaced it.
#[derive(Debug, Clone)]
pub struct Replaced {
    pub previous: Arc<CacheEntry>,
    pub current: Arc<CacheEntry>,
}

/// Callback invoked after a write to the subscribed key. `None` means the
/// entry was removed.
pub type SubscriberFn = dyn Fn(&QueryKey, Option<&Arc<CacheEntry>>) + Send + Sync;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    by_key: HashMap<QueryKey, Vec<(u64, Arc<SubscriberFn>)>>,
}

/// Active subscription. Dropping it unsubscribes.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    key: QueryKey,
    id: u64,
    subscribers: Weak<Mutex<Subscribers>>,
}

impl Subscription {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(subscribers) = self.subscribers.upgrade() else {
            return;
        };
        let mut subscribers = mutex_lock(&subscribers, SOURCE, "unsubscribe");
        if let Some(callbacks) = subscribers.by_key.get_mut(&self.key) {
            callbacks.retain(|(id, _)| *id != self.id);
            if callbacks.is_empty() {
                subscribers.by_key.remove(&self.key);
            }
        }
    }
}

/// The single shared mutable resource of the sync layer.
pub struct CacheStore {
    entries: RwLock<HashMap<QueryKey, Arc<CacheEntry>>>,
    subscribers: Arc<Mutex<Subscribers>>,
    generation: AtomicU64,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
            generation: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &QueryKey) -> Option<Arc<CacheEntry>> {
        rw_read(&self.entries, SOURCE, "get").get(key).cloned()
    }

    /// Replace the entry at `key` with the value computed from the previous one.
    ///
    /// The updater runs while the store is locked and must not call back into
    /// the store. When it returns `Err` nothing is written and the error is
    /// handed back to the caller.
    pub fn set<F, E>(&self, key: &QueryKey, updater: F) -> Result<Arc<CacheEntry>, E>
    where
        F: FnOnce(Option<&CacheEntry>) -> Result<CacheEntry, E>,
    {
        let next = {
            let mut entries = rw_write(&self.entries, SOURCE, "set");
            let next = Arc::new(updater(entries.get(key).map(Arc::as_ref))?);
            entries.insert(key.clone(), Arc::clone(&next));
            next
        };

        counter!(METRIC_CACHE_WRITE_TOTAL).increment(1);
        debug!(key = %key, status = ?next.status, "Cache entry written");
        self.notify(key, Some(&next));
        Ok(next)
    }

    /// Infallible form of [`set`](Self::set).
    pub fn update<F>(&self, key: &QueryKey, updater: F) -> Arc<CacheEntry>
    where
        F: FnOnce(Option<&CacheEntry>) -> CacheEntry,
    {
        match self.set(key, |prev| Ok::<_, Infallible>(updater(prev))) {
            Ok(entry) => entry,
            Err(never) => match never {},
        }
    }

    /// Write `entry` unconditionally.
    pub fn put(&self, key: &QueryKey, entry: CacheEntry) -> Arc<CacheEntry> {
        let entry = Arc::new(entry);
        rw_write(&self.entries, SOURCE, "put").insert(key.clone(), Arc::clone(&entry));
        counter!(METRIC_CACHE_WRITE_TOTAL).increment(1);
        self.notify(key, Some(&entry));
        entry
    }

    /// Rewrite an entry only if it exists; never creates one.
    ///
    /// Returns the new value, or `None` when the key is absent or `updater`
    /// declined to change anything.
    pub fn update_existing<F>(&self, key: &QueryKey, updater: F) -> Option<Arc<CacheEntry>>
    where
        F: FnOnce(&CacheEntry) -> Option<CacheEntry>,
    {
        self.replace_existing(key, |current| updater(current).map(Arc::new))
            .map(|replaced| replaced.current)
    }

    /// [`update_existing`](Self::update_existing) over the shared values. The
    /// updater may hand back a captured `Arc` to reinstall it as is; the
    /// value it replaced is read under the same lock as the write.
    pub fn replace_existing<F>(&self, key: &QueryKey, updater: F) -> Option<Replaced>
    where
        F: FnOnce(&Arc<CacheEntry>) -> Option<Arc<CacheEntry>>,
    {
        let replaced = {
            let mut entries = rw_write(&self.entries, SOURCE, "replace_existing");
            let previous = Arc::clone(entries.get(key)?);
            let current = updater(&previous)?;
            entries.insert(key.clone(), Arc::clone(&current));
            Replaced { previous, current }
        };

        counter!(METRIC_CACHE_WRITE_TOTAL).increment(1);
        self.notify(key, Some(&replaced.current));
        Some(replaced)
    }

    pub fn remove(&self, key: &QueryKey) -> Option<Arc<CacheEntry>> {
        let removed = rw_write(&self.entries, SOURCE, "remove").remove(key);
        if removed.is_some() {
            self.notify(key, None);
        }
        removed
    }

    /// Mark every entry under `prefix` stale. Data stays readable until a
    /// refetch replaces it. Returns the number of entries newly marked.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let marked: Vec<(QueryKey, Arc<CacheEntry>)> = {
            let mut entries = rw_write(&self.entries, SOURCE, "invalidate");
            entries
                .iter_mut()
                .filter(|(key, entry)| key.starts_with(prefix) && !entry.stale)
                .map(|(key, entry)| {
                    *entry = Arc::new(CacheEntry {
                        stale: true,
                        ..(**entry).clone()
                    });
                    (key.clone(), Arc::clone(entry))
                })
                .collect()
        };

        counter!(METRIC_CACHE_INVALIDATED_TOTAL).increment(marked.len() as u64);
        debug!(prefix = %prefix, count = marked.len(), "Cache entries invalidated");
        for (key, entry) in &marked {
            self.notify(key, Some(entry));
        }
        marked.len()
    }

    pub fn subscribe<F>(&self, key: &QueryKey, callback: F) -> Subscription
    where
        F: Fn(&QueryKey, Option<&Arc<CacheEntry>>) + Send + Sync + 'static,
    {
        let mut subscribers = mutex_lock(&self.subscribers, SOURCE, "subscribe");
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers
            .by_key
            .entry(key.clone())
            .or_default()
            .push((id, Arc::new(callback)));

        Subscription {
            key: key.clone(),
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        mutex_lock(&self.subscribers, SOURCE, "subscriber_count")
            .by_key
            .get(key)
            .map_or(0, Vec::len)
    }

    /// Live entries whose key satisfies `predicate`.
    pub fn entries_matching(
        &self,
        mut predicate: impl FnMut(&QueryKey) -> bool,
    ) -> Vec<(QueryKey, Arc<CacheEntry>)> {
        rw_read(&self.entries, SOURCE, "entries_matching")
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, entry)| (key.clone(), Arc::clone(entry)))
            .collect()
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        rw_read(&self.entries, SOURCE, "keys").keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bumped by [`reset`](Self::reset). Fetches compare it before writing.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Drop every entry (logout). Results of fetches started before the
    /// reset are discarded by the query layer.
    pub fn reset(&self) {
        let removed: Vec<QueryKey> = {
            let mut entries = rw_write(&self.entries, SOURCE, "reset");
            self.generation.fetch_add(1, Ordering::SeqCst);
            entries.drain().map(|(key, _)| key).collect()
        };

        debug!(count = removed.len(), "Cache store reset");
        for key in &removed {
            self.notify(key, None);
        }
    }

    fn notify(&self, key: &QueryKey, entry: Option<&Arc<CacheEntry>>) {
        let callbacks: Vec<Arc<SubscriberFn>> = mutex_lock(&self.subscribers, SOURCE, "notify")
            .by_key
            .get(key)
            .map(|callbacks| callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();

        for callback in callbacks {
            callback(key, entry);
        }
    }
}
