//! Optimistic mutations with rollback.
//!
//! [`MutationCoordinator::run`] writes the speculative state before it
//! returns, then settles the remote call on a spawned task. A failed call
//! reinstalls every entry the mutation rewrote as it was before the first
//! write; fetch state recorded on the entry since then is kept. At most one mutation per
//! `(entity, kind)` is outstanding; a second `run` receives the first one's
//! handle and its remote call is never invoked.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::{counter, histogram};
use shelfsync_types::{EntityRef, MutationKind, MutationPayload, ServerResult};
use time::OffsetDateTime;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::error::{MutationError, RemoteError};
use crate::cache::{
    CacheEntry, CacheStore, FieldDelta, Propagator, QueryKey, Replaced, mutex_lock,
};

const SOURCE: &str = "application::mutation";
const RECENT_LIMIT: usize = 32;

const METRIC_MUTATION_TOTAL: &str = "shelfsync_mutation_total";
const METRIC_MUTATION_ROLLBACK_TOTAL: &str = "shelfsync_mutation_rollback_total";
const METRIC_MUTATION_DEDUPLICATED_TOTAL: &str = "shelfsync_mutation_deduplicated_total";
const METRIC_MUTATION_SETTLE_MS: &str = "shelfsync_mutation_settle_ms";

/// Backend endpoint for every mutation kind.
#[async_trait]
pub trait Mutator: Send + Sync {
    async fn mutate(
        &self,
        entity: &EntityRef,
        kind: MutationKind,
        payload: MutationPayload,
    ) -> Result<ServerResult, RemoteError>;
}

pub type RemoteCall =
    Box<dyn FnOnce() -> BoxFuture<'static, Result<ServerResult, RemoteError>> + Send>;
pub type OptimisticUpdater = Box<dyn Fn(&QueryKey, &CacheEntry) -> Option<CacheEntry> + Send>;
pub type SettleUpdater =
    Box<dyn Fn(&ServerResult, &QueryKey, &CacheEntry) -> Option<CacheEntry> + Send>;

type Settlement = Result<ServerResult, MutationError>;
type SharedSettlement = Shared<BoxFuture<'static, Settlement>>;

/// Everything the coordinator needs to run one mutation.
pub struct MutationSpec {
    entity: EntityRef,
    kind: MutationKind,
    keys: Vec<QueryKey>,
    optimistic: Option<OptimisticUpdater>,
    remote: RemoteCall,
    settle: Option<SettleUpdater>,
    propagation: Option<(EntityRef, FieldDelta)>,
}

impl MutationSpec {
    pub fn new<F, Fut>(entity: EntityRef, kind: MutationKind, remote: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<ServerResult, RemoteError>> + Send + 'static,
    {
        Self {
            entity,
            kind,
            keys: Vec::new(),
            optimistic: None,
            remote: Box::new(move || remote().boxed()),
            settle: None,
            propagation: None,
        }
    }

    /// Declare a key the optimistic updater rewrites.
    pub fn touching(mut self, key: QueryKey) -> Self {
        if !self.keys.contains(&key) {
            self.keys.push(key);
        }
        self
    }

    pub fn touching_all(self, keys: impl IntoIterator<Item = QueryKey>) -> Self {
        keys.into_iter().fold(self, Self::touching)
    }

    /// Speculative rewrite of each declared key. Returning `None` leaves the
    /// entry as it is.
    pub fn optimistic<F>(mut self, updater: F) -> Self
    where
        F: Fn(&QueryKey, &CacheEntry) -> Option<CacheEntry> + Send + 'static,
    {
        self.optimistic = Some(Box::new(updater));
        self
    }

    /// Rewrite applied to every affected key once the server answered.
    pub fn on_settle<F>(mut self, updater: F) -> Self
    where
        F: Fn(&ServerResult, &QueryKey, &CacheEntry) -> Option<CacheEntry> + Send + 'static,
    {
        self.settle = Some(Box::new(updater));
        self
    }

    /// Apply `delta` to every cached copy of `target` as part of the
    /// optimistic write.
    pub fn propagating(mut self, target: EntityRef, delta: FieldDelta) -> Self {
        self.propagation = Some((target, delta));
        self
    }

    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    Pending,
    Succeeded,
    RolledBack,
}

impl MutationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationStatus::Pending => "pending",
            MutationStatus::Succeeded => "succeeded",
            MutationStatus::RolledBack => "rolled_back",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    pub mutation_id: Uuid,
    pub entity: EntityRef,
    pub kind: MutationKind,
    pub started_at: OffsetDateTime,
    pub status: MutationStatus,
}

/// One key rewritten by a mutation: the entry before its first write and
/// after its last one.
#[derive(Debug)]
struct Written {
    key: QueryKey,
    before: Arc<CacheEntry>,
    after: Arc<CacheEntry>,
}

/// What a running mutation touched. `keys` receive the settle rewrite;
/// `written` is what a rollback restores. Keys absent at write time never
/// appear in `written` and are left alone.
#[derive(Debug)]
struct OptimisticSnapshot {
    mutation_id: Uuid,
    keys: Vec<QueryKey>,
    written: Vec<Written>,
}

impl OptimisticSnapshot {
    fn track(&mut self, key: &QueryKey, replaced: Replaced) {
        if !self.keys.contains(key) {
            self.keys.push(key.clone());
        }
        match self.written.iter_mut().find(|written| written.key == *key) {
            Some(written) => written.after = replaced.current,
            None => self.written.push(Written {
                key: key.clone(),
                before: replaced.previous,
                after: replaced.current,
            }),
        }
    }
}

/// Fetch bookkeeping of two entries matches, whatever their data.
fn same_fetch_state(left: &CacheEntry, right: &CacheEntry) -> bool {
    left.status == right.status
        && left.last_updated_at == right.last_updated_at
        && left.error == right.error
        && left.stale == right.stale
}

/// Awaitable result of [`MutationCoordinator::run`].
#[must_use = "a mutation handle reports rollback errors only when awaited"]
pub struct MutationHandle {
    record: MutationRecord,
    deduplicated: bool,
    settlement: SharedSettlement,
}

impl MutationHandle {
    pub fn record(&self) -> &MutationRecord {
        &self.record
    }

    pub fn mutation_id(&self) -> Uuid {
        self.record.mutation_id
    }

    /// True when this handle joined a mutation that was already in flight.
    pub fn is_deduplicated(&self) -> bool {
        self.deduplicated
    }
}

impl Future for MutationHandle {
    type Output = Settlement;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.settlement.poll_unpin(cx)
    }
}

type Slot = (EntityRef, MutationKind);

struct PendingMutation {
    record: MutationRecord,
    settlement: SharedSettlement,
}

/// Runs optimistic mutations against the shared store.
#[derive(Clone)]
pub struct MutationCoordinator {
    store: Arc<CacheStore>,
    propagator: Propagator,
    pending: Arc<DashMap<Slot, PendingMutation>>,
    recent: Arc<Mutex<VecDeque<MutationRecord>>>,
}

impl MutationCoordinator {
    pub fn new(store: Arc<CacheStore>, propagator: Propagator) -> Self {
        Self {
            store,
            propagator,
            pending: Arc::new(DashMap::new()),
            recent: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Start `spec`. The optimistic state is in the store when this returns.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn run(&self, spec: MutationSpec) -> MutationHandle {
        use dashmap::mapref::entry::Entry;

        let MutationSpec {
            entity,
            kind,
            keys,
            optimistic,
            remote,
            settle,
            propagation,
        } = spec;

        let (tx, rx) = oneshot::channel::<Settlement>();
        let settlement: SharedSettlement = async move {
            rx.await.unwrap_or_else(|_| {
                Err(MutationError::Aborted(
                    "settlement task ended without a result".to_string(),
                ))
            })
        }
        .boxed()
        .shared();

        let record = MutationRecord {
            mutation_id: Uuid::new_v4(),
            entity: entity.clone(),
            kind,
            started_at: OffsetDateTime::now_utc(),
            status: MutationStatus::Pending,
        };

        let slot = (entity.clone(), kind);
        match self.pending.entry(slot.clone()) {
            Entry::Occupied(occupied) => {
                let pending = occupied.get();
                counter!(METRIC_MUTATION_DEDUPLICATED_TOTAL, "kind" => kind.as_str()).increment(1);
                debug!(
                    entity = %entity,
                    kind = %kind,
                    mutation_id = %pending.record.mutation_id,
                    "Joined in-flight mutation"
                );
                return MutationHandle {
                    record: pending.record.clone(),
                    deduplicated: true,
                    settlement: pending.settlement.clone(),
                };
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PendingMutation {
                    record: record.clone(),
                    settlement: settlement.clone(),
                });
            }
        }

        let snapshot = self.capture(record.mutation_id, &keys, propagation.as_ref());
        let mut guard = SettleGuard {
            store: Arc::clone(&self.store),
            pending: Arc::clone(&self.pending),
            recent: Arc::clone(&self.recent),
            slot,
            record: record.clone(),
            snapshot: Some(snapshot),
            started: Instant::now(),
        };

        if let Some(optimistic) = optimistic.as_ref() {
            for key in &keys {
                let replaced = self
                    .store
                    .replace_existing(key, |entry| optimistic(key, &**entry).map(Arc::new));
                if let Some(replaced) = replaced {
                    guard.track(key, replaced);
                }
            }
        }
        if let Some((target, delta)) = propagation.as_ref() {
            for (key, replaced) in self.propagator.propagate(target, delta) {
                guard.track(&key, replaced);
            }
        }
        debug!(
            entity = %entity,
            kind = %kind,
            mutation_id = %record.mutation_id,
            keys = guard.snapshot_len(),
            "Optimistic state applied"
        );

        tokio::spawn(async move {
            let result = match remote().await {
                Ok(server) => {
                    guard.commit(&server, settle.as_ref());
                    Ok(server)
                }
                Err(err) => {
                    guard.rollback(&err.to_string());
                    Err(MutationError::Remote(err))
                }
            };
            drop(guard);
            let _ = tx.send(result);
        });

        MutationHandle {
            record,
            deduplicated: false,
            settlement,
        }
    }

    pub fn is_pending(&self, entity: &EntityRef, kind: MutationKind) -> bool {
        self.pending.contains_key(&(entity.clone(), kind))
    }

    pub fn pending_records(&self) -> Vec<MutationRecord> {
        self.pending
            .iter()
            .map(|pending| pending.record.clone())
            .collect()
    }

    /// Settled mutations, oldest first.
    pub fn recent_records(&self) -> Vec<MutationRecord> {
        mutex_lock(&self.recent, SOURCE, "recent_records")
            .iter()
            .cloned()
            .collect()
    }

    /// Settle targets known before any write: the declared keys plus every
    /// live copy of the propagation target.
    fn capture(
        &self,
        mutation_id: Uuid,
        keys: &[QueryKey],
        propagation: Option<&(EntityRef, FieldDelta)>,
    ) -> OptimisticSnapshot {
        let mut all_keys = keys.to_vec();
        if let Some((target, _)) = propagation {
            for key in self.propagator.affected_keys(target) {
                if !all_keys.contains(&key) {
                    all_keys.push(key);
                }
            }
        }

        OptimisticSnapshot {
            mutation_id,
            keys: all_keys,
            written: Vec::new(),
        }
    }
}

/// Owns a running mutation's snapshot and pending slot. Dropping it without
/// [`commit`](Self::commit) or [`rollback`](Self::rollback) rolls back, and
/// dropping it always frees the slot.
struct SettleGuard {
    store: Arc<CacheStore>,
    pending: Arc<DashMap<Slot, PendingMutation>>,
    recent: Arc<Mutex<VecDeque<MutationRecord>>>,
    slot: Slot,
    record: MutationRecord,
    snapshot: Option<OptimisticSnapshot>,
    started: Instant,
}

impl SettleGuard {
    fn snapshot_len(&self) -> usize {
        self.snapshot
            .as_ref()
            .map_or(0, |snapshot| snapshot.keys.len())
    }

    fn track(&mut self, key: &QueryKey, replaced: Replaced) {
        if let Some(snapshot) = self.snapshot.as_mut() {
            snapshot.track(key, replaced);
        }
    }

    fn commit(&mut self, server: &ServerResult, settle: Option<&SettleUpdater>) {
        let Some(snapshot) = self.snapshot.take() else {
            return;
        };
        if let Some(settle) = settle {
            for key in &snapshot.keys {
                self.store
                    .update_existing(key, |entry| settle(server, key, entry));
            }
        }
        self.record.status = MutationStatus::Succeeded;
        counter!(METRIC_MUTATION_TOTAL, "kind" => self.record.kind.as_str(), "result" => "succeeded")
            .increment(1);
        info!(
            entity = %self.record.entity,
            kind = %self.record.kind,
            mutation_id = %snapshot.mutation_id,
            "Mutation settled"
        );
    }

    fn rollback(&mut self, reason: &str) {
        let Some(snapshot) = self.snapshot.take() else {
            return;
        };
        let mut restored = 0;
        for written in snapshot.written {
            let reinstalled = self.store.replace_existing(&written.key, |live| {
                if same_fetch_state(live, &written.after) {
                    return Some(Arc::clone(&written.before));
                }
                // a fetch settled meanwhile; its status and timestamps stay
                Some(Arc::new(CacheEntry {
                    data: written.before.data.clone(),
                    ..CacheEntry::clone(live)
                }))
            });
            if reinstalled.is_some() {
                restored += 1;
            }
        }
        self.record.status = MutationStatus::RolledBack;
        counter!(METRIC_MUTATION_TOTAL, "kind" => self.record.kind.as_str(), "result" => "rolled_back")
            .increment(1);
        counter!(METRIC_MUTATION_ROLLBACK_TOTAL, "kind" => self.record.kind.as_str()).increment(1);
        warn!(
            entity = %self.record.entity,
            kind = %self.record.kind,
            mutation_id = %snapshot.mutation_id,
            restored,
            reason,
            "Mutation rolled back"
        );
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if self.snapshot.is_some() {
            self.rollback("settlement aborted");
        }

        let mutation_id = self.record.mutation_id;
        self.pending
            .remove_if(&self.slot, |_, pending| pending.record.mutation_id == mutation_id);

        let mut recent = mutex_lock(&self.recent, SOURCE, "settle");
        if recent.len() == RECENT_LIMIT {
            recent.pop_front();
        }
        recent.push_back(self.record.clone());

        histogram!(METRIC_MUTATION_SETTLE_MS, "kind" => self.record.kind.as_str())
            .record(self.started.elapsed().as_secs_f64() * 1000.0);
        debug!(
            mutation_id = %mutation_id,
            status = self.record.status.as_str(),
            "Mutation record cleared"
        );
    }
}
