//! Cross-key propagation of a change to every denormalized copy.

use std::sync::Arc;

use metrics::counter;
use shelfsync_types::EntityRef;
use tracing::debug;

use super::keys::QueryKey;
use super::registry::{FieldDelta, PropagationRegistry};
use super::store::{CacheStore, Replaced};

const METRIC_PROPAGATED_KEYS_TOTAL: &str = "shelfsync_propagated_keys_total";

/// Finds and rewrites every live entry holding a copy of an entity.
#[derive(Clone)]
pub struct Propagator {
    store: Arc<CacheStore>,
    registry: Arc<PropagationRegistry>,
}

impl Propagator {
    pub fn new(store: Arc<CacheStore>, registry: Arc<PropagationRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &PropagationRegistry {
        &self.registry
    }

    /// Keys whose current entry holds at least one copy of `entity`.
    pub fn affected_keys(&self, entity: &EntityRef) -> Vec<QueryKey> {
        self.store
            .entries_matching(|key| self.registry.shape_for(entity, key).is_some())
            .into_iter()
            .filter(|(key, entry)| {
                self.registry.shape_for(entity, key).is_some_and(|shape| {
                    entry
                        .items()
                        .any(|item| shape.projection.holds(item, entity))
                })
            })
            .map(|(key, _)| key)
            .collect()
    }

    /// Apply `delta` to every copy of `entity`. Keys without a copy, and
    /// absent keys, are left alone.
    ///
    /// Returns each rewritten key with the entry it replaced, read under the
    /// same lock as the write.
    pub fn propagate(&self, entity: &EntityRef, delta: &FieldDelta) -> Vec<(QueryKey, Replaced)> {
        let mut rewritten = Vec::new();
        for key in self.store.keys() {
            let Some(shape) = self.registry.shape_for(entity, &key) else {
                continue;
            };
            let projection = shape.projection;
            let replaced = self.store.replace_existing(&key, |entry| {
                entry
                    .map_items(|item| projection.apply(item, entity, delta))
                    .map(Arc::new)
            });
            if let Some(replaced) = replaced {
                rewritten.push((key, replaced));
            }
        }

        counter!(METRIC_PROPAGATED_KEYS_TOTAL).increment(rewritten.len() as u64);
        debug!(entity = %entity, keys = rewritten.len(), "Propagated entity change");
        rewritten
    }
}
