//! Composition root for the sync layer.

use std::sync::Arc;

use shelfsync_types::UserSummary;
use tracing::info;

use crate::application::actions::Actions;
use crate::application::mutation::{MutationCoordinator, Mutator};
use crate::application::query::{FetcherRegistry, QueryClient};
use crate::application::search::SearchController;
use crate::cache::{CacheStore, PropagationRegistry, Propagator, QueryKey, SyncConfig, family};

/// One store plus the services that read and write it. Cheap to clone.
#[derive(Clone)]
pub struct SyncClient {
    config: SyncConfig,
    store: Arc<CacheStore>,
    query: QueryClient,
    propagator: Propagator,
    actions: Actions,
}

impl SyncClient {
    pub fn new(
        config: SyncConfig,
        fetchers: FetcherRegistry,
        mutator: Arc<dyn Mutator>,
        viewer: UserSummary,
    ) -> Self {
        Self::with_registry(
            config,
            fetchers,
            mutator,
            viewer,
            PropagationRegistry::bookshelf(),
        )
    }

    pub fn with_registry(
        config: SyncConfig,
        fetchers: FetcherRegistry,
        mutator: Arc<dyn Mutator>,
        viewer: UserSummary,
        registry: PropagationRegistry,
    ) -> Self {
        let store = Arc::new(CacheStore::new());
        let query = QueryClient::new(Arc::clone(&store), Arc::new(fetchers), config.stale_time());
        let propagator = Propagator::new(Arc::clone(&store), Arc::new(registry));
        let coordinator = MutationCoordinator::new(Arc::clone(&store), propagator.clone());
        let actions = Actions::new(Arc::clone(&store), coordinator, mutator, viewer);
        Self {
            config,
            store,
            query,
            propagator,
            actions,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn query(&self) -> &QueryClient {
        &self.query
    }

    pub fn propagator(&self) -> &Propagator {
        &self.propagator
    }

    pub fn actions(&self) -> &Actions {
        &self.actions
    }

    pub fn mutations(&self) -> &MutationCoordinator {
        self.actions.coordinator()
    }

    /// Debounced search over `["book-search", query]`.
    pub fn book_search(&self) -> SearchController {
        self.search_controller(QueryKey::family(family::BOOK_SEARCH))
    }

    pub fn search_controller(&self, base: QueryKey) -> SearchController {
        SearchController::new(self.query.clone(), base, self.config.search_debounce())
    }

    /// Drop every cached entry, e.g. on logout. Fetches still in flight
    /// discard their results.
    pub fn reset(&self) {
        let dropped = self.store.len();
        self.store.reset();
        info!(dropped, "Cache reset");
    }
}
