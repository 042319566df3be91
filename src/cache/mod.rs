//! Shelfsync cache layer.
//!
//! The in-memory half of the sync layer:
//!
//! - **Store**: key-addressed immutable entries with subscriptions
//! - **Pagination**: cursor pages merged into one deduplicated list
//! - **Propagation**: static routes from entities to the feeds embedding them
//!
//! ## Configuration
//!
//! Timing is controlled via the `[sync]` table of `shelfsync.toml`:
//!
//! ```toml
//! [sync]
//! search_debounce_ms = 300
//! stale_time_ms = 30000
//! comment_page_size = 20
//! ```

mod config;
pub mod keys;
mod lock;
pub mod pagination;
mod propagate;
mod registry;
mod store;

pub use config::SyncConfig;
pub use keys::{KeySegment, QueryKey, family};
pub(crate) use lock::mutex_lock;
pub use propagate::Propagator;
pub use registry::{
    EntityPattern, FieldDelta, KeyShape, Projection, PropagationRegistry, delta,
};
pub use store::{
    CacheEntry, CacheStore, EntryData, ErrorInfo, FetchStatus, Page, Replaced, SubscriberFn,
    Subscription,
};
