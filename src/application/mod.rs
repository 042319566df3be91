//! Sync services built on the cache layer.

pub mod actions;
pub mod client;
pub mod error;
pub mod mutation;
pub mod query;
pub mod search;
