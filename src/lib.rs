//! Client-side data synchronization for a social reading app.
//!
//! A reactive in-memory cache of server collections with optimistic
//! mutations, cross-feed consistency for denormalized copies, cursor
//! pagination and debounced search. [`SyncClient`] wires the pieces together.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;

pub use application::client::SyncClient;
