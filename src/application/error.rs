use std::error::Error as StdError;

use shelfsync_types::{EntityRefError, MutationKind};
use thiserror::Error;

use crate::config::LoadError;
use crate::infra::error::InfraError;

/// Flattened error chain, outermost message first.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }

    /// Chain joined with `": "`, as stored in [`ErrorInfo`](crate::cache::ErrorInfo).
    pub fn joined(&self) -> String {
        self.messages.join(": ")
    }
}

/// Failure reported by a backend collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("server rejected request with status {status}: {message}")]
    Server { status: u16, message: String },
    #[error("response could not be decoded: {0}")]
    Decode(String),
    #[error("{kind} is not supported by this backend")]
    Unsupported { kind: MutationKind },
}

impl RemoteError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("fetch failed: {0}")]
    Remote(#[from] RemoteError),
    #[error("no page fetcher registered for query family `{family}`")]
    NoFetcher { family: String },
}

/// Outcome of a mutation whose optimistic state had to be rolled back.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MutationError {
    #[error("mutation rolled back: {0}")]
    Remote(#[from] RemoteError),
    #[error("mutation settlement aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Mutation(#[from] MutationError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    InvalidEntity(#[from] EntityRefError),
}

impl SyncError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Top-level error of the command line binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("{0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

impl From<FetchError> for AppError {
    fn from(error: FetchError) -> Self {
        Self::Sync(SyncError::Fetch(error))
    }
}

impl From<MutationError> for AppError {
    fn from(error: MutationError) -> Self {
        Self::Sync(SyncError::Mutation(error))
    }
}
