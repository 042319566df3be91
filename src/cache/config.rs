//! Sync layer tuning.

use std::time::Duration;

use serde::Deserialize;

use crate::config::{DEFAULT_COMMENT_PAGE_SIZE, DEFAULT_SEARCH_DEBOUNCE_MS, DEFAULT_STALE_TIME_MS};

/// Timing and paging knobs shared by the query layer and search controllers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet period after the last keystroke before a search is committed.
    pub search_debounce_ms: u64,
    /// Age after which fetched data is refetched on the next read.
    pub stale_time_ms: u64,
    /// Page size requested for comment lists.
    pub comment_page_size: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            search_debounce_ms: DEFAULT_SEARCH_DEBOUNCE_MS,
            stale_time_ms: DEFAULT_STALE_TIME_MS,
            comment_page_size: DEFAULT_COMMENT_PAGE_SIZE,
        }
    }
}

impl From<&crate::config::SyncSettings> for SyncConfig {
    fn from(settings: &crate::config::SyncSettings) -> Self {
        Self {
            search_debounce_ms: u64::try_from(settings.search_debounce.as_millis())
                .unwrap_or(u64::MAX),
            stale_time_ms: u64::try_from(settings.stale_time.as_millis()).unwrap_or(u64::MAX),
            comment_page_size: settings.comment_page_size.get(),
        }
    }
}

impl SyncConfig {
    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }

    /// Comment page size for backends; never zero.
    pub fn comment_page_size(&self) -> usize {
        usize::try_from(self.comment_page_size.max(1)).unwrap_or(usize::MAX)
    }
}
