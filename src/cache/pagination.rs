//! Merge cursor-paginated pages into one deduplicated logical list.
//!
//! All functions are pure: they take an entry by reference and return the
//! next value for [`CacheStore::set`](super::CacheStore::set).

use std::collections::HashMap;

use shelfsync_types::{EntityRef, Item};
use time::OffsetDateTime;

use super::store::{CacheEntry, EntryData, FetchStatus, Page};

/// Append `page` after the stored pages.
///
/// Incoming items already present anywhere in the entry keep the stored
/// position; the stored copy is replaced by the incoming one unless both
/// carry a version and the incoming one is older. The page itself is always
/// stored, even when it ends up empty, so a terminal page is remembered.
pub fn append_page(entry: &CacheEntry, page: Page) -> CacheEntry {
    let mut pages = entry.pages().to_vec();
    push_deduped(&mut pages, page);

    CacheEntry {
        data: Some(EntryData::Pages(pages)),
        status: FetchStatus::Success,
        last_updated_at: Some(OffsetDateTime::now_utc()),
        error: None,
        stale: entry.stale,
    }
}

/// The entry after a full refetch: `incoming` replaces every stored page and
/// staleness is cleared.
pub fn replace_all(incoming: Vec<Page>) -> CacheEntry {
    let mut pages = Vec::with_capacity(incoming.len());
    for page in incoming {
        push_deduped(&mut pages, page);
    }

    CacheEntry {
        data: Some(EntryData::Pages(pages)),
        status: FetchStatus::Success,
        last_updated_at: Some(OffsetDateTime::now_utc()),
        error: None,
        stale: false,
    }
}

/// The logical list: every item of every page, in stored order.
pub fn flatten(entry: &CacheEntry) -> Vec<Item> {
    entry.items().cloned().collect()
}

/// True when at least one page is stored and the last one has a cursor.
pub fn has_next_page(entry: &CacheEntry) -> bool {
    entry
        .pages()
        .last()
        .is_some_and(|page| page.next_cursor.is_some())
}

/// Cursor to request the page after the stored ones.
pub fn next_cursor(entry: &CacheEntry) -> Option<&str> {
    entry.pages().last().and_then(|page| page.next_cursor.as_deref())
}

/// Insert `item` at the head of the first page. Returns `None` when the
/// entry holds no pages or already holds the item.
pub fn prepend_item(entry: &CacheEntry, item: Item) -> Option<CacheEntry> {
    let identity = item.entity_ref();
    if entry.items().any(|stored| stored.entity_ref() == identity) {
        return None;
    }
    let mut pages = entry.pages().to_vec();
    pages.first_mut()?.items.insert(0, item);
    Some(CacheEntry {
        data: Some(EntryData::Pages(pages)),
        ..entry.clone()
    })
}

/// Drop every item with the given identity. Returns `None` when nothing matched.
pub fn remove_item(entry: &CacheEntry, identity: &EntityRef) -> Option<CacheEntry> {
    if !entry.items().any(|item| item.entity_ref() == *identity) {
        return None;
    }
    let pages = entry
        .pages()
        .iter()
        .map(|page| Page {
            items: page
                .items
                .iter()
                .filter(|item| item.entity_ref() != *identity)
                .cloned()
                .collect(),
            next_cursor: page.next_cursor.clone(),
        })
        .collect();
    Some(CacheEntry {
        data: Some(EntryData::Pages(pages)),
        ..entry.clone()
    })
}

fn push_deduped(pages: &mut Vec<Page>, page: Page) {
    // (page index, item index) of every stored identity
    let mut positions: HashMap<EntityRef, (usize, usize)> = HashMap::new();
    for (page_index, stored) in pages.iter().enumerate() {
        for (item_index, item) in stored.items.iter().enumerate() {
            positions.insert(item.entity_ref(), (page_index, item_index));
        }
    }

    let new_index = pages.len();
    let mut kept = Vec::with_capacity(page.items.len());
    for item in page.items {
        let identity = item.entity_ref();
        match positions.get(&identity).copied() {
            Some((page_index, item_index)) => {
                let slot = if page_index == new_index {
                    &mut kept[item_index]
                } else {
                    &mut pages[page_index].items[item_index]
                };
                if supersedes(&item, slot) {
                    *slot = item;
                }
            }
            None => {
                positions.insert(identity, (new_index, kept.len()));
                kept.push(item);
            }
        }
    }

    pages.push(Page {
        items: kept,
        next_cursor: page.next_cursor,
    });
}

fn supersedes(incoming: &Item, stored: &Item) -> bool {
    match (incoming.version(), stored.version()) {
        (Some(incoming), Some(stored)) => incoming >= stored,
        _ => true,
    }
}
