//! Drains paginated listings into a single in-memory collection.
//!
//! Two idioms are supported:
//!
//! - **size-paginated**: ask for `page_size` items and keep going while a page
//!   comes back full. A short or empty page ends the drain.
//! - **cursor**: every page reports `has_more` plus an opaque cursor. Drain
//!   while both hold; `has_more` with an empty cursor is terminal.
//!
//! A failing page aborts the drain and everything fetched so far is dropped.

use std::future::Future;

use crate::error::Result;

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub has_more: bool,
    /// Opaque continuation token for the next request.
    pub cursor: Option<String>,
}

impl<T> CursorPage<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self { items, has_more: false, cursor: None }
    }
}

/// Parameters for the next request of a size-paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizedPageRequest {
    /// Number of items received so far.
    pub offset: usize,
    pub page_size: usize,
    /// Key of the last item received, for `last_id` style endpoints.
    pub last_key: Option<String>,
}

/// Drain a cursor-paginated listing.
pub async fn fetch_all_by_cursor<T, F, Fut>(mut next_page: F) -> Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<CursorPage<T>>>,
{
    let mut items = Vec::new();
    let mut cursor = None;

    loop {
        let page = next_page(cursor.take()).await?;
        items.extend(page.items);

        match page.cursor.filter(|c| !c.is_empty()) {
            Some(next) if page.has_more => cursor = Some(next),
            _ => break,
        }
    }

    Ok(items)
}

/// Drain a size-paginated listing.
///
/// `key_of` extracts the identity passed back as `last_key` on the next request.
pub async fn fetch_all_by_size<T, K, F, Fut>(
    page_size: usize,
    key_of: K,
    mut next_page: F,
) -> Result<Vec<T>>
where
    K: Fn(&T) -> Option<String>,
    F: FnMut(SizedPageRequest) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut items: Vec<T> = Vec::new();
    let mut last_key = None;

    loop {
        let request = SizedPageRequest {
            offset: items.len(),
            page_size,
            last_key: last_key.take(),
        };
        let page = next_page(request).await?;
        let full = page_size > 0 && page.len() >= page_size;

        if let Some(last) = page.last() {
            last_key = key_of(last);
        }
        items.extend(page);

        if !full {
            break;
        }
    }

    Ok(items)
}
