//! Page-walking shared by every paginated platform endpoint.
//!
//! Platforms use three conventions, all reduced to "the next page's token":
//!
//! - cursor (Shopee `next_cursor` + `more`)
//! - page token / page number (Google `nextPageToken`, TikTok `page_info`)
//! - link following (Meta `paging.next`)
//!
//! [`fetch_all`] keeps requesting until a page carries no next token.

use std::collections::HashSet;
use std::future::Future;

use crate::error::PlatformError;

/// Maximum number of pages to fetch before returning an error.
///
/// Each page request may itself be retried by the fetcher, so the worst-case
/// request count is `MAX_PAGES * (1 + max_retries)`.
pub const MAX_PAGES: usize = 200;

/// One page of results and the token for the next page, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

impl<T> Page<T> {
    #[must_use]
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

/// Fetch every page and concatenate the items in page order.
///
/// `fetch_page` is called with `None` for the first page and with the
/// previous page's `next` token afterwards. An empty token ends the walk.
///
/// **All-or-nothing**: a failing page discards the pages already fetched.
///
/// # Errors
///
/// - Any error returned by `fetch_page`.
/// - [`PlatformError::RepeatedCursor`] when a page hands back a token that
///   was already followed.
/// - [`PlatformError::PaginationLimit`] after `max_pages` pages.
pub async fn fetch_all<T, F, Fut>(
    context: &str,
    max_pages: usize,
    mut fetch_page: F,
) -> Result<Vec<T>, PlatformError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, PlatformError>>,
{
    let mut all_items: Vec<T> = Vec::new();
    let mut cursor: Option<String> = None;
    let mut seen: HashSet<String> = HashSet::new();

    for page_count in 1..=max_pages {
        let page = fetch_page(cursor.take()).await?;
        all_items.extend(page.items);

        match page.next.filter(|next| !next.is_empty()) {
            None => {
                tracing::debug!(
                    context,
                    pages = page_count,
                    items = all_items.len(),
                    "pagination complete"
                );
                return Ok(all_items);
            }
            Some(next) => {
                if !seen.insert(next.clone()) {
                    return Err(PlatformError::RepeatedCursor {
                        context: context.to_owned(),
                        cursor: next,
                    });
                }
                cursor = Some(next);
            }
        }
    }

    Err(PlatformError::PaginationLimit {
        context: context.to_owned(),
        max_pages,
    })
}

/// Next page number for APIs that report `page` / `total_page`.
#[must_use]
pub fn next_page_number(page: u64, total_page: u64) -> Option<String> {
    (page < total_page).then(|| (page + 1).to_string())
}

/// Extracts the value of a named query parameter from a URL string.
///
/// Does not decode percent-encoded characters; callers re-send the value
/// exactly as the platform encoded it.
#[must_use]
pub fn extract_query_param(url: &str, param: &str) -> Option<String> {
    let query_start = url.find('?')? + 1;
    let query = &url[query_start..];

    let needle = format!("{param}=");
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix(needle.as_str()) {
            let value = value.split('#').next().unwrap_or(value);
            if !value.is_empty() {
                return Some(value.to_owned());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// K full pages of size S served by page number.
    async fn walk(pages: usize, size: usize) -> Result<Vec<usize>, PlatformError> {
        fetch_all("test", MAX_PAGES, move |cursor| async move {
            let index: usize = cursor.map_or(0, |c| c.parse().unwrap());
            if pages == 0 {
                return Ok(Page::last(Vec::new()));
            }
            let items = (index * size..(index + 1) * size).collect();
            let next = (index + 1 < pages).then(|| (index + 1).to_string());
            Ok(Page { items, next })
        })
        .await
    }

    #[tokio::test]
    async fn returns_every_item_without_gaps_or_duplicates() {
        for pages in 0..6 {
            let items = walk(pages, 3).await.unwrap();
            assert_eq!(items, (0..pages * 3).collect::<Vec<_>>(), "pages = {pages}");
        }
    }

    #[tokio::test]
    async fn empty_next_token_ends_the_walk() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let items = fetch_all("test", MAX_PAGES, move |_| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(Page {
                    items: vec![1],
                    next: Some(String::new()),
                })
            }
        })
        .await
        .unwrap();
        assert_eq!(items, vec![1]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_cursor_is_an_error() {
        let result = fetch_all("test", MAX_PAGES, |_| async {
            Ok(Page {
                items: vec![1],
                next: Some("same".to_owned()),
            })
        })
        .await;
        match result {
            Err(PlatformError::RepeatedCursor { cursor, .. }) => assert_eq!(cursor, "same"),
            other => panic!("expected RepeatedCursor, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stops_at_the_page_limit() {
        let result = fetch_all("test", 3, |cursor| async move {
            let n: usize = cursor.map_or(0, |c| c.parse().unwrap());
            Ok(Page {
                items: vec![n],
                next: Some((n + 1).to_string()),
            })
        })
        .await;
        assert!(matches!(
            result,
            Err(PlatformError::PaginationLimit { max_pages: 3, .. })
        ));
    }

    #[tokio::test]
    async fn page_error_discards_earlier_pages() {
        let result: Result<Vec<u32>, _> = fetch_all("test", MAX_PAGES, |cursor| async move {
            match cursor {
                None => Ok(Page {
                    items: vec![1],
                    next: Some("2".to_owned()),
                }),
                Some(_) => Err(PlatformError::api("test", 500, "boom")),
            }
        })
        .await;
        assert!(matches!(result, Err(PlatformError::Api { .. })));
    }

    #[test]
    fn next_page_number_stops_on_last_page() {
        assert_eq!(next_page_number(1, 3).as_deref(), Some("2"));
        assert_eq!(next_page_number(3, 3), None);
        assert_eq!(next_page_number(1, 0), None);
    }

    #[test]
    fn extract_query_param_finds_later_params() {
        assert_eq!(
            extract_query_param("https://x.com/insights?limit=25&after=ABC", "after"),
            Some("ABC".to_owned())
        );
        assert!(extract_query_param("https://x.com/insights?limit=25", "after").is_none());
    }
}
