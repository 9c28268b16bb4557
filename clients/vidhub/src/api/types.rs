//! Shared types and paging infrastructure for the VidHub API client.

use crate::api::error::ApiError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use tokio_stream::Stream;

type OneFuturePage<'a, F, T> =
    Pin<Box<dyn Future<Output = Result<(F, (VecDeque<T>, Option<u32>)), ApiError>> + 'a + Send>>;

/// A paginated stream over one of the backend's `?page=&limit=` list endpoints.
///
/// Items are yielded one at a time, and the next page is only requested once the current one
/// has been drained. The fetcher returns the items of the requested page along with the number
/// of the page that follows it, if any.
pub struct PagedStream<'a, T, F> {
    current_items: VecDeque<T>,
    pending_request: Option<OneFuturePage<'a, F, T>>,
    is_done: bool,
}

impl<'a, T, F> PagedStream<'a, T, F> {
    pub fn new<Fut>(fetcher: F) -> Self
    where
        F: Fn(u32) -> Fut,
        F: Send + 'a,
        Fut: Future<Output = Result<(VecDeque<T>, Option<u32>), ApiError>> + Send + 'a,
    {
        let first_page = async move {
            let results = fetcher(1).await?;
            Ok((fetcher, results))
        };
        Self {
            pending_request: Some(Box::pin(first_page)),
            current_items: VecDeque::new(),
            is_done: false,
        }
    }
}

impl<'a, T: Unpin, F> Unpin for PagedStream<'a, T, F> {}

impl<'a, T: Unpin, F, Fut> Stream for PagedStream<'a, T, F>
where
    F: Fn(u32) -> Fut,
    F: Send + 'a,
    Fut: Future<Output = Result<(VecDeque<T>, Option<u32>), ApiError>> + Send + 'a,
{
    type Item = Result<T, ApiError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(item) = self.current_items.pop_front() {
                return Poll::Ready(Some(Ok(item)));
            }

            if self.is_done {
                return Poll::Ready(None);
            }

            let Some(pending) = self.pending_request.as_mut() else {
                self.is_done = true;
                return Poll::Ready(None);
            };

            match pending.as_mut().poll(cx) {
                Poll::Ready(Ok((fetcher, (items, next_page)))) => {
                    self.current_items.extend(items);

                    if let Some(next_page) = next_page {
                        // set up the next request, but only poll it once this page is drained
                        self.pending_request = Some(Box::pin(async move {
                            let results = fetcher(next_page).await?;
                            Ok((fetcher, results))
                        }));
                    } else {
                        self.is_done = true;
                        self.pending_request = None;
                    }
                    continue;
                }
                Poll::Ready(Err(e)) => {
                    self.pending_request = None;
                    self.is_done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Paging details attached to list responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    /// Total number of items across all pages.
    pub total: u64,
    /// The page this response holds, starting at 1.
    pub page: u32,
    /// Page size used for the request.
    pub limit: u32,
    /// Not every endpoint reports this; see [`PaginationMeta::next_page`].
    #[serde(default)]
    pub total_pages: Option<u32>,
}

impl PaginationMeta {
    /// The page after this one, or `None` if this is the last page.
    pub fn next_page(&self) -> Option<u32> {
        let has_more = match self.total_pages {
            Some(total_pages) => self.page < total_pages,
            None => u64::from(self.page) * u64::from(self.limit) < self.total,
        };
        has_more.then_some(self.page + 1)
    }
}

/// A single page of results as returned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: VecDeque<T>,
    pub meta: PaginationMeta,
}

impl<T> Paginated<T> {
    pub(crate) fn into_page(self) -> (VecDeque<T>, Option<u32>) {
        let next = self.meta.next_page();
        // an empty page never leads anywhere, even if the totals disagree
        let next = if self.data.is_empty() { None } else { next };
        (self.data, next)
    }
}

/// The `{"success": .., "message": ..}` envelope several mutation endpoints answer with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}
