use super::cancel::CancelFlag;
use super::progress::RunProgress;
use super::provider::{CallError, Reply};
use crate::quota::QuotaGovernor;
use std::future::Future;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct ListingPager {
    pub page_cost: f64,
    /// Safety stop for a feed that never returns an empty page.
    pub max_pages: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageFailure {
    pub page: u32,
    pub error: CallError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PagedListings<T> {
    pub items: Vec<T>,
    pub pages: u32,
    /// Set when a page call failed; items from earlier pages are kept.
    pub failure: Option<PageFailure>,
    pub capped: bool,
    pub cancelled: bool,
}

impl ListingPager {
    pub fn new(page_cost: f64, max_pages: u32) -> Self {
        Self {
            page_cost,
            max_pages: max_pages.max(1),
        }
    }

    /// Pages from 0 until an empty page, the item cap, a failed page, the page
    /// limit or cancellation. Every call is gated and settled.
    pub async fn collect<T, F, Fut>(
        &self,
        governor: &mut QuotaGovernor,
        cap: Option<usize>,
        progress: &RunProgress,
        cancel: &CancelFlag,
        mut call: F,
    ) -> PagedListings<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Reply<Vec<T>>, CallError>>,
    {
        let mut listings = PagedListings {
            items: Vec::new(),
            pages: 0,
            failure: None,
            capped: false,
            cancelled: false,
        };

        let mut page = 0u32;
        loop {
            if let Some(cap) = cap {
                if listings.items.len() >= cap {
                    info!(target = "ingest.pager", cap, items = listings.items.len(), "item cap reached");
                    listings.capped = true;
                    break;
                }
            }
            if page >= self.max_pages {
                warn!(target = "ingest.pager", max_pages = self.max_pages, "page limit reached");
                break;
            }
            if cancel.is_cancelled() {
                listings.cancelled = true;
                break;
            }

            governor.admit(self.page_cost).await;
            let result = call(page).await;
            let (reported, tokens_left) = match &result {
                Ok(reply) => (reply.tokens_consumed, reply.tokens_left),
                Err(err) => (err.reported_cost(), err.tokens_left()),
            };
            let cost = reported.unwrap_or(self.page_cost);
            let balance = governor.settle(cost, tokens_left);
            crate::metrics::calls_total("deal", if result.is_ok() { "success" } else { "failure" });

            match result {
                Ok(reply) if reply.data.is_empty() => {
                    info!(target = "ingest.pager", page, cost, balance, "feed exhausted");
                    break;
                }
                Ok(reply) => {
                    let count = reply.data.len();
                    listings.items.extend(reply.data);
                    listings.pages += 1;
                    progress.page_collected(count);
                    info!(
                        target = "ingest.pager",
                        page,
                        count,
                        total = listings.items.len(),
                        cost,
                        balance,
                        "page collected"
                    );
                }
                Err(error) => {
                    warn!(
                        target = "ingest.pager",
                        page,
                        error = %error,
                        kept = listings.items.len(),
                        "page failed; paging stopped"
                    );
                    listings.failure = Some(PageFailure { page, error });
                    break;
                }
            }
            page += 1;
        }
        listings
    }
}
