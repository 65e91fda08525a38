//! Lazy page-by-page iteration over list endpoints.
//!
//! Pages are requested on demand with `page=N` until one comes back empty.
//! A short page does not end iteration by itself: the server decides the
//! page size, so only an empty page (or an unpaged body) is conclusive.
//!
//! Only the first page is requested conditionally. Later pages are always
//! fetched fresh, because the first page's validator is the one that says
//! whether the listing as a whole changed.

use std::collections::VecDeque;

use serde_json::Value;

use crate::conditional::{CacheMode, ConditionalClient, FetchOptions, FetchOutcome};
use crate::error::Result;
use crate::locator::Locator;
use crate::rate_limit::{QuotaDemand, RateGovernor};
use crate::store::SnapshotStore;

/// Default page size requested from the server.
pub const DEFAULT_PER_PAGE: u32 = 100;

/// Upper bound on pages fetched for one listing.
pub const DEFAULT_MAX_PAGES: u32 = 1000;

/// Options for a paged listing.
#[derive(Debug, Clone)]
pub struct PageOptions {
    pub per_page: u32,
    pub max_pages: u32,
    /// Key of the item array when pages are envelopes (search results).
    pub items_key: Option<String>,
    /// Fetch options for the first page. Later pages bypass the cache.
    pub fetch: FetchOptions,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            per_page: DEFAULT_PER_PAGE,
            max_pages: DEFAULT_MAX_PAGES,
            items_key: None,
            fetch: FetchOptions::default(),
        }
    }
}

impl PageOptions {
    #[must_use]
    pub fn with_fetch(mut self, fetch: FetchOptions) -> Self {
        self.fetch = fetch;
        self
    }

    #[must_use]
    pub fn with_items_key(mut self, key: impl Into<String>) -> Self {
        self.items_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_limits(mut self, per_page: u32, max_pages: u32) -> Self {
        self.per_page = per_page;
        self.max_pages = max_pages;
        self
    }
}

/// Yields the items of a paged listing one at a time.
pub struct PageIterator<'a> {
    client: &'a ConditionalClient,
    store: Option<&'a SnapshotStore>,
    base: Locator,
    options: PageOptions,
    gate: Option<(&'a RateGovernor, Vec<QuotaDemand>)>,
    page: u32,
    buffer: VecDeque<Value>,
    finished: bool,
    fetches: u32,
    first_outcome: Option<FetchOutcome>,
}

impl<'a> PageIterator<'a> {
    pub fn new(
        client: &'a ConditionalClient,
        store: Option<&'a SnapshotStore>,
        base: Locator,
        options: PageOptions,
    ) -> Self {
        Self {
            client,
            store,
            base,
            options,
            gate: None,
            page: 1,
            buffer: VecDeque::new(),
            finished: false,
            fetches: 0,
            first_outcome: None,
        }
    }

    /// Await `demands` on `governor` before every page request.
    #[must_use]
    pub fn gated(mut self, governor: &'a RateGovernor, demands: Vec<QuotaDemand>) -> Self {
        self.gate = Some((governor, demands));
        self
    }

    /// Next item, fetching the next page when the buffer runs dry.
    pub async fn try_next(&mut self) -> Result<Option<Value>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }
            if self.finished {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    /// Drain the listing into a vector.
    pub async fn collect_all(&mut self) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        while let Some(item) = self.try_next().await? {
            items.push(item);
        }
        Ok(items)
    }

    /// Drain the listing, counting items.
    pub async fn count(&mut self) -> Result<usize> {
        let mut count = 0;
        while self.try_next().await?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// Number of page requests made so far.
    #[must_use]
    pub fn fetches(&self) -> u32 {
        self.fetches
    }

    /// How the first page was classified, once it has been fetched.
    ///
    /// Lets callers tell "an empty listing" from "a listing we may not see".
    #[must_use]
    pub fn first_outcome(&self) -> Option<FetchOutcome> {
        self.first_outcome
    }

    async fn fetch_page(&mut self) -> Result<()> {
        if self.page > self.options.max_pages {
            tracing::warn!(
                locator = %self.base,
                max_pages = self.options.max_pages,
                "Page limit reached; listing truncated"
            );
            self.finished = true;
            return Ok(());
        }

        if let Some((governor, demands)) = &self.gate {
            governor.await_quota(demands).await?;
        }

        let locator = self.base.with_page(self.page, self.options.per_page);
        let mut fetch = self.options.fetch.clone();
        if self.page > 1 {
            fetch.cache = CacheMode::Bypass;
        }

        let fetched = self.client.fetch(self.store, &locator, &fetch).await?;
        self.fetches += 1;
        if self.page == 1 {
            self.first_outcome = Some(fetched.outcome);
        }

        match self.items_of(fetched.body) {
            Page::Items(items) if !items.is_empty() => {
                self.buffer.extend(items);
                self.page += 1;
            }
            Page::Items(_) | Page::Empty => self.finished = true,
            Page::Single(item) => {
                self.buffer.push_back(item);
                self.finished = true;
            }
        }
        Ok(())
    }

    fn items_of(&self, body: Value) -> Page {
        match body {
            Value::Null => Page::Empty,
            Value::Array(items) => Page::Items(items),
            Value::Object(mut map) => match &self.options.items_key {
                Some(key) => match map.remove(key) {
                    Some(Value::Array(items)) => Page::Items(items),
                    _ => Page::Empty,
                },
                None => Page::Single(Value::Object(map)),
            },
            other => Page::Single(other),
        }
    }
}

enum Page {
    Items(Vec<Value>),
    Empty,
    Single(Value),
}
