//! Canonical resource locators.
//!
//! A [`Locator`] is the cache key for a remote resource: the full request URL
//! including query parameters. Two requests share a cache record exactly when
//! their locators are equal.

use std::fmt;

use url::Url;

use crate::error::{HarvestError, Result};

/// A canonical absolute URL naming one remote resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Locator {
    url: Url,
}

impl Locator {
    /// Parse an absolute URL.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).map_err(|source| HarvestError::InvalidLocator {
            raw: raw.to_string(),
            source,
        })?;
        Ok(Self { url })
    }

    /// Join an API base URL and a path (which may carry a query string).
    ///
    /// The base may have its own path prefix (GitHub Enterprise serves the API
    /// under `/api/v3`); it is kept rather than replaced.
    pub fn from_base(base: &str, path: &str) -> Result<Self> {
        let raw = format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Self::parse(&raw)
    }

    /// The same resource with `per_page` and `page` query parameters set.
    ///
    /// Existing paging parameters are replaced; every other query parameter
    /// keeps its position.
    #[must_use]
    pub fn with_page(&self, page: u32, per_page: u32) -> Self {
        let mut url = self.url.clone();
        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "page" && k != "per_page")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(retained.iter())
            .append_pair("per_page", &per_page.to_string())
            .append_pair("page", &page.to_string());
        Self { url }
    }

    /// The same resource with one more query parameter, form-encoded.
    #[must_use]
    pub fn with_query(&self, key: &str, value: &str) -> Self {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair(key, value);
        Self { url }
    }

    /// The `page` query parameter, if present.
    #[must_use]
    pub fn page(&self) -> Option<u32> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == "page")
            .and_then(|(_, v)| v.parse().ok())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.url.path()
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}
