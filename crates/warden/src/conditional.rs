//! Conditional HTTP fetching backed by the snapshot store.
//!
//! Every fetch that goes through [`ConditionalClient`] may carry the
//! validators of a previous response for the same locator. When the server
//! answers 304 the cached body is returned in place of a re-download. All
//! response statuses are classified here, once, so callers only deal with a
//! [`FetchOutcome`].

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::{HarvestError, Result};
use crate::http::{HttpRequest, HttpTransport};
use crate::locator::Locator;
use crate::rate_limit::ApiRateLimiter;
use crate::store::{CacheRecord, SnapshotStore, Validators};

/// Default media type for GitHub REST responses.
pub const GITHUB_JSON: &str = "application/vnd.github+json";

/// Whether a fetch consults and updates the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Send validators when a cached record exists; store fresh responses.
    #[default]
    Conditional,
    /// Neither read nor write the cache.
    Bypass,
}

/// Per-call fetch options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub cache: CacheMode,
    /// Statuses the caller is prepared to handle.
    pub accepted: Vec<u16>,
    /// Turn an "absent" answer into [`HarvestError::NotFound`].
    pub require_existence: bool,
    /// Extra media type to advertise in `Accept`, for preview features.
    pub media_type: Option<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            cache: CacheMode::Conditional,
            accepted: vec![200, 304],
            require_existence: false,
            media_type: None,
        }
    }
}

impl FetchOptions {
    #[must_use]
    pub fn bypass(mut self) -> Self {
        self.cache = CacheMode::Bypass;
        self
    }

    #[must_use]
    pub fn accepting(mut self, statuses: &[u16]) -> Self {
        self.accepted = statuses.to_vec();
        self
    }

    #[must_use]
    pub fn require_existence(mut self) -> Self {
        self.require_existence = true;
        self
    }

    #[must_use]
    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }
}

/// How a response was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// 200, or another accepted 2xx: the body is new.
    Fresh,
    /// 304: the body is the cached one (or null if nothing was cached).
    NotModified,
    /// 202: the server is still computing the resource.
    NotReady,
    /// 301: permanent redirect, treated as no data.
    Moved,
    /// 403/404/410: gone or not visible to this identity.
    Absent,
    /// Any other status the caller listed as accepted.
    Accepted,
}

/// The result of one conditional fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub status: u16,
    pub outcome: FetchOutcome,
    pub body: Value,
}

impl Fetched {
    /// Whether the body carries data (not null).
    #[must_use]
    pub fn has_data(&self) -> bool {
        !self.body.is_null()
    }

    #[must_use]
    pub fn into_body(self) -> Value {
        self.body
    }
}

/// Classify a status code. `None` means the status is not accepted.
#[must_use]
pub fn classify(status: u16, accepted: &[u16]) -> Option<FetchOutcome> {
    match status {
        200 => Some(FetchOutcome::Fresh),
        202 => Some(FetchOutcome::NotReady),
        304 => Some(FetchOutcome::NotModified),
        301 => Some(FetchOutcome::Moved),
        403 | 404 | 410 => Some(FetchOutcome::Absent),
        s if accepted.contains(&s) && (200..300).contains(&s) => Some(FetchOutcome::Fresh),
        s if accepted.contains(&s) => Some(FetchOutcome::Accepted),
        _ => None,
    }
}

/// Statistics about cache usage during a run.
///
/// Tracks how many fetches were answered from the cache (304 Not Modified)
/// vs. freshly fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of 304 Not Modified answers.
    pub cache_hits: u32,
    /// Number of fresh bodies received.
    pub fresh_fetches: u32,
}

impl CacheStats {
    /// Returns true if all requests were cache hits (no fresh fetches needed).
    #[inline]
    pub fn all_cached(&self) -> bool {
        self.cache_hits > 0 && self.fresh_fetches == 0
    }

    /// Returns the cache hit ratio (0.0 to 1.0).
    ///
    /// Returns 0.0 if no requests were made.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.fresh_fetches;
        if total == 0 {
            0.0
        } else {
            f64::from(self.cache_hits) / f64::from(total)
        }
    }
}

/// HTTP client that issues conditional GETs against one API base URL.
///
/// Cheap to clone; clones share the transport, pacer and statistics.
#[derive(Clone)]
pub struct ConditionalClient {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    token: Option<String>,
    pacer: Option<ApiRateLimiter>,
    stats: Arc<Mutex<CacheStats>>,
}

impl ConditionalClient {
    /// Create a client for `base_url` (e.g. `https://api.github.com`).
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: &str) -> Result<Self> {
        // Validate once so every later join can assume a good base.
        Locator::parse(base_url)?;
        Ok(Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            pacer: None,
            stats: Arc::new(Mutex::new(CacheStats::default())),
        })
    }

    /// Authenticate every request with a bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Pace outgoing requests with a client-side limiter.
    #[must_use]
    pub fn with_pacer(mut self, pacer: ApiRateLimiter) -> Self {
        self.pacer = Some(pacer);
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a locator for an API path.
    pub fn locator(&self, path: &str) -> Result<Locator> {
        Locator::from_base(&self.base_url, path)
    }

    /// Snapshot of the cache statistics so far.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }

    fn record(&self, outcome: FetchOutcome) {
        if let Ok(mut stats) = self.stats.lock() {
            match outcome {
                FetchOutcome::Fresh => stats.fresh_fetches += 1,
                FetchOutcome::NotModified => stats.cache_hits += 1,
                _ => {}
            }
        }
    }

    fn headers(&self, options: &FetchOptions) -> Vec<(String, String)> {
        let accept = match &options.media_type {
            Some(media_type) => format!("{GITHUB_JSON}, {media_type}"),
            None => GITHUB_JSON.to_string(),
        };
        let mut headers = vec![
            ("Accept".to_string(), accept),
            ("X-GitHub-Api-Version".to_string(), "2022-11-28".to_string()),
        ];
        if let Some(token) = &self.token {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        headers
    }

    /// Fetch one resource.
    ///
    /// With [`CacheMode::Conditional`] and a store, the cached record's
    /// validators are sent and a 304 resolves to the cached body; a fresh
    /// 2xx body replaces the cached record. Without a store the cache is
    /// skipped entirely.
    ///
    /// # Errors
    ///
    /// - [`HarvestError::NotFound`] for an absent resource when
    ///   `require_existence` is set
    /// - [`HarvestError::UnexpectedStatus`] for a status outside the accepted set
    /// - [`HarvestError::Transport`] or [`HarvestError::Decode`] for I/O failures
    /// - [`HarvestError::Store`] if the cache cannot be read or written
    pub async fn fetch(
        &self,
        store: Option<&SnapshotStore>,
        locator: &Locator,
        options: &FetchOptions,
    ) -> Result<Fetched> {
        let store = match options.cache {
            CacheMode::Conditional => store,
            CacheMode::Bypass => None,
        };

        let cached = match store {
            Some(store) => store.get(locator).await?,
            None => None,
        };

        let mut headers = self.headers(options);
        if let Some(header) = cached
            .as_ref()
            .and_then(|record| record.validators.conditional_header())
        {
            headers.push(header);
        }

        if let Some(pacer) = &self.pacer {
            pacer.wait().await;
        }

        let response = self
            .transport
            .send(HttpRequest {
                url: locator.to_string(),
                headers,
            })
            .await
            .map_err(|e| HarvestError::transport(locator.as_str(), e))?;

        let status = response.status;
        tracing::debug!(%locator, status, "GET");

        let Some(outcome) = classify(status, &options.accepted) else {
            return Err(HarvestError::unexpected_status(status, locator.as_str()));
        };
        self.record(outcome);

        let body = match outcome {
            FetchOutcome::Fresh => {
                let body = decode_body(locator, &response.body)?;
                if let Some(store) = store {
                    let validators = Validators::from_headers(&response.headers);
                    store
                        .put(&CacheRecord::new(locator, validators, body.clone(), status))
                        .await?;
                }
                body
            }
            FetchOutcome::NotModified => match cached {
                Some(record) => record.body,
                None => {
                    tracing::warn!(%locator, "304 without a cached record; treating as empty");
                    Value::Null
                }
            },
            FetchOutcome::Moved => {
                tracing::warn!(%locator, "Resource moved permanently; treating as absent");
                Value::Null
            }
            FetchOutcome::Absent => {
                if options.require_existence {
                    return Err(HarvestError::not_found(locator.as_str()));
                }
                tracing::debug!(%locator, status, "Resource absent or not visible");
                Value::Null
            }
            FetchOutcome::NotReady => Value::Null,
            FetchOutcome::Accepted => {
                tracing::debug!(%locator, status, "Accepted non-success status");
                decode_body(locator, &response.body).unwrap_or(Value::Null)
            }
        };

        Ok(Fetched {
            status,
            outcome,
            body,
        })
    }
}

fn decode_body(locator: &Locator, bytes: &[u8]) -> Result<Value> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|e| HarvestError::decode(locator.as_str(), e.to_string()))
}
