//! Rate governance.
//!
//! Two layers keep a harvest inside the API's limits:
//!
//! - [`ApiRateLimiter`] paces individual requests client-side (a token bucket
//!   from the `governor` crate), smoothing bursts.
//! - [`RateGovernor`] reads the server's own quota report and naps until the
//!   named buckets have enough calls left before a unit of work begins.

use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conditional::{ConditionalClient, FetchOptions};
use crate::error::{HarvestError, Result};
use crate::locator::Locator;
use crate::shutdown::Shutdown;

/// Type alias for the governor rate limiter.
type GovernorRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Default client-side pacing (requests per second).
///
/// GitHub allows 5000 requests/hour (~1.4/sec); 10/sec still permits bursts
/// while the quota check does the real budgeting.
pub const DEFAULT_RPS: u32 = 10;

/// Shortest nap, even when the reset time has already passed.
pub const MIN_NAP: Duration = Duration::from_millis(100);

/// Core bucket name in the quota report.
pub const CORE: &str = "core";
/// Search bucket name in the quota report.
pub const SEARCH: &str = "search";

/// A standalone API rate limiter using the governor crate.
///
/// ```ignore
/// let limiter = ApiRateLimiter::new(10); // 10 requests per second
///
/// // Before each API call:
/// limiter.wait().await;
/// ```
#[derive(Clone)]
pub struct ApiRateLimiter {
    inner: Arc<GovernorRateLimiter>,
}

impl ApiRateLimiter {
    /// Create a new rate limiter with the specified requests per second.
    ///
    /// Zero is treated as one.
    pub fn new(requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rps));

        Self {
            inner: Arc::new(rate_limiter),
        }
    }

    /// Wait until a request is allowed by the rate limiter.
    pub async fn wait(&self) {
        self.inner.until_ready().await;
    }
}

/// One quota bucket as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaBucket {
    pub name: String,
    pub limit: u64,
    pub used: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RateLimitResource {
    limit: u64,
    #[serde(default)]
    used: u64,
    remaining: u64,
    reset: i64,
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    #[serde(default)]
    resources: BTreeMap<String, RateLimitResource>,
}

/// Parse a `/rate_limit` body into buckets keyed by name.
pub fn parse_buckets(body: &Value) -> std::result::Result<BTreeMap<String, QuotaBucket>, String> {
    let response: RateLimitResponse =
        serde_json::from_value(body.clone()).map_err(|e| e.to_string())?;

    Ok(response
        .resources
        .into_iter()
        .map(|(name, r)| {
            let reset_at = DateTime::from_timestamp(r.reset, 0).unwrap_or_else(Utc::now);
            let bucket = QuotaBucket {
                name: name.clone(),
                limit: r.limit,
                used: r.used,
                remaining: r.remaining,
                reset_at,
            };
            (name, bucket)
        })
        .collect())
}

/// "Before this unit of work, bucket `bucket` must have `minimum` calls left."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaDemand {
    pub bucket: String,
    pub minimum: u64,
}

impl QuotaDemand {
    pub fn new(bucket: impl Into<String>, minimum: u64) -> Self {
        Self {
            bucket: bucket.into(),
            minimum,
        }
    }

    pub fn core(minimum: u64) -> Self {
        Self::new(CORE, minimum)
    }

    pub fn search(minimum: u64) -> Self {
        Self::new(SEARCH, minimum)
    }
}

/// How long to nap before `demands` can be met, or `None` if they are met now.
///
/// Each short bucket needs `reset_at - now`, rounded up to whole seconds
/// since resets are second-granular, and never less than `floor`. The nap is
/// the longest of those. Buckets absent from the report count as satisfied.
#[must_use]
pub fn nap_for(
    buckets: &BTreeMap<String, QuotaBucket>,
    demands: &[QuotaDemand],
    now: DateTime<Utc>,
    floor: Duration,
) -> Option<Duration> {
    demands
        .iter()
        .filter_map(|demand| {
            let bucket = buckets.get(&demand.bucket)?;
            if bucket.remaining >= demand.minimum {
                return None;
            }
            let until_reset = (bucket.reset_at - now).num_milliseconds();
            let millis = u64::try_from(until_reset).unwrap_or(0).div_ceil(1000) * 1000;
            Some(Duration::from_millis(millis).max(floor))
        })
        .max()
}

/// Ensures named quota buckets have enough calls left before work proceeds.
#[derive(Clone)]
pub struct RateGovernor {
    client: ConditionalClient,
    status: Locator,
    shutdown: Shutdown,
    floor: Duration,
}

impl RateGovernor {
    pub fn new(client: ConditionalClient, shutdown: Shutdown) -> Result<Self> {
        let status = client.locator("/rate_limit")?;
        Ok(Self {
            client,
            status,
            shutdown,
            floor: MIN_NAP,
        })
    }

    /// Override the minimum nap.
    #[must_use]
    pub fn with_floor(mut self, floor: Duration) -> Self {
        self.floor = floor;
        self
    }

    /// Fetch the current quota report, never from cache.
    ///
    /// A server without rate limiting (some Enterprise installs answer 404)
    /// yields an empty report.
    pub async fn probe(&self) -> Result<BTreeMap<String, QuotaBucket>> {
        let fetched = self
            .client
            .fetch(None, &self.status, &FetchOptions::default().bypass())
            .await?;
        if !fetched.has_data() {
            return Ok(BTreeMap::new());
        }
        parse_buckets(&fetched.body).map_err(|e| HarvestError::decode(self.status.as_str(), e))
    }

    /// Return once every demand is met, napping until reset as needed.
    ///
    /// Buckets the server does not report are treated as satisfied.
    ///
    /// # Errors
    ///
    /// [`HarvestError::Interrupted`] if shutdown is requested during a nap,
    /// or any error from probing the quota.
    pub async fn await_quota(&self, demands: &[QuotaDemand]) -> Result<()> {
        loop {
            self.shutdown.check()?;
            let buckets = self.probe().await?;

            for demand in demands {
                if !buckets.contains_key(&demand.bucket) && !buckets.is_empty() {
                    tracing::warn!(
                        bucket = %demand.bucket,
                        "Quota bucket not reported; treating as satisfied"
                    );
                }
            }

            let Some(nap) = nap_for(&buckets, demands, Utc::now(), self.floor) else {
                return Ok(());
            };

            tracing::info!(
                nap_secs = nap.as_secs_f64(),
                "Quota below threshold; waiting for reset"
            );
            self.shutdown.sleep(nap).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpResponse, MockTransport};
    use serde_json::json;

    fn bucket(name: &str, remaining: u64, reset_at: DateTime<Utc>) -> QuotaBucket {
        QuotaBucket {
            name: name.to_string(),
            limit: 5000,
            used: 5000 - remaining,
            remaining,
            reset_at,
        }
    }

    fn buckets(list: Vec<QuotaBucket>) -> BTreeMap<String, QuotaBucket> {
        list.into_iter().map(|b| (b.name.clone(), b)).collect()
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_800_000_000, 0).expect("valid timestamp")
    }

    fn rate_limit_body(core: (u64, i64), search: (u64, i64)) -> Value {
        json!({
            "resources": {
                "core": {"limit": 5000, "used": 5000 - core.0, "remaining": core.0, "reset": core.1},
                "search": {"limit": 30, "used": 30 - search.0, "remaining": search.0, "reset": search.1}
            },
            "rate": {"limit": 5000, "used": 5000 - core.0, "remaining": core.0, "reset": core.1}
        })
    }

    #[test]
    fn satisfied_demand_needs_no_nap() {
        let b = buckets(vec![bucket(CORE, 4000, now())]);
        assert_eq!(nap_for(&b, &[QuotaDemand::core(25)], now(), MIN_NAP), None);
    }

    #[test]
    fn short_bucket_naps_until_reset() {
        let reset = now() + chrono::Duration::seconds(10);
        let b = buckets(vec![bucket(CORE, 5, reset)]);
        assert_eq!(
            nap_for(&b, &[QuotaDemand::core(25)], now(), MIN_NAP),
            Some(Duration::from_secs(10))
        );
    }

    #[test]
    fn sub_second_remainder_rounds_up() {
        let reset = now() + chrono::Duration::seconds(10);
        let later = now() + chrono::Duration::milliseconds(300);
        let b = buckets(vec![bucket(CORE, 5, reset)]);
        assert_eq!(
            nap_for(&b, &[QuotaDemand::core(25)], later, MIN_NAP),
            Some(Duration::from_secs(10))
        );
    }

    #[test]
    fn past_reset_naps_for_floor() {
        let reset = now() - chrono::Duration::seconds(3);
        let b = buckets(vec![bucket(CORE, 0, reset)]);
        assert_eq!(
            nap_for(&b, &[QuotaDemand::core(25)], now(), MIN_NAP),
            Some(MIN_NAP)
        );
    }

    #[test]
    fn longest_deficient_bucket_wins() {
        let b = buckets(vec![
            bucket(CORE, 1, now() + chrono::Duration::seconds(30)),
            bucket(SEARCH, 0, now() + chrono::Duration::seconds(50)),
        ]);
        let demands = [QuotaDemand::core(25), QuotaDemand::search(5)];
        assert_eq!(
            nap_for(&b, &demands, now(), MIN_NAP),
            Some(Duration::from_secs(50))
        );
    }

    #[test]
    fn only_the_short_bucket_counts() {
        let b = buckets(vec![
            bucket(CORE, 4000, now() + chrono::Duration::seconds(3000)),
            bucket(SEARCH, 0, now() + chrono::Duration::seconds(20)),
        ]);
        let demands = [QuotaDemand::core(25), QuotaDemand::search(5)];
        assert_eq!(
            nap_for(&b, &demands, now(), MIN_NAP),
            Some(Duration::from_secs(20))
        );
    }

    #[test]
    fn unknown_bucket_is_satisfied() {
        let b = buckets(vec![bucket(CORE, 4000, now())]);
        assert_eq!(
            nap_for(&b, &[QuotaDemand::new("graphql", 100)], now(), MIN_NAP),
            None
        );
    }

    #[test]
    fn parse_buckets_reads_resources() {
        let parsed = parse_buckets(&rate_limit_body((42, 1_800_000_600), (7, 1_800_000_060)))
            .expect("parse");
        assert_eq!(parsed[CORE].remaining, 42);
        assert_eq!(parsed[CORE].used, 4958);
        assert_eq!(parsed[SEARCH].remaining, 7);
        assert_eq!(parsed[SEARCH].reset_at.timestamp(), 1_800_000_060);
    }

    #[test]
    fn parse_buckets_rejects_malformed_report() {
        assert!(parse_buckets(&json!({"resources": {"core": {"limit": "lots"}}})).is_err());
    }

    #[test]
    fn api_rate_limiter_treats_zero_as_one() {
        let limiter = ApiRateLimiter::new(0);
        let _ = limiter.clone();
    }

    fn governor(transport: &MockTransport) -> (RateGovernor, String) {
        let client = ConditionalClient::new(Arc::new(transport.clone()), "https://api.github.com")
            .expect("client");
        let governor = RateGovernor::new(client, Shutdown::new()).expect("governor");
        let url = governor.status.to_string();
        (governor, url)
    }

    #[tokio::test(start_paused = true)]
    async fn await_quota_naps_until_reset_then_reprobes() {
        let transport = MockTransport::new();
        let (governor, url) = governor(&transport);

        let reset = Utc::now().timestamp() + 11;
        transport.push_response(
            &url,
            HttpResponse::json(200, &rate_limit_body((5, reset), (30, reset))),
        );
        transport.push_response(
            &url,
            HttpResponse::json(200, &rate_limit_body((5000, reset + 3600), (30, reset))),
        );

        let start = tokio::time::Instant::now();
        governor
            .await_quota(&[QuotaDemand::core(25)])
            .await
            .expect("quota eventually available");

        assert!(start.elapsed() >= Duration::from_secs(10));
        assert_eq!(transport.requests_to(&url).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn await_quota_waits_on_search_even_when_core_is_fine() {
        let transport = MockTransport::new();
        let (governor, url) = governor(&transport);

        let now = Utc::now().timestamp();
        transport.push_response(
            &url,
            HttpResponse::json(200, &rate_limit_body((4000, now + 3000), (0, now + 31))),
        );
        transport.push_response(
            &url,
            HttpResponse::json(200, &rate_limit_body((3999, now + 3000), (30, now + 91))),
        );

        let start = tokio::time::Instant::now();
        governor
            .await_quota(&[QuotaDemand::core(25), QuotaDemand::search(5)])
            .await
            .expect("quota eventually available");

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(30));
        assert!(elapsed < Duration::from_secs(3000));
    }

    #[tokio::test]
    async fn await_quota_returns_immediately_when_satisfied() {
        let transport = MockTransport::new();
        let (governor, url) = governor(&transport);
        let now = Utc::now().timestamp();
        transport.push_response(
            &url,
            HttpResponse::json(200, &rate_limit_body((4000, now + 3000), (30, now + 60))),
        );

        governor
            .await_quota(&[QuotaDemand::core(25)])
            .await
            .expect("satisfied");
        assert_eq!(transport.requests_to(&url).len(), 1);
    }

    #[tokio::test]
    async fn missing_rate_limit_endpoint_means_unlimited() {
        let transport = MockTransport::new();
        let (governor, url) = governor(&transport);
        transport.set_sticky(&url, HttpResponse::status(404));

        assert!(governor.probe().await.expect("probe").is_empty());
        governor
            .await_quota(&[QuotaDemand::core(25)])
            .await
            .expect("unlimited");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_a_nap() {
        let transport = MockTransport::new();
        let client = ConditionalClient::new(Arc::new(transport.clone()), "https://api.github.com")
            .expect("client");
        let shutdown = Shutdown::new();
        let governor = RateGovernor::new(client, shutdown.clone()).expect("governor");
        let url = governor.status.to_string();

        let reset = Utc::now().timestamp() + 3600;
        transport.set_sticky(
            &url,
            HttpResponse::json(200, &rate_limit_body((0, reset), (30, reset))),
        );

        let handle = tokio::spawn(async move { governor.await_quota(&[QuotaDemand::core(25)]).await });
        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown.request();

        let result = handle.await.expect("join");
        assert!(matches!(result, Err(HarvestError::Interrupted)));
    }
}
