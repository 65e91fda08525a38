//! Warden - harvests branch protection and repository configuration state
//! from the GitHub REST API into local snapshot stores.
//!
//! The engine is built from four cooperating parts:
//!
//! - a conditional-request cache ([`ConditionalClient`]) that sends stored
//!   validators and resolves "not modified" answers from the store
//! - a page iterator ([`PageIterator`]) for multi-page listings
//! - a rate governor ([`RateGovernor`]) that waits out low quota buckets
//! - a deferred retry queue ([`DeferredQueue`]) for statistics the server is
//!   still computing
//!
//! [`Harvester`] walks organizations and repositories with them and merges
//! per-repository fields into one [`SnapshotStore`] per organization.
//!
//! # Features
//!
//! - `test-support` - Exposes [`http::MockTransport`] for integration tests.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use warden::{ConditionalClient, HarvestOptions, Harvester, Shutdown};
//! use warden::http::reqwest_transport::ReqwestTransport;
//!
//! let transport = ReqwestTransport::with_timeout(warden::http::DEFAULT_TIMEOUT)?;
//! let client = ConditionalClient::new(Arc::new(transport), "https://api.github.com")?
//!     .with_token(token);
//! let harvester = Harvester::new(client, HarvestOptions::default(), Shutdown::new())?;
//!
//! let who = harvester.whoami().await?;
//! let summaries = harvester.run(store_dir, &orgs, None, &who, false).await?;
//! ```

pub mod compliance;
pub mod conditional;
pub mod db;
pub mod entity;
pub mod error;
pub mod harvest;
pub mod http;
pub mod locator;
pub mod migration;
pub mod pagination;
pub mod progress;
pub mod rate_limit;
pub mod retry;
pub mod search;
pub mod shutdown;
pub mod store;

pub use conditional::{CacheMode, CacheStats, ConditionalClient, FetchOptions, FetchOutcome, Fetched};
pub use db::connect_and_migrate;
pub use error::{HarvestError, Result, short_error_message};
pub use harvest::{HarvestOptions, Harvester, OrgSummary, RepoFailure, RepoFields, org_from_arg};
pub use locator::Locator;
pub use pagination::{PageIterator, PageOptions};
pub use progress::{HarvestProgress, ProgressCallback};
pub use rate_limit::{ApiRateLimiter, QuotaBucket, QuotaDemand, RateGovernor};
pub use retry::{DeferredCall, DeferredQueue, RetryConfig, Submission};
pub use shutdown::Shutdown;
pub use store::{CacheRecord, EntityRecord, SnapshotStore, StoreError, Validators};
