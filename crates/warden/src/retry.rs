//! Deferred retries for resources the server is still computing.
//!
//! Some endpoints (commit statistics, most notably) answer 202 while the
//! server builds the result in the background. Rather than block on each
//! one, the harvest submits the call, moves on, and drains the queue at the
//! end of the organization. Each retry round waits linearly longer than the
//! last; an entry that exhausts its rounds is set aside and carried forward.

use std::time::Duration;

use tokio::time::Instant;

use crate::conditional::{ConditionalClient, FetchOptions, Fetched};
use crate::error::{Result, short_error_message};
use crate::locator::Locator;
use crate::shutdown::Shutdown;
use crate::store::SnapshotStore;

/// Statuses meaning "not ready yet, ask again later".
pub const DEFAULT_TRANSIENT_STATUSES: &[u16] = &[202];

/// Statuses a deferred call is prepared to handle.
const DEFERRED_ACCEPTED: &[u16] = &[200, 204, 304];

/// Configuration for deferred retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Delay before the first retry; round `n` waits `n` times this.
    pub base_delay: Duration,
    /// Retry rounds before an entry is set aside.
    pub max_attempts: u32,
    /// Statuses treated as transient.
    pub transient: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_attempts: 5,
            transient: DEFAULT_TRANSIENT_STATUSES.to_vec(),
        }
    }
}

impl RetryConfig {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
            ..Self::default()
        }
    }

    /// Delay before retry round `round` (1-based).
    #[must_use]
    pub fn delay_for_round(&self, round: u32) -> Duration {
        self.base_delay.saturating_mul(round.max(1))
    }

    #[must_use]
    pub fn is_transient(&self, status: u16) -> bool {
        self.transient.contains(&status)
    }
}

/// A call whose result fills one field of one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredCall {
    pub locator: Locator,
    pub entity_key: String,
    pub field: String,
}

/// A queued call with its retry bookkeeping.
#[derive(Debug, Clone)]
pub struct RetryableCall {
    pub call: DeferredCall,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub not_before: Instant,
}

/// A deferred call that finally produced a usable answer.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub call: DeferredCall,
    pub fetched: Fetched,
}

/// Result of submitting a call.
#[derive(Debug, Clone)]
pub enum Submission {
    /// The answer was usable right away.
    Ready(Fetched),
    /// The call was queued for a later retry.
    Deferred,
}

/// Queue of calls awaiting a non-transient answer.
pub struct DeferredQueue {
    client: ConditionalClient,
    config: RetryConfig,
    shutdown: Shutdown,
    entries: Vec<RetryableCall>,
}

impl DeferredQueue {
    pub fn new(client: ConditionalClient, config: RetryConfig, shutdown: Shutdown) -> Self {
        Self {
            client,
            config,
            shutdown,
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, locator: &Locator) -> bool {
        self.entries.iter().any(|e| &e.call.locator == locator)
    }

    /// Calls still pending, for persisting across runs.
    #[must_use]
    pub fn pending(&self) -> Vec<DeferredCall> {
        self.entries.iter().map(|e| e.call.clone()).collect()
    }

    fn fetch_options() -> FetchOptions {
        FetchOptions::default().accepting(DEFERRED_ACCEPTED)
    }

    /// Try `call` once; queue it if the answer is transient.
    ///
    /// A call whose locator is already queued is not fetched again.
    pub async fn submit(
        &mut self,
        store: Option<&SnapshotStore>,
        call: DeferredCall,
    ) -> Result<Submission> {
        if self.contains(&call.locator) {
            tracing::debug!(locator = %call.locator, "Already deferred");
            return Ok(Submission::Deferred);
        }

        let fetched = self
            .client
            .fetch(store, &call.locator, &Self::fetch_options())
            .await?;

        if self.config.is_transient(fetched.status) {
            tracing::debug!(locator = %call.locator, status = fetched.status, "Deferring");
            self.enqueue(call);
            Ok(Submission::Deferred)
        } else {
            Ok(Submission::Ready(fetched))
        }
    }

    /// Queue a call without trying it first (carried forward from a prior run).
    pub fn enqueue(&mut self, call: DeferredCall) {
        if self.contains(&call.locator) {
            return;
        }
        self.entries.push(RetryableCall {
            call,
            attempt_count: 0,
            max_attempts: self.config.max_attempts,
            not_before: Instant::now() + self.config.delay_for_round(1),
        });
    }

    /// Retry queued calls until every one is resolved or exhausted.
    ///
    /// Entries that exhaust their attempts stay in the queue with a reset
    /// attempt count, so they can be persisted and tried again next run.
    /// A call that fails for any reason other than a transient status is
    /// dropped with a warning.
    ///
    /// # Errors
    ///
    /// Fatal errors (store failure, shutdown) stop the drain; every
    /// unresolved entry is kept.
    pub async fn drain(&mut self, store: Option<&SnapshotStore>) -> Result<Vec<Resolved>> {
        let mut resolved = Vec::new();
        let mut exhausted = Vec::new();

        let outcome = self.drain_rounds(store, &mut resolved, &mut exhausted).await;
        self.entries.extend(exhausted);
        outcome.map(|()| resolved)
    }

    async fn drain_rounds(
        &mut self,
        store: Option<&SnapshotStore>,
        resolved: &mut Vec<Resolved>,
        exhausted: &mut Vec<RetryableCall>,
    ) -> Result<()> {
        let options = Self::fetch_options();

        while let Some(earliest) = self.entries.iter().map(|e| e.not_before).min() {
            let now = Instant::now();
            if earliest > now {
                self.shutdown.sleep(earliest - now).await?;
            }

            let now = Instant::now();
            let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
                .into_iter()
                .partition(|e| e.not_before <= now);
            self.entries = waiting;

            let mut due = due.into_iter();
            while let Some(mut entry) = due.next() {
                match self.client.fetch(store, &entry.call.locator, &options).await {
                    Ok(fetched) if self.config.is_transient(fetched.status) => {
                        entry.attempt_count += 1;
                        if entry.attempt_count >= entry.max_attempts {
                            tracing::warn!(
                                locator = %entry.call.locator,
                                attempts = entry.attempt_count,
                                "Still not ready; carrying forward"
                            );
                            entry.attempt_count = 0;
                            entry.not_before = Instant::now() + self.config.delay_for_round(1);
                            exhausted.push(entry);
                        } else {
                            entry.not_before = Instant::now()
                                + self.config.delay_for_round(entry.attempt_count + 1);
                            self.entries.push(entry);
                        }
                    }
                    Ok(fetched) => resolved.push(Resolved {
                        call: entry.call,
                        fetched,
                    }),
                    Err(e) if e.is_fatal() => {
                        self.entries.push(entry);
                        self.entries.extend(due);
                        return Err(e);
                    }
                    Err(e) => {
                        tracing::warn!(
                            locator = %entry.call.locator,
                            error = %short_error_message(&e),
                            "Dropping deferred call"
                        );
                    }
                }
            }
        }

        Ok(())
    }
}
