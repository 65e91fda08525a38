//! Harvest orchestration: organizations, then repositories, then
//! per-repository sub-resources.
//!
//! Each repository's fields are merged into the organization's store as soon
//! as they are collected, so an interrupted run keeps everything up to the
//! last finished repository. Statistics the server has not computed yet go
//! through the deferred retry queue and are merged after the listing ends.

mod fields;

pub use fields::{COMMIT_ACTIVITY, RepoFields};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinSet;

use crate::conditional::{ConditionalClient, FetchOptions, FetchOutcome};
use crate::db::STORE_EXTENSION;
use crate::error::{HarvestError, Result, short_error_message};
use crate::locator::Locator;
use crate::pagination::{DEFAULT_MAX_PAGES, DEFAULT_PER_PAGE, PageIterator, PageOptions};
use crate::progress::{HarvestProgress, ProgressCallback, emit};
use crate::rate_limit::{QuotaDemand, RateGovernor};
use crate::retry::{DeferredCall, DeferredQueue, RetryConfig, Submission};
use crate::shutdown::Shutdown;
use crate::store::SnapshotStore;

/// Preview media type that exposes required-signature protection.
pub const SIGNATURES_MEDIA_TYPE: &str = "application/vnd.github.zzzax-preview+json";

/// Options controlling a harvest.
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    /// Core calls that must remain before each repository is started.
    pub min_core_quota: u64,
    /// Search calls that must remain before each search page.
    pub min_search_quota: u64,
    pub retry: RetryConfig,
    pub per_page: u32,
    pub max_pages: u32,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            min_core_quota: 25,
            min_search_quota: 5,
            retry: RetryConfig::default(),
            per_page: DEFAULT_PER_PAGE,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

/// One repository that could not be harvested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoFailure {
    pub full_name: String,
    pub error: String,
}

/// Outcome of harvesting one organization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrgSummary {
    pub org: String,
    /// The organization was missing or unreadable; nothing was harvested.
    pub skipped: bool,
    pub harvested: usize,
    pub failed: Vec<RepoFailure>,
    /// The repository listing stopped early with this error.
    pub listing_error: Option<String>,
    pub deferred_resolved: usize,
    /// Deferred calls carried forward to the next run.
    pub deferred_pending: usize,
}

impl OrgSummary {
    fn new(org: &str) -> Self {
        Self {
            org: org.to_string(),
            ..Self::default()
        }
    }
}

/// Organization name from a command-line argument.
///
/// A store file name (`acme.db`) is accepted in place of the name. Returns
/// `None` for a doubled suffix (`acme.db.db`), which is almost always a
/// mistake from globbing a previous run's output.
#[must_use]
pub fn org_from_arg(arg: &str) -> Option<&str> {
    let suffix = format!(".{STORE_EXTENSION}");
    match arg.strip_suffix(&suffix) {
        Some(stripped) if stripped.ends_with(&suffix) => None,
        Some(stripped) => Some(stripped),
        None => Some(arg),
    }
}

/// Walks organizations and repositories, filling per-organization stores.
#[derive(Clone)]
pub struct Harvester {
    client: ConditionalClient,
    governor: RateGovernor,
    options: HarvestOptions,
    shutdown: Shutdown,
    progress: Option<Arc<ProgressCallback>>,
}

impl Harvester {
    pub fn new(client: ConditionalClient, options: HarvestOptions, shutdown: Shutdown) -> Result<Self> {
        let governor = RateGovernor::new(client.clone(), shutdown.clone())?;
        Ok(Self {
            client,
            governor,
            options,
            shutdown,
            progress: None,
        })
    }

    #[must_use]
    pub fn with_progress(mut self, on_progress: ProgressCallback) -> Self {
        self.progress = Some(Arc::new(on_progress));
        self
    }

    #[must_use]
    pub fn client(&self) -> &ConditionalClient {
        &self.client
    }

    #[must_use]
    pub fn governor(&self) -> &RateGovernor {
        &self.governor
    }

    #[must_use]
    pub fn options(&self) -> &HarvestOptions {
        &self.options
    }

    fn emit(&self, event: HarvestProgress) {
        emit(self.progress.as_deref(), event);
    }

    fn pages<'a>(
        &'a self,
        store: Option<&'a SnapshotStore>,
        base: Locator,
        fetch: FetchOptions,
    ) -> PageIterator<'a> {
        let options = PageOptions::default()
            .with_limits(self.options.per_page, self.options.max_pages)
            .with_fetch(fetch);
        PageIterator::new(&self.client, store, base, options)
    }

    /// Login of the identity the token belongs to.
    pub async fn whoami(&self) -> Result<String> {
        let locator = self.client.locator("/user")?;
        let fetched = self
            .client
            .fetch(
                None,
                &locator,
                &FetchOptions::default().bypass().require_existence(),
            )
            .await?;
        fetched
            .body
            .get("login")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| HarvestError::decode(locator.as_str(), "response has no login"))
    }

    /// Harvest several organizations into `store_dir`, one store each.
    ///
    /// Organizations run one after another unless `concurrent` is set.
    /// Non-fatal errors are logged and the remaining organizations still
    /// run; a fatal error stops the run once in-flight organizations finish.
    pub async fn run(
        &self,
        store_dir: &Path,
        orgs: &[String],
        only_repo: Option<&str>,
        collected_as: &str,
        concurrent: bool,
    ) -> Result<Vec<OrgSummary>> {
        let mut summaries = Vec::new();

        if !concurrent {
            for org in orgs {
                match self.run_org(store_dir, org, only_repo, collected_as).await {
                    Ok(summary) => summaries.push(summary),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => tracing::error!(org = %org, "Harvest failed: {e}"),
                }
            }
            return Ok(summaries);
        }

        let mut tasks = JoinSet::new();
        for (index, org) in orgs.iter().enumerate() {
            let harvester = self.clone();
            let dir = PathBuf::from(store_dir);
            let org = org.clone();
            let only_repo = only_repo.map(str::to_string);
            let collected_as = collected_as.to_string();
            tasks.spawn(async move {
                let result = harvester
                    .run_org(&dir, &org, only_repo.as_deref(), &collected_as)
                    .await;
                (index, org, result)
            });
        }

        let mut indexed = Vec::new();
        let mut fatal = None;
        while let Some(joined) = tasks.join_next().await {
            let (index, org, result) = match joined {
                Ok(done) => done,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => {
                    tracing::error!("Harvest task cancelled: {e}");
                    continue;
                }
            };
            match result {
                Ok(summary) => indexed.push((index, summary)),
                Err(e) if e.is_fatal() => {
                    tracing::error!(org = %org, "Harvest stopped: {e}");
                    fatal.get_or_insert(e);
                }
                Err(e) => tracing::error!(org = %org, "Harvest failed: {e}"),
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }
        indexed.sort_by_key(|(index, _)| *index);
        summaries.extend(indexed.into_iter().map(|(_, summary)| summary));
        Ok(summaries)
    }

    /// Open the organization's store under `store_dir` and harvest into it.
    pub async fn run_org(
        &self,
        store_dir: &Path,
        org: &str,
        only_repo: Option<&str>,
        collected_as: &str,
    ) -> Result<OrgSummary> {
        let store = SnapshotStore::open_for_org(store_dir, org).await?;
        self.harvest_into(&store, org, only_repo, collected_as).await
    }

    /// Harvest one organization (or one of its repositories) into `store`,
    /// then record the run.
    ///
    /// The run is recorded even when the harvest was skipped or interrupted;
    /// only a store failure prevents it.
    pub async fn harvest_into(
        &self,
        store: &SnapshotStore,
        org: &str,
        only_repo: Option<&str>,
        collected_as: &str,
    ) -> Result<OrgSummary> {
        let result = match only_repo {
            Some(repo) => self.harvest_repo_by_name(store, org, repo).await,
            None => self.harvest_org(store, org).await,
        };
        if matches!(result, Err(HarvestError::Store(_))) {
            return result;
        }
        store.record_run(collected_as).await?;
        result
    }

    /// Harvest every repository of one organization into `store`.
    pub async fn harvest_org(&self, store: &SnapshotStore, org: &str) -> Result<OrgSummary> {
        let mut summary = OrgSummary::new(org);
        let mut queue = self.open_queue(store, org).await?;
        tracing::info!(org, "Harvesting organization");

        let walked = self.walk_org(store, org, &mut queue, &mut summary).await;
        self.finish(store, &mut queue, summary, walked).await
    }

    /// Harvest a single repository of one organization into `store`.
    pub async fn harvest_repo_by_name(
        &self,
        store: &SnapshotStore,
        org: &str,
        repo: &str,
    ) -> Result<OrgSummary> {
        let mut summary = OrgSummary::new(org);
        let mut queue = self.open_queue(store, org).await?;
        tracing::info!(org, repo, "Harvesting single repository");

        let walked = self
            .walk_single(store, org, repo, &mut queue, &mut summary)
            .await;
        self.finish(store, &mut queue, summary, walked).await
    }

    async fn open_queue(&self, store: &SnapshotStore, org: &str) -> Result<DeferredQueue> {
        let mut queue = DeferredQueue::new(
            self.client.clone(),
            self.options.retry.clone(),
            self.shutdown.clone(),
        );
        let carried = store.load_deferred().await?;
        let carried_forward = carried.len();
        for call in carried {
            queue.enqueue(call);
        }
        if carried_forward > 0 {
            tracing::info!(org, carried_forward, "Reloaded deferred calls");
        }
        self.emit(HarvestProgress::OrgStarted {
            org: org.to_string(),
            carried_forward,
        });
        Ok(queue)
    }

    async fn walk_org(
        &self,
        store: &SnapshotStore,
        org: &str,
        queue: &mut DeferredQueue,
        summary: &mut OrgSummary,
    ) -> Result<()> {
        let org_locator = self.client.locator(&format!("/orgs/{org}"))?;
        let exists = self
            .client
            .fetch(
                Some(store),
                &org_locator,
                &FetchOptions::default().require_existence(),
            )
            .await;
        match exists {
            Err(e) => return self.skip_org(summary, e),
            Ok(fetched) if fetched.outcome == FetchOutcome::Moved => {
                self.skip_moved(summary, &org_locator);
                return Ok(());
            }
            Ok(_) => {}
        }

        let listing = self.client.locator(&format!("/orgs/{org}/repos"))?;
        let mut repos = self.pages(Some(store), listing, FetchOptions::default());
        loop {
            let repo = match repos.try_next().await {
                Ok(Some(repo)) => repo,
                Ok(None) => break,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    let error = short_error_message(&e);
                    tracing::error!(org, "Repository listing stopped: {error}");
                    self.emit(HarvestProgress::ListingFailed {
                        org: org.to_string(),
                        error: error.clone(),
                    });
                    summary.listing_error = Some(error);
                    break;
                }
            };

            self.governor
                .await_quota(&[QuotaDemand::core(self.options.min_core_quota)])
                .await?;
            self.harvest_listed(store, queue, &repo, summary).await?;
        }

        Ok(())
    }

    async fn walk_single(
        &self,
        store: &SnapshotStore,
        org: &str,
        repo: &str,
        queue: &mut DeferredQueue,
        summary: &mut OrgSummary,
    ) -> Result<()> {
        let locator = self.client.locator(&format!("/repos/{org}/{repo}"))?;
        let fetched = self
            .client
            .fetch(Some(store), &locator, &FetchOptions::default().require_existence())
            .await;
        match fetched {
            Ok(fetched) if fetched.outcome == FetchOutcome::Moved => {
                self.skip_moved(summary, &locator);
                Ok(())
            }
            Ok(fetched) => {
                self.governor
                    .await_quota(&[QuotaDemand::core(self.options.min_core_quota)])
                    .await?;
                self.harvest_listed(store, queue, &fetched.body, summary).await
            }
            Err(e) => self.skip_org(summary, e),
        }
    }

    fn skip_org(&self, summary: &mut OrgSummary, error: HarvestError) -> Result<()> {
        if error.is_fatal() {
            return Err(error);
        }
        let reason = short_error_message(&error);
        if error.is_not_found() {
            tracing::error!(org = %summary.org, "No such organization or repository");
        } else {
            tracing::error!(org = %summary.org, "Skipping: {reason}");
        }
        self.emit(HarvestProgress::OrgSkipped {
            org: summary.org.clone(),
            reason,
        });
        summary.skipped = true;
        Ok(())
    }

    /// A 301 means the name now belongs to something else; harvesting it
    /// under the old name would file records in the wrong store.
    fn skip_moved(&self, summary: &mut OrgSummary, locator: &Locator) {
        tracing::warn!(
            org = %summary.org,
            locator = %locator,
            "Organization or repository was moved or renamed; skipping"
        );
        self.emit(HarvestProgress::OrgSkipped {
            org: summary.org.clone(),
            reason: "moved or renamed".to_string(),
        });
        summary.skipped = true;
    }

    /// Harvest one repository, recording a non-fatal failure in `summary`.
    async fn harvest_listed(
        &self,
        store: &SnapshotStore,
        queue: &mut DeferredQueue,
        repo: &Value,
        summary: &mut OrgSummary,
    ) -> Result<()> {
        let full_name = repo
            .get("full_name")
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>")
            .to_string();

        match self.harvest_repo(store, queue, repo).await {
            Ok(()) => {
                summary.harvested += 1;
                self.emit(HarvestProgress::RepoHarvested { full_name });
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                let error = short_error_message(&e);
                tracing::warn!(repo = %full_name, "Repository skipped: {error}");
                self.emit(HarvestProgress::RepoFailed {
                    full_name: full_name.clone(),
                    error: error.clone(),
                });
                summary.failed.push(RepoFailure { full_name, error });
                Ok(())
            }
        }
    }

    async fn harvest_repo(
        &self,
        store: &SnapshotStore,
        queue: &mut DeferredQueue,
        repo: &Value,
    ) -> Result<()> {
        let mut fields = RepoFields::from_listing(repo);
        let Some(full_name) = fields.full_name.clone() else {
            return Err(HarvestError::decode(
                self.client.base_url(),
                "repository entry has no full_name",
            ));
        };
        let repo_path = format!("/repos/{full_name}");
        tracing::debug!(repo = %full_name, "Harvesting repository");

        // The detail body is a superset of the listing entry and carries its
        // own validator.
        let detail = self
            .client
            .fetch(
                Some(store),
                &self.client.locator(&repo_path)?,
                &FetchOptions::default(),
            )
            .await?;
        if detail.has_data() {
            fields.apply_listing(&detail.body);
        }

        let protected = self
            .client
            .locator(&format!("{repo_path}/branches?protected=true"))?;
        fields.protected_branch_count = Some(
            self.pages(Some(store), protected, FetchOptions::default().bypass())
                .count()
                .await?,
        );

        if let Some(branch) = fields.default_branch.clone() {
            self.harvest_default_branch(store, &repo_path, &branch, &mut fields)
                .await?;
        }

        let hooks_locator = self.client.locator(&format!("{repo_path}/hooks"))?;
        let mut hooks = self.pages(Some(store), hooks_locator, FetchOptions::default());
        let hook_count = hooks.count().await?;
        if matches!(
            hooks.first_outcome(),
            Some(FetchOutcome::Fresh | FetchOutcome::NotModified)
        ) {
            fields.hook_count = Some(hook_count);
        }

        let stats = DeferredCall {
            locator: self
                .client
                .locator(&format!("{repo_path}/stats/commit_activity"))?,
            entity_key: full_name.clone(),
            field: COMMIT_ACTIVITY.to_string(),
        };
        match queue.submit(Some(store), stats).await? {
            Submission::Ready(fetched) => {
                fields.apply_commit_activity(&fetched.body);
            }
            Submission::Deferred => self.emit(HarvestProgress::StatsDeferred {
                full_name: full_name.clone(),
            }),
        }

        fields.harvested_at = Some(Utc::now());
        store.merge_entity(&full_name, &fields.to_partial()).await?;
        Ok(())
    }

    async fn harvest_default_branch(
        &self,
        store: &SnapshotStore,
        repo_path: &str,
        branch: &str,
        fields: &mut RepoFields,
    ) -> Result<()> {
        let branch_path = format!("{repo_path}/branches/{branch}");
        let fetched = self
            .client
            .fetch(
                Some(store),
                &self.client.locator(&branch_path)?,
                &FetchOptions::default(),
            )
            .await?;
        if !fetched.has_data() {
            // An empty repository has no branches at all.
            tracing::debug!(branch = %branch_path, "Default branch not found");
            return Ok(());
        }
        fields.apply_branch(&fetched.body);

        let protection = self
            .client
            .fetch(
                Some(store),
                &self.client.locator(&format!("{branch_path}/protection"))?,
                &FetchOptions::default().accepting(&[200, 304, 404]),
            )
            .await?;
        // 404: the branch is not protected, so earlier restrictions are stale.
        // A 403 only means we cannot see them.
        match protection.outcome {
            FetchOutcome::Absent if protection.status == 404 => fields.clear_protection(),
            _ if protection.has_data() => fields.apply_protection(&protection.body),
            _ => {}
        }

        let signatures = self
            .client
            .fetch(
                Some(store),
                &self
                    .client
                    .locator(&format!("{branch_path}/protection/required_signatures"))?,
                &FetchOptions::default()
                    .accepting(&[200, 304, 404])
                    .with_media_type(SIGNATURES_MEDIA_TYPE),
            )
            .await?;
        match signatures.outcome {
            FetchOutcome::Absent if signatures.status == 404 => fields.clear_signatures(),
            _ if signatures.has_data() => fields.apply_signatures(&signatures.body),
            _ => {}
        }

        Ok(())
    }

    /// Drain deferred calls (unless the org was skipped), persist what is
    /// still pending, and close out the summary.
    async fn finish(
        &self,
        store: &SnapshotStore,
        queue: &mut DeferredQueue,
        mut summary: OrgSummary,
        walked: Result<()>,
    ) -> Result<OrgSummary> {
        let drained = match walked {
            Ok(()) if !summary.skipped => self.drain(store, queue, &mut summary).await,
            other => other,
        };

        let saved = store.save_deferred(&queue.pending()).await;
        summary.deferred_pending = queue.len();
        drained?;
        saved?;

        tracing::info!(
            org = %summary.org,
            harvested = summary.harvested,
            failed = summary.failed.len(),
            deferred_pending = summary.deferred_pending,
            "Organization complete"
        );
        self.emit(HarvestProgress::OrgComplete {
            org: summary.org.clone(),
            harvested: summary.harvested,
            failed: summary.failed.len(),
        });
        Ok(summary)
    }

    async fn drain(
        &self,
        store: &SnapshotStore,
        queue: &mut DeferredQueue,
        summary: &mut OrgSummary,
    ) -> Result<()> {
        if queue.is_empty() {
            return Ok(());
        }

        tracing::info!(org = %summary.org, pending = queue.len(), "Retrying deferred calls");
        for resolved in queue.drain(Some(store)).await? {
            let mut fields = RepoFields::default();
            let applied = match resolved.call.field.as_str() {
                COMMIT_ACTIVITY => fields.apply_commit_activity(&resolved.fetched.body),
                other => {
                    tracing::warn!(field = other, "Unknown deferred field; ignoring");
                    false
                }
            };
            if applied {
                store
                    .merge_entity(&resolved.call.entity_key, &fields.to_partial())
                    .await?;
                summary.deferred_resolved += 1;
            }
        }

        self.emit(HarvestProgress::DrainComplete {
            org: summary.org.clone(),
            resolved: summary.deferred_resolved,
            pending: queue.len(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn org_from_arg_strips_store_suffix() {
        assert_eq!(org_from_arg("acme"), Some("acme"));
        assert_eq!(org_from_arg("acme.db"), Some("acme"));
        assert_eq!(org_from_arg("acme.db.db"), None);
    }

    #[test]
    fn default_options() {
        let options = HarvestOptions::default();
        assert_eq!(options.min_core_quota, 25);
        assert_eq!(options.min_search_quota, 5);
        assert_eq!(options.retry.max_attempts, 5);
        assert_eq!(options.per_page, DEFAULT_PER_PAGE);
    }
}
