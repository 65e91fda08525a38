//! Progress reporting types for harvest runs.
//!
//! The library never prints; it emits [`HarvestProgress`] events to an
//! optional callback and leaves rendering to the caller.

/// Progress events emitted during a harvest.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum HarvestProgress {
    /// Starting an organization.
    OrgStarted {
        org: String,
        /// Deferred calls carried forward from the previous run.
        carried_forward: usize,
    },

    /// The organization could not be harvested at all.
    OrgSkipped { org: String, reason: String },

    /// All fields of one repository were merged into the store.
    RepoHarvested { full_name: String },

    /// One repository was abandoned; the run continues.
    RepoFailed { full_name: String, error: String },

    /// A statistic was not ready and has been queued for retry.
    StatsDeferred { full_name: String },

    /// Listing the organization's repositories failed part-way.
    ListingFailed { org: String, error: String },

    /// Deferred retries for the organization have finished.
    DrainComplete {
        org: String,
        resolved: usize,
        /// Calls carried forward to the next run.
        pending: usize,
    },

    /// The organization is done.
    OrgComplete {
        org: String,
        harvested: usize,
        failed: usize,
    },
}

/// Callback for progress updates during a harvest.
pub type ProgressCallback = Box<dyn Fn(HarvestProgress) + Send + Sync>;

/// Emit a progress event if a callback is provided.
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: HarvestProgress) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_with_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let callback: ProgressCallback = Box::new(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        emit(
            Some(&callback),
            HarvestProgress::RepoHarvested {
                full_name: "acme/a".to_string(),
            },
        );
        emit(
            Some(&callback),
            HarvestProgress::OrgComplete {
                org: "acme".to_string(),
                harvested: 1,
                failed: 0,
            },
        );

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn emit_without_callback() {
        emit(
            None,
            HarvestProgress::OrgSkipped {
                org: "nope".to_string(),
                reason: "Not found".to_string(),
            },
        );
    }
}
