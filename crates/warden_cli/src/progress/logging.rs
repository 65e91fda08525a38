use warden::HarvestProgress;

/// Logging reporter using tracing for structured output.
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, event: HarvestProgress) {
        match event {
            HarvestProgress::OrgStarted {
                org,
                carried_forward,
            } => {
                tracing::info!(org = %org, carried_forward, "Harvest started");
            }

            HarvestProgress::OrgSkipped { org, reason } => {
                tracing::warn!(org = %org, reason = %reason, "Organization skipped");
            }

            HarvestProgress::RepoHarvested { full_name } => {
                tracing::debug!(repo = %full_name, "Harvested");
            }

            HarvestProgress::RepoFailed { full_name, error } => {
                tracing::warn!(repo = %full_name, error = %error, "Failed to harvest");
            }

            HarvestProgress::StatsDeferred { full_name } => {
                tracing::debug!(repo = %full_name, "Statistics not ready, deferred");
            }

            HarvestProgress::ListingFailed { org, error } => {
                tracing::error!(org = %org, error = %error, "Repository listing failed");
            }

            HarvestProgress::DrainComplete {
                org,
                resolved,
                pending,
            } => {
                if pending > 0 {
                    tracing::warn!(org = %org, resolved, pending, "Deferred calls carried forward");
                } else {
                    tracing::info!(org = %org, resolved, "Deferred calls resolved");
                }
            }

            HarvestProgress::OrgComplete {
                org,
                harvested,
                failed,
            } => {
                tracing::info!(org = %org, harvested, failed, "Harvest complete");
            }

            _ => {}
        }
    }
}

impl Default for LoggingReporter {
    fn default() -> Self {
        Self::new()
    }
}
