use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use warden::HarvestProgress;

/// Running counts for one organization's spinner.
#[derive(Default)]
struct OrgState {
    harvested: usize,
    failed: usize,
    deferred: usize,
}

struct OrgBar {
    bar: ProgressBar,
    counts: OrgState,
}

impl OrgBar {
    fn refresh(&self) {
        let mut message = format!("{} harvested", self.counts.harvested);
        if self.counts.failed > 0 {
            message.push_str(&format!(", {} failed", self.counts.failed));
        }
        if self.counts.deferred > 0 {
            message.push_str(&format!(", {} stats pending", self.counts.deferred));
        }
        self.bar.set_message(message);
    }
}

/// Interactive progress reporter using indicatif: one spinner per
/// organization, with failures printed above the bars.
pub struct InteractiveReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, OrgBar>>,
}

impl InteractiveReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    pub fn handle(&self, event: HarvestProgress) {
        let mut bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);

        match event {
            HarvestProgress::OrgStarted {
                org,
                carried_forward,
            } => {
                let bar = self.multi.add(ProgressBar::new_spinner());
                bar.set_style(Self::spinner_style());
                bar.enable_steady_tick(Duration::from_millis(100));
                bar.set_prefix(format!("{org:16}"));
                let org_bar = OrgBar {
                    bar,
                    counts: OrgState {
                        deferred: carried_forward,
                        ..OrgState::default()
                    },
                };
                org_bar.refresh();
                bars.insert(org, org_bar);
            }

            HarvestProgress::OrgSkipped { org, reason } => {
                if let Some(org_bar) = bars.get(&org) {
                    org_bar
                        .bar
                        .finish_with_message(format!("{} {reason}", style("skipped:").yellow()));
                }
            }

            HarvestProgress::RepoHarvested { full_name } => {
                if let Some(org_bar) = bars.get_mut(owner_of(&full_name)) {
                    org_bar.counts.harvested += 1;
                    org_bar.refresh();
                }
            }

            HarvestProgress::RepoFailed { full_name, error } => {
                let _ = self.multi.println(format!(
                    "{} {full_name}: {error}",
                    style("✗").red().bold()
                ));
                if let Some(org_bar) = bars.get_mut(owner_of(&full_name)) {
                    org_bar.counts.failed += 1;
                    org_bar.refresh();
                }
            }

            HarvestProgress::StatsDeferred { full_name } => {
                if let Some(org_bar) = bars.get_mut(owner_of(&full_name)) {
                    org_bar.counts.deferred += 1;
                    org_bar.refresh();
                }
            }

            HarvestProgress::ListingFailed { org, error } => {
                let _ = self.multi.println(format!(
                    "{} {org}: repository listing stopped: {error}",
                    style("✗").red().bold()
                ));
            }

            HarvestProgress::DrainComplete { org, pending, .. } => {
                if let Some(org_bar) = bars.get_mut(&org) {
                    org_bar.counts.deferred = pending;
                    org_bar.refresh();
                }
            }

            HarvestProgress::OrgComplete { org, .. } => {
                if let Some(org_bar) = bars.get(&org) {
                    org_bar.refresh();
                    org_bar.bar.finish();
                }
            }

            _ => {}
        }
    }

    /// Stop any spinner still running (e.g. after an interrupt).
    pub fn finish(&self) {
        let bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);
        for org_bar in bars.values() {
            if !org_bar.bar.is_finished() {
                org_bar.bar.abandon();
            }
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {prefix:.bold} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }
}

impl Default for InteractiveReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Organization part of an `owner/name` full name.
fn owner_of(full_name: &str) -> &str {
    full_name
        .split_once('/')
        .map_or(full_name, |(owner, _)| owner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_of_full_name() {
        assert_eq!(owner_of("acme/a"), "acme");
        assert_eq!(owner_of("acme"), "acme");
    }

    #[test]
    fn counts_events_per_org() {
        let reporter = InteractiveReporter::new();
        reporter.handle(HarvestProgress::OrgStarted {
            org: "acme".to_string(),
            carried_forward: 1,
        });
        reporter.handle(HarvestProgress::RepoHarvested {
            full_name: "acme/a".to_string(),
        });
        reporter.handle(HarvestProgress::RepoFailed {
            full_name: "acme/b".to_string(),
            error: "boom".to_string(),
        });
        reporter.handle(HarvestProgress::DrainComplete {
            org: "acme".to_string(),
            resolved: 1,
            pending: 0,
        });

        let bars = reporter.bars.lock().unwrap();
        let acme = bars.get("acme").expect("acme bar");
        assert_eq!(acme.counts.harvested, 1);
        assert_eq!(acme.counts.failed, 1);
        assert_eq!(acme.counts.deferred, 0);
        assert!(acme.bar.message().contains("1 failed"));
        drop(bars);

        reporter.finish();
    }
}
