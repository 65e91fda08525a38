use std::path::PathBuf;
use std::sync::Arc;

use console::style;
use warden::{OrgSummary, Shutdown, org_from_arg};

use crate::commands::shared::{build_harvester, resolve_store_dir};
use crate::config::Config;
use crate::progress::ProgressReporter;

/// Identity recorded for runs made without a token.
const ANONYMOUS: &str = "anonymous";

/// Organization names from command-line arguments, dropping doubled store
/// suffixes with a warning.
fn orgs_from_args(args: &[String]) -> Vec<String> {
    args.iter()
        .filter_map(|arg| match org_from_arg(arg) {
            Some(org) => Some(org.to_string()),
            None => {
                tracing::warn!(arg = %arg, "Ignoring argument with a doubled store suffix");
                None
            }
        })
        .collect()
}

pub(crate) struct HarvestArgs {
    pub orgs: Vec<String>,
    pub repo: Option<String>,
    pub store_dir: Option<PathBuf>,
    pub concurrent: bool,
}

pub(crate) async fn handle_harvest(
    args: HarvestArgs,
    config: &Config,
    shutdown: Shutdown,
) -> Result<(), Box<dyn std::error::Error>> {
    let orgs = orgs_from_args(&args.orgs);
    if orgs.is_empty() {
        return Err("No organizations to harvest".into());
    }
    let store_dir = resolve_store_dir(args.store_dir, config)?;

    let reporter = Arc::new(ProgressReporter::new());
    let harvester = build_harvester(config, shutdown)?.with_progress(reporter.as_callback());

    let collected_as = if config.github_token().is_some() {
        harvester.whoami().await?
    } else {
        ANONYMOUS.to_string()
    };
    tracing::info!(
        collected_as = %collected_as,
        orgs = orgs.len(),
        store_dir = %store_dir.display(),
        "Starting harvest"
    );

    let concurrent = args.concurrent || config.harvest.concurrent_orgs;
    let result = harvester
        .run(
            &store_dir,
            &orgs,
            args.repo.as_deref(),
            &collected_as,
            concurrent,
        )
        .await;
    reporter.finish();
    let summaries = result?;

    let stats = harvester.client().stats();
    tracing::info!(
        cache_hits = stats.cache_hits,
        fresh_fetches = stats.fresh_fetches,
        hit_ratio = %format!("{:.0}%", stats.hit_ratio() * 100.0),
        "Conditional cache"
    );

    print_summaries(&summaries);
    Ok(())
}

fn summary_line(summary: &OrgSummary) -> String {
    if summary.skipped {
        return format!("{}: skipped", summary.org);
    }
    let mut line = format!(
        "{}: {} harvested, {} failed",
        summary.org,
        summary.harvested,
        summary.failed.len()
    );
    if summary.deferred_resolved > 0 {
        line.push_str(&format!(", {} deferred resolved", summary.deferred_resolved));
    }
    if summary.deferred_pending > 0 {
        line.push_str(&format!(
            ", {} deferred carried forward",
            summary.deferred_pending
        ));
    }
    if summary.listing_error.is_some() {
        line.push_str(", listing incomplete");
    }
    line
}

fn print_summaries(summaries: &[OrgSummary]) {
    for summary in summaries {
        let marker = if summary.skipped || summary.listing_error.is_some() {
            style("!").yellow().bold()
        } else if summary.failed.is_empty() {
            style("✓").green().bold()
        } else {
            style("✗").red().bold()
        };
        println!("{marker} {}", summary_line(summary));
        for failure in &summary.failed {
            println!("    {}: {}", failure.full_name, failure.error);
        }
    }
}
