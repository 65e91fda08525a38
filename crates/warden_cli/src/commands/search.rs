use warden::Shutdown;
use warden::search::matching_repos;

use crate::commands::shared::build_harvester;
use crate::config::Config;

/// Print every repository in each scope with a file mentioning `term`.
pub(crate) async fn handle_search(
    term: &str,
    scopes: &[String],
    config: &Config,
    shutdown: Shutdown,
) -> Result<(), Box<dyn std::error::Error>> {
    let harvester = build_harvester(config, shutdown)?;

    for scope in scopes {
        let repos = matching_repos(&harvester, scope, term).await?;
        if repos.is_empty() {
            tracing::info!(scope = %scope, term, "No matches");
        }
        for repo in repos {
            println!("{repo}");
        }
    }
    Ok(())
}
