use std::path::PathBuf;
use std::sync::Arc;

use warden::http::DEFAULT_TIMEOUT;
use warden::http::reqwest_transport::ReqwestTransport;
use warden::{ApiRateLimiter, ConditionalClient, Harvester, Shutdown};

use crate::config::Config;

/// Build an API client from configuration: reqwest transport, bearer token
/// (if any) and the requests-per-second pacer.
pub(crate) fn build_client(config: &Config) -> Result<ConditionalClient, Box<dyn std::error::Error>> {
    let transport = ReqwestTransport::with_timeout(DEFAULT_TIMEOUT)?;
    let mut client = ConditionalClient::new(Arc::new(transport), &config.github.api_url)?
        .with_pacer(ApiRateLimiter::new(config.harvest.requests_per_second));

    match config.github_token() {
        Some(token) => client = client.with_token(token),
        None => tracing::warn!(
            "No GitHub token configured; unauthenticated quota is 60 requests per hour. \
             Set WARDEN_GITHUB__TOKEN or GITHUB_TOKEN."
        ),
    }
    Ok(client)
}

pub(crate) fn build_harvester(
    config: &Config,
    shutdown: Shutdown,
) -> Result<Harvester, Box<dyn std::error::Error>> {
    let client = build_client(config)?;
    Ok(Harvester::new(client, config.harvest.options(), shutdown)?)
}

/// The store directory from the command line, else from configuration.
pub(crate) fn resolve_store_dir(
    flag: Option<PathBuf>,
    config: &Config,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let dir = flag
        .or_else(|| config.store_dir())
        .ok_or("Could not determine a store directory; pass --store-dir or set store.dir")?;

    if dir.is_relative() {
        tracing::warn!(
            "Store directory '{}' is relative - behavior depends on current directory. \
             Consider using an absolute path.",
            dir.display()
        );
    }
    Ok(dir)
}
