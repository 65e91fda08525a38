//! Code search: which repositories mention a term.
//!
//! Search draws on two quota buckets at once (every page costs a search
//! call and the surrounding traffic costs core calls), so each page is gated
//! on both.

use std::collections::HashSet;

use serde_json::Value;

use crate::conditional::FetchOptions;
use crate::error::Result;
use crate::harvest::Harvester;
use crate::pagination::{PageIterator, PageOptions};
use crate::rate_limit::QuotaDemand;

/// Build the search query for `term` within `scope`.
///
/// A scope containing `/` names one repository; anything else is a user or
/// organization.
#[must_use]
pub fn search_query(scope: &str, term: &str) -> String {
    let qualifier = if scope.contains('/') { "repo" } else { "user" };
    format!("{term} in:file {qualifier}:{scope}")
}

/// Repositories in `scope` with at least one file matching `term`, each
/// listed once, in the order the search first reports them.
pub async fn matching_repos(harvester: &Harvester, scope: &str, term: &str) -> Result<Vec<String>> {
    let client = harvester.client();
    let options = harvester.options();
    let locator = client
        .locator("/search/code")?
        .with_query("q", &search_query(scope, term));

    let page_options = PageOptions::default()
        .with_limits(options.per_page, options.max_pages)
        .with_items_key("items")
        // 422 means the scope does not exist; its body has no items.
        .with_fetch(FetchOptions::default().bypass().accepting(&[200, 422]));

    let mut hits = PageIterator::new(client, None, locator, page_options).gated(
        harvester.governor(),
        vec![
            QuotaDemand::core(options.min_core_quota),
            QuotaDemand::search(options.min_search_quota),
        ],
    );

    let mut seen = HashSet::new();
    let mut repos = Vec::new();
    while let Some(hit) = hits.try_next().await? {
        let Some(repo) = hit
            .pointer("/repository/full_name")
            .and_then(Value::as_str)
        else {
            continue;
        };
        if seen.insert(repo.to_string()) {
            repos.push(repo.to_string());
        } else {
            tracing::debug!(repo, "Another hit");
        }
    }

    tracing::info!(scope, term, matches = repos.len(), "Search complete");
    Ok(repos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::conditional::ConditionalClient;
    use crate::harvest::HarvestOptions;
    use crate::http::{HttpResponse, MockTransport};
    use crate::pagination::DEFAULT_PER_PAGE;
    use crate::shutdown::Shutdown;

    #[test]
    fn query_for_user_scope() {
        assert_eq!(search_query("acme", "password"), "password in:file user:acme");
    }

    #[test]
    fn query_for_repo_scope() {
        assert_eq!(
            search_query("acme/a", "password"),
            "password in:file repo:acme/a"
        );
    }

    #[tokio::test]
    async fn dedupes_repositories_across_pages() {
        let transport = MockTransport::new();
        let client = ConditionalClient::new(Arc::new(transport.clone()), "https://api.github.com")
            .expect("client");
        let harvester =
            Harvester::new(client.clone(), HarvestOptions::default(), Shutdown::new()).expect("harvester");

        let reset = chrono::Utc::now().timestamp() + 60;
        transport.set_sticky(
            client.locator("/rate_limit").expect("locator").as_str(),
            HttpResponse::json(
                200,
                &json!({"resources": {
                    "core": {"limit": 5000, "used": 0, "remaining": 5000, "reset": reset},
                    "search": {"limit": 30, "used": 0, "remaining": 30, "reset": reset}
                }}),
            ),
        );

        let base = client
            .locator("/search/code")
            .expect("locator")
            .with_query("q", &search_query("acme", "token"));
        let page = |n| base.with_page(n, DEFAULT_PER_PAGE).to_string();
        transport.push_response(
            page(1),
            HttpResponse::json(
                200,
                &json!({"total_count": 3, "items": [
                    {"path": "a.py", "repository": {"full_name": "acme/a"}},
                    {"path": "b.py", "repository": {"full_name": "acme/a"}}
                ]}),
            ),
        );
        transport.push_response(
            page(2),
            HttpResponse::json(
                200,
                &json!({"total_count": 3, "items": [
                    {"path": "c.py", "repository": {"full_name": "acme/c"}}
                ]}),
            ),
        );
        transport.push_response(
            page(3),
            HttpResponse::json(200, &json!({"total_count": 3, "items": []})),
        );

        let repos = matching_repos(&harvester, "acme", "token")
            .await
            .expect("search");
        assert_eq!(repos, vec!["acme/a".to_string(), "acme/c".to_string()]);

        let probes = transport.requests_to(client.locator("/rate_limit").expect("locator").as_str());
        assert_eq!(probes.len(), 3);
    }
}
