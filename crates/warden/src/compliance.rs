//! Read-side classification of harvested repositories.
//!
//! Reporters never touch the API; they classify what the store already
//! holds. A repository's default branch is compliant when it is protected,
//! push-restricted, enforced for admins, and requires signed commits.

use serde::Serialize;

use crate::store::{EntityRecord, Result, SnapshotStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchCompliance {
    /// Repository full name, lowercased.
    pub name: String,
    pub protected: bool,
    /// Pushes are limited to named users or teams.
    pub restricted: bool,
    /// Protection also applies to administrators.
    pub enforcement: bool,
    pub signed: bool,
    /// Restrictions name teams only, no individual users.
    pub team_used: bool,
}

impl BranchCompliance {
    #[must_use]
    pub fn from_record(record: &EntityRecord) -> Self {
        let users = record.get_u64("restricted_user_count").unwrap_or(0);
        let teams = record.get_u64("restricted_team_count").unwrap_or(0);
        Self {
            name: record.key.to_lowercase(),
            protected: record.get_bool("default_protected").unwrap_or(false),
            restricted: users + teams > 0,
            enforcement: record.get_bool("enforce_admins").unwrap_or(false),
            signed: record.get_bool("signed_commits_required").unwrap_or(false),
            team_used: teams > 0 && users == 0,
        }
    }

    #[must_use]
    pub fn is_compliant(&self) -> bool {
        self.protected && self.restricted && self.enforcement && self.signed
    }
}

/// Classify every stored repository, or only those named in `only`
/// (compared case-insensitively).
pub async fn classify_store(store: &SnapshotStore, only: &[String]) -> Result<Vec<BranchCompliance>> {
    let wanted: Vec<String> = only.iter().map(|name| name.to_lowercase()).collect();
    Ok(store
        .entities()
        .await?
        .iter()
        .map(BranchCompliance::from_record)
        .filter(|row| wanted.is_empty() || wanted.contains(&row.name))
        .collect())
}
