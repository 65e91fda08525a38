//! Repository fields extracted from API responses.
//!
//! Every field is optional: a [`RepoFields`] value is a partial update, and
//! only the fields that are set end up in the merge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Deferred-call field name for weekly commit activity.
pub const COMMIT_ACTIVITY: &str = "commit_activity";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub protected_branch_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_protected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enforce_admins: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restricted_users: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restricted_teams: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restricted_user_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restricted_team_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_commits_required: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_weeks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commits_last_year: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub harvested_at: Option<DateTime<Utc>>,
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Collect `key` from every object in `items` (logins, team slugs).
fn names(items: Option<&Value>, key: &str) -> Vec<String> {
    items
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|item| item.get(key).and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl RepoFields {
    /// Fields available from a repository listing or detail body.
    #[must_use]
    pub fn from_listing(repo: &Value) -> Self {
        let mut fields = Self::default();
        fields.apply_listing(repo);
        fields
    }

    /// Overwrite listing fields with those present in `repo`.
    pub fn apply_listing(&mut self, repo: &Value) {
        if let Some(full_name) = str_field(repo, "full_name") {
            self.full_name = Some(full_name);
        }
        if let Some(name) = str_field(repo, "name") {
            self.name = Some(name);
        }
        if let Some(owner) = repo.get("owner").and_then(|o| str_field(o, "login")) {
            self.owner = Some(owner);
        }
        if let Some(branch) = str_field(repo, "default_branch") {
            self.default_branch = Some(branch);
        }
        if let Some(archived) = repo.get("archived").and_then(Value::as_bool) {
            self.archived = Some(archived);
        }
        if let Some(visibility) = str_field(repo, "visibility") {
            self.visibility = Some(visibility);
        }
    }

    /// Record whether the default branch is protected.
    pub fn apply_branch(&mut self, branch: &Value) {
        self.default_protected = Some(
            branch
                .get("protected")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        );
    }

    /// Extract admin enforcement and push restrictions from a protection body.
    pub fn apply_protection(&mut self, protection: &Value) {
        self.enforce_admins = Some(
            protection
                .pointer("/enforce_admins/enabled")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        );

        let restrictions = protection.get("restrictions");
        let users = names(restrictions.and_then(|r| r.get("users")), "login");
        let teams = names(restrictions.and_then(|r| r.get("teams")), "slug");
        self.restricted_user_count = Some(users.len());
        self.restricted_team_count = Some(teams.len());
        self.restricted_users = Some(users);
        self.restricted_teams = Some(teams);
    }

    /// Record whether signed commits are required.
    /// Record a branch that has no protection at all: nothing restricted,
    /// nothing enforced.
    pub fn clear_protection(&mut self) {
        self.enforce_admins = Some(false);
        self.restricted_user_count = Some(0);
        self.restricted_team_count = Some(0);
        self.restricted_users = Some(Vec::new());
        self.restricted_teams = Some(Vec::new());
    }

    pub fn clear_signatures(&mut self) {
        self.signed_commits_required = Some(false);
    }

    pub fn apply_signatures(&mut self, signatures: &Value) {
        self.signed_commits_required = Some(
            signatures
                .get("enabled")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        );
    }

    /// Summarize weekly commit activity. Returns false when the body is not
    /// a list of weeks (e.g. an empty 204 answer).
    pub fn apply_commit_activity(&mut self, stats: &Value) -> bool {
        let Some(weeks) = stats.as_array() else {
            return false;
        };
        self.commit_weeks = Some(weeks.len());
        self.commits_last_year = Some(
            weeks
                .iter()
                .filter_map(|w| w.get("total").and_then(Value::as_u64))
                .sum(),
        );
        true
    }

    /// The set fields as a merge payload.
    #[must_use]
    pub fn to_partial(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn listing_fields() {
        let fields = RepoFields::from_listing(&json!({
            "full_name": "acme/a",
            "name": "a",
            "owner": {"login": "acme"},
            "default_branch": "main",
            "archived": false,
            "visibility": "private"
        }));
        assert_eq!(fields.full_name.as_deref(), Some("acme/a"));
        assert_eq!(fields.owner.as_deref(), Some("acme"));
        assert_eq!(fields.default_branch.as_deref(), Some("main"));
        assert_eq!(fields.archived, Some(false));
        assert_eq!(fields.visibility.as_deref(), Some("private"));
    }

    #[test]
    fn protection_restrictions_and_enforcement() {
        let mut fields = RepoFields::default();
        fields.apply_protection(&json!({
            "enforce_admins": {"enabled": true},
            "restrictions": {
                "users": [{"login": "alice"}, {"login": "bob"}],
                "teams": [{"slug": "release"}]
            }
        }));
        assert_eq!(fields.enforce_admins, Some(true));
        assert_eq!(fields.restricted_user_count, Some(2));
        assert_eq!(fields.restricted_team_count, Some(1));
        assert_eq!(
            fields.restricted_users,
            Some(vec!["alice".to_string(), "bob".to_string()])
        );
    }

    #[test]
    fn protection_without_restrictions_counts_zero() {
        let mut fields = RepoFields::default();
        fields.apply_protection(&json!({"enforce_admins": {"enabled": false}}));
        assert_eq!(fields.enforce_admins, Some(false));
        assert_eq!(fields.restricted_user_count, Some(0));
        assert_eq!(fields.restricted_team_count, Some(0));
    }

    #[test]
    fn cleared_protection_overwrites_earlier_restrictions() {
        let mut fields = RepoFields::default();
        fields.apply_protection(&json!({
            "enforce_admins": {"enabled": true},
            "restrictions": {"users": [{"login": "alice"}], "teams": [{"slug": "ops"}]}
        }));
        fields.apply_signatures(&json!({"enabled": true}));

        fields.clear_protection();
        fields.clear_signatures();
        assert_eq!(fields.enforce_admins, Some(false));
        assert_eq!(fields.restricted_user_count, Some(0));
        assert_eq!(fields.restricted_team_count, Some(0));
        assert_eq!(fields.restricted_users, Some(Vec::new()));
        assert_eq!(fields.restricted_teams, Some(Vec::new()));
        assert_eq!(fields.signed_commits_required, Some(false));

        let partial = Value::Object(fields.to_partial());
        assert_eq!(partial["restricted_users"], json!([]));
        assert_eq!(partial["signed_commits_required"], json!(false));
    }

    #[test]
    fn commit_activity_summary() {
        let mut fields = RepoFields::default();
        assert!(fields.apply_commit_activity(&json!([
            {"total": 3, "week": 1, "days": [0, 1, 2, 0, 0, 0, 0]},
            {"total": 0, "week": 2, "days": [0, 0, 0, 0, 0, 0, 0]},
            {"total": 5, "week": 3, "days": [5, 0, 0, 0, 0, 0, 0]}
        ])));
        assert_eq!(fields.commit_weeks, Some(3));
        assert_eq!(fields.commits_last_year, Some(8));

        let mut untouched = RepoFields::default();
        assert!(!untouched.apply_commit_activity(&Value::Null));
        assert_eq!(untouched, RepoFields::default());
    }

    #[test]
    fn partial_contains_only_set_fields() {
        let mut fields = RepoFields::default();
        fields.apply_branch(&json!({"name": "main", "protected": false}));
        assert_eq!(Value::Object(fields.to_partial()), json!({"default_protected": false}));
    }
}
