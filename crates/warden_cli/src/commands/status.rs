use std::io::Write;
use std::path::Path;

use warden::compliance::{BranchCompliance, classify_store};
use warden::{SnapshotStore, org_from_arg};

/// Print the compliance classification of an organization's stored
/// repositories, one JSON object per line. Never touches the API.
pub(crate) async fn handle_status(
    org: &str,
    only: &[String],
    store_dir: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let org = org_from_arg(org).ok_or_else(|| format!("Not an organization: {org}"))?;
    let path = warden::db::store_path(store_dir, org);
    if !path.exists() {
        return Err(format!(
            "No snapshot store for {org} at {}; run `warden harvest {org}` first",
            path.display()
        )
        .into());
    }

    let store = SnapshotStore::open_for_org(store_dir, org).await?;
    match store.last_run().await? {
        Some(run) => tracing::info!(
            org,
            collected_as = %run.collected_as,
            collected_at = %run.collected_at,
            "Last harvest"
        ),
        None => tracing::warn!(org, "Store has no recorded harvest"),
    }

    let rows = classify_store(&store, only).await?;
    let stdout = std::io::stdout();
    write_rows(&mut stdout.lock(), &rows)?;
    Ok(())
}

fn write_rows(out: &mut impl Write, rows: &[BranchCompliance]) -> Result<(), Box<dyn std::error::Error>> {
    for row in rows {
        serde_json::to_writer(&mut *out, row)?;
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_json_lines() {
        let rows = vec![
            BranchCompliance {
                name: "acme/a".to_string(),
                protected: true,
                restricted: true,
                enforcement: true,
                signed: true,
                team_used: false,
            },
            BranchCompliance {
                name: "acme/b".to_string(),
                protected: false,
                restricted: false,
                enforcement: false,
                signed: false,
                team_used: false,
            },
        ];

        let mut out = Vec::new();
        write_rows(&mut out, &rows).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            r#"{"name":"acme/a","protected":true,"restricted":true,"enforcement":true,"signed":true,"team_used":false}"#
        );
    }

    #[tokio::test]
    async fn missing_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = handle_status("acme", &[], dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("No snapshot store for acme"));
    }
}
