use std::collections::BTreeMap;

use clap::ValueEnum;
use warden::{QuotaBucket, RateGovernor, Shutdown};

use crate::commands::shared::build_client;
use crate::config::Config;

/// Output format for rate limit display.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Display as a formatted table (default)
    #[default]
    Table,
    /// Display as JSON
    Json,
}

/// Probe the rate limit endpoint and print every quota bucket.
pub(crate) async fn handle_limits(
    output: OutputFormat,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = build_client(config)?;
    let governor = RateGovernor::new(client, Shutdown::new())?;
    let buckets = governor.probe().await?;

    if buckets.is_empty() {
        println!("Rate limiting is not enabled on {}", config.github.api_url);
        return Ok(());
    }

    RateLimitDisplay::print_many(buckets_to_display(&buckets), output)
}

/// Rate limit information for display.
#[derive(Debug, Clone, serde::Serialize, tabled::Tabled)]
pub(crate) struct RateLimitDisplay {
    #[tabled(rename = "Resource")]
    pub resource: String,
    #[tabled(rename = "Limit")]
    pub limit: String,
    #[tabled(rename = "Used")]
    pub used: String,
    #[tabled(rename = "Remaining")]
    pub remaining: String,
    #[tabled(rename = "Usage %")]
    pub usage_percent: String,
    #[tabled(rename = "Resets At")]
    pub reset_at: String,
    #[tabled(rename = "Resets In")]
    pub reset_in: String,
}

impl RateLimitDisplay {
    pub(crate) fn from_bucket(bucket: &QuotaBucket) -> Self {
        let usage_percent = if bucket.limit > 0 {
            (bucket.used as f64 / bucket.limit as f64) * 100.0
        } else {
            0.0
        };
        let reset_duration = bucket.reset_at.signed_duration_since(chrono::Utc::now());
        let reset_in = if reset_duration.num_seconds() > 0 {
            format_duration(reset_duration)
        } else {
            "now".to_string()
        };

        Self {
            resource: bucket.name.clone(),
            limit: bucket.limit.to_string(),
            used: bucket.used.to_string(),
            remaining: bucket.remaining.to_string(),
            usage_percent: format!("{:.1}%", usage_percent),
            reset_at: bucket.reset_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            reset_in,
        }
    }

    pub(crate) fn print_many(
        items: Vec<Self>,
        format: OutputFormat,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match format {
            OutputFormat::Table => {
                let mut table = tabled::Table::new(items);
                table.with(tabled::settings::Style::rounded());
                println!("{}", table);
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&items)?);
            }
        }
        Ok(())
    }
}

/// One display row per bucket, ordered by bucket name.
pub(crate) fn buckets_to_display(buckets: &BTreeMap<String, QuotaBucket>) -> Vec<RateLimitDisplay> {
    buckets.values().map(RateLimitDisplay::from_bucket).collect()
}

/// Format a duration in a human-readable way.
fn format_duration(duration: chrono::Duration) -> String {
    let total_secs = duration.num_seconds();
    if total_secs < 60 {
        format!("{}s", total_secs)
    } else if total_secs < 3600 {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else {
        let hours = total_secs / 3600;
        let mins = (total_secs % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample_bucket(name: &str, limit: u64, used: u64) -> QuotaBucket {
        QuotaBucket {
            name: name.to_string(),
            limit,
            used,
            remaining: limit - used,
            reset_at: Utc.timestamp_opt(2_000_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn output_format_default_is_table() {
        assert!(matches!(OutputFormat::default(), OutputFormat::Table));
    }

    #[test]
    fn format_duration_handles_seconds_minutes_and_hours() {
        assert_eq!(format_duration(chrono::Duration::seconds(42)), "42s");
        assert_eq!(format_duration(chrono::Duration::seconds(120)), "2m");
        assert_eq!(format_duration(chrono::Duration::seconds(125)), "2m 5s");
        assert_eq!(format_duration(chrono::Duration::seconds(3600)), "1h");
        assert_eq!(format_duration(chrono::Duration::seconds(3900)), "1h 5m");
    }

    #[test]
    fn display_from_bucket_formats_percent_and_reset() {
        let display = RateLimitDisplay::from_bucket(&sample_bucket("core", 100, 25));

        assert_eq!(display.resource, "core");
        assert_eq!(display.limit, "100");
        assert_eq!(display.used, "25");
        assert_eq!(display.remaining, "75");
        assert_eq!(display.usage_percent, "25.0%");
        assert_eq!(display.reset_at, "2033-05-18 03:33:20 UTC");
    }

    #[test]
    fn buckets_are_displayed_in_name_order() {
        let buckets: BTreeMap<String, QuotaBucket> = [
            sample_bucket("search", 30, 5),
            sample_bucket("core", 5000, 10),
            sample_bucket("graphql", 5000, 0),
        ]
        .into_iter()
        .map(|b| (b.name.clone(), b))
        .collect();

        let names: Vec<String> = buckets_to_display(&buckets)
            .into_iter()
            .map(|d| d.resource)
            .collect();
        assert_eq!(names, vec!["core", "graphql", "search"]);
    }

    #[test]
    fn print_many_supports_json_and_table() {
        let items = vec![RateLimitDisplay::from_bucket(&sample_bucket("core", 10, 1))];

        // Smoke tests: this should not panic in either output mode.
        RateLimitDisplay::print_many(items.clone(), OutputFormat::Json).unwrap();
        RateLimitDisplay::print_many(items, OutputFormat::Table).unwrap();
    }
}
