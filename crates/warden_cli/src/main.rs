//! Warden CLI - harvest GitHub branch protection state into local snapshot
//! stores and report on it offline.

mod commands;
mod config;
mod progress;
mod shutdown;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use console::Term;
use tracing_subscriber::EnvFilter;
use warden::Shutdown;

use crate::commands::harvest::HarvestArgs;
use crate::commands::limits::OutputFormat;

#[derive(Parser)]
#[command(name = "warden")]
#[command(version)]
#[command(about = "Harvest GitHub branch protection state into local snapshots")]
#[command(
    long_about = "Warden walks GitHub organizations and records branch protection, \
signature requirements, hook counts and commit activity for every repository \
into one SQLite snapshot per organization. Repeat runs use conditional requests \
so unchanged resources cost no quota, and reports run offline from the snapshots."
)]
#[command(after_long_help = r#"EXAMPLES
    Harvest two organizations:
        $ warden harvest acme globex

    Re-harvest a single repository:
        $ warden harvest acme --repo widgets

    Show the compliance state of stored repositories:
        $ warden status acme

    Find repositories mentioning a term:
        $ warden search --term AKIA acme

    Generate shell completions:
        $ warden completions bash > ~/.local/share/bash-completion/completions/warden

CONFIGURATION
    Warden reads configuration from:
      1. ~/.config/warden/config.toml (or $XDG_CONFIG_HOME/warden/config.toml)
      2. ./warden.toml
      3. Environment variables (WARDEN_ prefix, e.g. WARDEN_GITHUB__TOKEN)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    WARDEN_GITHUB__TOKEN      GitHub personal access token (GITHUB_TOKEN also works)
    WARDEN_GITHUB__API_URL    API base URL (default: https://api.github.com)
    WARDEN_STORE__DIR         Snapshot directory (default: ~/.local/state/warden/stores)
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest organizations into their snapshot stores
    Harvest {
        /// Organization name(s); `acme.db` is accepted for `acme`
        #[arg(required = true)]
        orgs: Vec<String>,

        /// Harvest only this repository (name within the organization)
        #[arg(short, long)]
        repo: Option<String>,

        /// Directory holding the snapshot stores
        #[arg(short = 'd', long)]
        store_dir: Option<PathBuf>,

        /// Harvest organizations concurrently
        #[arg(short, long)]
        concurrent: bool,
    },
    /// Show current rate limit status
    Limits {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// List repositories with files mentioning a term
    Search {
        /// Term to search for
        #[arg(short, long)]
        term: String,

        /// Organizations, users, or owner/repo names to search in
        #[arg(required = true)]
        scopes: Vec<String>,
    },
    /// Print the compliance state of stored repositories as JSON lines
    Status {
        /// Organization whose store to read
        org: String,

        /// Only these repositories (owner/name); may be repeated
        #[arg(long)]
        only: Vec<String>,

        /// Directory holding the snapshot stores
        #[arg(short = 'd', long)]
        store_dir: Option<PathBuf>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

fn init_tracing() {
    // Spinners own the terminal; only warnings interleave with them.
    let default = if Term::stderr().is_term() {
        "warden=warn,warden_cli=warn"
    } else {
        "warden=info,warden_cli=info"
    };
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(default),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// The error and every source beneath it, joined with ": ".
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !chain.contains(&cause_text) {
            chain.push_str(": ");
            chain.push_str(&cause_text);
        }
        source = cause.source();
    }
    chain
}

async fn run(cli: Cli, config: config::Config) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Completions { shell } => commands::meta::handle_completions(shell),
        Commands::Status {
            org,
            only,
            store_dir,
        } => {
            let store_dir = commands::shared::resolve_store_dir(store_dir, &config)?;
            commands::status::handle_status(&org, &only, &store_dir).await
        }
        Commands::Limits { output } => commands::limits::handle_limits(output, &config).await,
        Commands::Search { term, scopes } => {
            let shutdown = Shutdown::new();
            shutdown::setup_shutdown_handler(shutdown.clone());
            commands::search::handle_search(&term, &scopes, &config, shutdown).await
        }
        Commands::Harvest {
            orgs,
            repo,
            store_dir,
            concurrent,
        } => {
            let shutdown = Shutdown::new();
            shutdown::setup_shutdown_handler(shutdown.clone());
            let args = HarvestArgs {
                orgs,
                repo,
                store_dir,
                concurrent,
            };
            commands::harvest::handle_harvest(args, &config, shutdown).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    // Load configuration (config file -> env vars -> defaults)
    let config = config::Config::load();
    let cli = Cli::parse();

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", error_chain(e.as_ref()));
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_chain_includes_sources() {
        let inner = std::io::Error::other("disk full");
        let outer = warden::StoreError::from(inner);
        let chain = error_chain(&outer);
        assert!(chain.contains("disk full"));
    }

    #[test]
    fn parses_harvest_arguments() {
        let cli = Cli::try_parse_from([
            "warden",
            "harvest",
            "acme",
            "globex.db",
            "--repo",
            "widgets",
            "--concurrent",
        ])
        .expect("valid arguments");
        match cli.command {
            Commands::Harvest {
                orgs,
                repo,
                concurrent,
                store_dir,
            } => {
                assert_eq!(orgs, vec!["acme", "globex.db"]);
                assert_eq!(repo.as_deref(), Some("widgets"));
                assert!(concurrent);
                assert!(store_dir.is_none());
            }
            _ => panic!("expected harvest"),
        }
    }

    #[test]
    fn harvest_requires_an_org() {
        assert!(Cli::try_parse_from(["warden", "harvest"]).is_err());
    }

    #[test]
    fn status_accepts_repeated_only() {
        let cli = Cli::try_parse_from([
            "warden", "status", "acme", "--only", "acme/a", "--only", "acme/b",
        ])
        .expect("valid arguments");
        match cli.command {
            Commands::Status { org, only, .. } => {
                assert_eq!(org, "acme");
                assert_eq!(only, vec!["acme/a", "acme/b"]);
            }
            _ => panic!("expected status"),
        }
    }
}
