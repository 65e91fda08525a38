//! Configuration file support for warden.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (prefixed with `WARDEN_`, sections separated by a
//!    double underscore, e.g. `WARDEN_HARVEST__MIN_CORE_QUOTA`)
//! 3. Config file (./warden.toml, then ~/.config/warden/config.toml)
//! 4. Built-in defaults
//!
//! Snapshot stores default to `~/.local/state/warden/stores` on Linux (the
//! XDG state directory) if `store.dir` is not configured.
//!
//! Example config file:
//! ```toml
//! [github]
//! token = "ghp_..."  # or use WARDEN_GITHUB__TOKEN / GITHUB_TOKEN
//! api_url = "https://ghe.example.com/api/v3"
//!
//! [store]
//! dir = "/var/lib/warden"
//!
//! [harvest]
//! min_core_quota = 25
//! min_search_quota = 5
//! max_attempts = 5
//! retry_base_delay_ms = 2000
//! requests_per_second = 10
//! max_pages = 1000
//! concurrent_orgs = false
//! ```

use std::path::PathBuf;
use std::time::Duration;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::Deserialize;
use warden::pagination::{DEFAULT_MAX_PAGES, DEFAULT_PER_PAGE};
use warden::rate_limit::DEFAULT_RPS;
use warden::{HarvestOptions, RetryConfig};

/// Public GitHub API.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub github: GitHubConfig,
    pub store: StoreConfig,
    pub harvest: HarvestConfig,
}

/// GitHub configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// Personal access token, attached as a bearer token.
    pub token: Option<String>,
    /// API base URL. Enterprise servers serve the API under `/api/v3`.
    pub api_url: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: DEFAULT_API_URL.to_string(),
        }
    }
}

/// Snapshot store location.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one `<org>.db` file per organization.
    pub dir: Option<PathBuf>,
}

/// Harvest tuning.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub min_core_quota: u64,
    pub min_search_quota: u64,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub requests_per_second: u32,
    pub max_pages: u32,
    pub concurrent_orgs: bool,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            min_core_quota: 25,
            min_search_quota: 5,
            max_attempts: 5,
            retry_base_delay_ms: 2000,
            requests_per_second: DEFAULT_RPS,
            max_pages: DEFAULT_MAX_PAGES,
            concurrent_orgs: false,
        }
    }
}

impl HarvestConfig {
    pub fn options(&self) -> HarvestOptions {
        HarvestOptions {
            min_core_quota: self.min_core_quota,
            min_search_quota: self.min_search_quota,
            retry: RetryConfig::new(
                Duration::from_millis(self.retry_base_delay_ms),
                self.max_attempts,
            ),
            per_page: DEFAULT_PER_PAGE,
            max_pages: self.max_pages,
        }
    }
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// Sources are loaded in order (later sources override earlier):
    /// 1. Built-in defaults
    /// 2. XDG config file (~/.config/warden/config.toml)
    /// 3. Local config file (./warden.toml)
    /// 4. Environment variables with WARDEN_ prefix
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        if let Some(xdg_config) = Self::default_config_path()
            && xdg_config.exists()
        {
            tracing::debug!("Loading config from {:?}", xdg_config);
            builder = builder.add_source(
                File::from(xdg_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        let local_config = PathBuf::from("warden.toml");
        if local_config.exists() {
            tracing::debug!("Loading config from ./warden.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        builder = builder.add_source(Self::environment());

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<Config>() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to deserialize config: {}", e);
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to build config: {}", e);
                Config::default()
            }
        }
    }

    /// `WARDEN_GITHUB__TOKEN` -> `github.token`. Keys themselves contain
    /// single underscores, so sections are split on a double one.
    fn environment() -> Environment {
        Environment::with_prefix("WARDEN")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    /// The configured token, falling back to the conventional `GITHUB_TOKEN`.
    pub fn github_token(&self) -> Option<String> {
        self.github
            .token
            .clone()
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
            .filter(|token| !token.trim().is_empty())
    }

    /// Directory for snapshot stores, falling back to the state directory.
    pub fn store_dir(&self) -> Option<PathBuf> {
        self.store
            .dir
            .clone()
            .or_else(|| Self::default_state_dir().map(|dir| dir.join("stores")))
    }

    /// Get the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "warden").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the default state directory path.
    ///
    /// On Linux, this is `$XDG_STATE_HOME/warden` or `~/.local/state/warden`.
    /// On macOS/Windows, falls back to the data directory.
    pub fn default_state_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "warden").map(|dirs| {
            dirs.state_dir()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| dirs.data_dir().to_path_buf())
        })
    }
}
