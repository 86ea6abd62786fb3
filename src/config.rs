use crate::metadata::RetryPolicy;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Book library manager with Google Books and Open Library search.
#[derive(Parser, Debug, Clone)]
#[command(name = "bookarr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "BOOKARR_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the server (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// Initialize database and create default config.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },

    /// Run a metadata search from the command line.
    Search {
        /// Search text.
        query: String,

        /// Search type: books, title, author or isbn.
        #[arg(short = 't', long = "type", default_value = "books")]
        mode: String,

        /// Author constraint for title searches.
        #[arg(short, long)]
        author: Option<String>,

        /// Number of results (1-40).
        #[arg(short = 'n', long, default_value_t = 10)]
        max_results: u32,
    },
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Metadata provider configuration.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Library listing configuration.
    #[serde(default)]
    pub library: LibraryConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Instance name shown by the health endpoint.
    #[serde(default = "default_title")]
    pub title: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            title: default_title(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        8080,
    )
}

fn default_title() -> String {
    "Bookarr".to_string()
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/bookarr.db")
}

/// Metadata provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Timeout for a single HTTP request, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Budget for one provider within a search, retries included, in seconds.
    #[serde(default = "default_provider_deadline")]
    pub provider_deadline_seconds: u64,

    /// Referer sent when the client request has no `Origin`.
    #[serde(default = "default_referer")]
    pub referer: String,

    /// Retry policy for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Google Books settings.
    #[serde(default)]
    pub google_books: GoogleBooksConfig,

    /// Open Library settings.
    #[serde(default)]
    pub open_library: OpenLibraryConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout(),
            provider_deadline_seconds: default_provider_deadline(),
            referer: default_referer(),
            retry: RetryConfig::default(),
            google_books: GoogleBooksConfig::default(),
            open_library: OpenLibraryConfig::default(),
        }
    }
}

impl ProvidersConfig {
    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }

    /// Per-provider deadline inside the aggregator.
    pub fn provider_deadline(&self) -> Duration {
        Duration::from_secs(self.provider_deadline_seconds.max(1))
    }
}

fn default_request_timeout() -> u64 {
    10
}

fn default_provider_deadline() -> u64 {
    30
}

fn default_referer() -> String {
    crate::metadata::DEFAULT_REFERER.to_string()
}

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first (1 disables retries).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds. Doubles per retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for a single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Convert to the transport's policy.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    2000
}

/// Google Books configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleBooksConfig {
    /// Include Google Books in searches.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// API key used when none is stored in the settings table.
    #[serde(default)]
    pub api_key: Option<String>,

    /// API root.
    #[serde(default = "default_google_base_url")]
    pub base_url: String,

    /// Restrict free-text searches to ebooks.
    #[serde(default)]
    pub ebooks_only: bool,
}

impl Default for GoogleBooksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            base_url: default_google_base_url(),
            ebooks_only: false,
        }
    }
}

fn default_google_base_url() -> String {
    crate::metadata::google_books::DEFAULT_BASE_URL.to_string()
}

/// Open Library configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenLibraryConfig {
    /// Include Open Library in searches.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// API root.
    #[serde(default = "default_open_library_base_url")]
    pub base_url: String,
}

impl Default for OpenLibraryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_open_library_base_url(),
        }
    }
}

fn default_open_library_base_url() -> String {
    crate::metadata::open_library::DEFAULT_BASE_URL.to_string()
}

fn default_true() -> bool {
    true
}

/// Library listing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Page size when the request does not give one (1-100).
    #[serde(default = "default_page_limit")]
    pub default_limit: u32,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_page_limit(),
        }
    }
}

fn default_page_limit() -> u32 {
    20
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> crate::error::Result<Self> {
        toml::from_str(content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("bookarr.toml"),
            dirs::config_dir()
                .map(|p| p.join("bookarr").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/bookarr/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# bookarr configuration

[server]
bind = "0.0.0.0:8080"
title = "Bookarr"

[database]
# path = "/var/lib/bookarr/bookarr.db"

[providers]
# Timeout for one HTTP request
request_timeout_seconds = 10
# Budget for one provider in a search, retries included
provider_deadline_seconds = 30
referer = "https://bookarr.localhost"

[providers.retry]
max_attempts = 3
base_delay_ms = 250
max_delay_ms = 2000

[providers.google_books]
enabled = true
# Keys saved under Settings > API Keys take precedence
# api_key = ""
ebooks_only = false

[providers.open_library]
enabled = true

[library]
# Page size for /api/books when no limit is given
default_limit = 20
"#
        .to_string()
    }
}
