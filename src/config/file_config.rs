//! TOML configuration file structures.
//!
//! The source chain is data, not code: operators reorder, disable, or
//! add sources by editing `[[sources]]` entries. A minimal file looks
//! like:
//!
//! ```toml
//! [downloads]
//! output_dir = "./papers"
//! skip_existing = true
//! concurrency = 3
//!
//! [rate_limits]
//! default_interval_ms = 1000
//! default_max_in_flight = 2
//!
//! [matcher]
//! threshold = 0.70
//!
//! [browser]
//! command = "chromium"
//! render_timeout_secs = 60
//!
//! [[sources]]
//! name = "arxiv"
//! priority = 1
//! enabled = true
//!
//! [[sources]]
//! name = "scihub"
//! enabled = false          # legal gray area; operator opt-in only
//! last_resort = true
//! lookup_order = ["title", "doi"]
//! mirrors = ["https://sci-hub.se"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub downloads: DownloadsConfig,

    #[serde(default)]
    pub rate_limits: RateLimitsConfig,

    #[serde(default)]
    pub matcher: MatcherConfig,

    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Source chain entries; missing sources get defaults appended.
    #[serde(default, rename = "sources")]
    pub sources: Vec<SourceEntry>,
}

/// Which identifier form a source tries first when both are usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupField {
    Doi,
    Title,
}

/// One `[[sources]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_priority")]
    pub priority: u32,

    /// Legal-gray-area sources are pinned to the end of the chain
    /// regardless of their priority number.
    #[serde(default)]
    pub last_resort: bool,

    /// Lookup preference for sources that can search by either field.
    #[serde(default)]
    pub lookup_order: Option<Vec<LookupField>>,

    /// Minimum inter-request interval override, milliseconds.
    #[serde(default)]
    pub interval_ms: Option<u64>,

    /// Max parallel in-flight requests override.
    #[serde(default)]
    pub max_in_flight: Option<usize>,

    /// Contact email (unpaywall requires one).
    #[serde(default)]
    pub email: Option<String>,

    /// API key (semantic scholar accepts one for higher quota).
    #[serde(default)]
    pub api_key: Option<String>,

    /// Proxy prefix for the authenticated institutional source.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Session cookie established out-of-band for the proxy source.
    #[serde(default)]
    pub session_cookie: Option<String>,

    /// Mirror list for the shadow-library source.
    #[serde(default)]
    pub mirrors: Vec<String>,
}

impl SourceEntry {
    pub fn new(name: &str, priority: u32) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            priority,
            last_resort: false,
            lookup_order: None,
            interval_ms: None,
            max_in_flight: None,
            email: None,
            api_key: None,
            base_url: None,
            session_cookie: None,
            mirrors: Vec::new(),
        }
    }

    fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn last_resort(mut self) -> Self {
        self.last_resort = true;
        self
    }
}

fn default_true() -> bool {
    true
}

fn default_priority() -> u32 {
    100
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadsConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_true")]
    pub skip_existing: bool,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            skip_existing: true,
            concurrency: default_concurrency(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./papers")
}

fn default_concurrency() -> usize {
    3
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RateLimitsConfig {
    #[serde(default = "default_interval_ms")]
    pub default_interval_ms: u64,

    #[serde(default = "default_max_in_flight")]
    pub default_max_in_flight: usize,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            default_interval_ms: default_interval_ms(),
            default_max_in_flight: default_max_in_flight(),
        }
    }
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_max_in_flight() -> usize {
    2
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MatcherConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

fn default_threshold() -> f64 {
    crate::utils::DEFAULT_THRESHOLD
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Headless browser binary; unset disables the render fallback.
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default = "default_render_timeout")]
    pub render_timeout_secs: u64,
}

fn default_render_timeout() -> u64 {
    60
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_lookup_secs")]
    pub lookup_secs: u64,

    #[serde(default = "default_fetch_secs")]
    pub fetch_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            lookup_secs: default_lookup_secs(),
            fetch_secs: default_fetch_secs(),
        }
    }
}

fn default_lookup_secs() -> u64 {
    20
}

fn default_fetch_secs() -> u64 {
    90
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub http: Option<String>,

    #[serde(default)]
    pub https: Option<String>,

    #[serde(default)]
    pub no_proxy: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// The built-in source chain, in default priority order. Sources
    /// an operator's file does not mention are appended with these
    /// settings.
    pub fn default_sources() -> Vec<SourceEntry> {
        vec![
            SourceEntry::new("arxiv", 1),
            SourceEntry::new("acl", 2),
            SourceEntry::new("mdpi", 3),
            SourceEntry::new("unpaywall", 4),
            SourceEntry::new("crossref", 5),
            SourceEntry::new("openalex", 6),
            SourceEntry::new("semantic", 7),
            SourceEntry::new("publisher", 8),
            SourceEntry::new("ezproxy", 9).disabled(),
            SourceEntry::new("scihub", 10).disabled().last_resort(),
        ]
    }

    /// Merge the built-in chain into this config: entries present in
    /// the file win, missing sources are appended with defaults.
    pub fn with_default_sources(mut self) -> Self {
        for default in Self::default_sources() {
            if !self.sources.iter().any(|s| s.name == default.name) {
                self.sources.push(default);
            }
        }
        self
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.lookup_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.fetch_secs)
    }

    /// Effective limiter settings for one source entry.
    pub fn limiter_for(&self, entry: &SourceEntry) -> (Duration, usize) {
        let interval = Duration::from_millis(
            entry
                .interval_ms
                .unwrap_or(self.rate_limits.default_interval_ms),
        );
        let in_flight = entry
            .max_in_flight
            .unwrap_or(self.rate_limits.default_max_in_flight);
        (interval, in_flight)
    }
}
