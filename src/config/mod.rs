//! Configuration discovery and loading.
//!
//! Resolution order for the config file path:
//!
//! 1. explicit `--config` argument
//! 2. `PAPERCLAW_CONFIG` environment variable
//! 3. `./paperclaw.toml`
//! 4. `<config_dir>/paperclaw/config.toml`
//!
//! A missing file is not an error; the built-in defaults apply.

mod file_config;

pub use file_config::{
    BrowserConfig, Config, DownloadsConfig, LoggingConfig, LookupField, MatcherConfig,
    ProxyConfig, RateLimitsConfig, SourceEntry, TimeoutsConfig,
};

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Locate a config file without loading it.
pub fn find_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("PAPERCLAW_CONFIG") {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Some(path);
        }
    }

    let cwd = PathBuf::from("paperclaw.toml");
    if cwd.is_file() {
        return Some(cwd);
    }

    dirs::config_dir()
        .map(|d| d.join("paperclaw").join("config.toml"))
        .filter(|p| p.is_file())
}

/// Load configuration from `path`, or from the discovered location, or
/// fall back to defaults. The default source chain is always merged in.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => find_config_file(),
    };

    let config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            toml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })?
        }
        None => Config::default(),
    };

    Ok(config.with_default_sources())
}

/// Write a commented starter config to `path`.
pub fn write_default_config(path: &Path) -> Result<(), ConfigError> {
    const TEMPLATE: &str = r#"# paperclaw configuration

[downloads]
output_dir = "./papers"
skip_existing = true
concurrency = 3

[rate_limits]
default_interval_ms = 1000
default_max_in_flight = 2

[matcher]
# Candidate titles scoring below this are rejected as false positives.
threshold = 0.70

[browser]
# Headless browser used when a publisher blocks plain HTTP fetches.
# command = "chromium"
render_timeout_secs = 60

[timeouts]
lookup_secs = 20
fetch_secs = 90

# Per-source overrides. Sources not listed here use built-in defaults.
#
# [[sources]]
# name = "unpaywall"
# email = "you@example.org"
#
# [[sources]]
# name = "ezproxy"
# enabled = true
# base_url = "https://login.proxy.example.edu/login?url="
# session_cookie = "ezproxy=..."
#
# [[sources]]
# name = "scihub"
# enabled = true              # legal gray area; off by default
# lookup_order = ["title", "doi"]
# mirrors = ["https://sci-hub.se"]
"#;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }
    std::fs::write(path, TEMPLATE).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.sources.len(), 10);
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("paperclaw.toml");
        std::fs::write(&path, "[downloads]\nconcurrency = 7\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.downloads.concurrency, 7);
        assert_eq!(config.sources.len(), 10);
    }

    #[test]
    fn test_load_bad_file_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("paperclaw.toml");
        std::fs::write(&path, "not valid toml [").unwrap();

        assert!(matches!(
            load_config(Some(&path)),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_write_default_config_roundtrips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");
        write_default_config(&path).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.downloads.concurrency, 3);
        assert_eq!(config.matcher.threshold, 0.70);
    }
}
