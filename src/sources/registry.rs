//! Config-driven source registry.
//!
//! Builds the fallback chain from `[[sources]]` entries: clients are
//! constructed with their provider-specific settings, paired with a
//! shared per-source rate limiter, and ordered by ascending priority
//! with last-resort sources pinned to the end regardless of their
//! priority number.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, LookupField, SourceEntry};
use crate::sources::{
    AclSource, ArxivSource, CrossrefSource, EzproxySource, MdpiSource, OpenAlexSource,
    PublisherSource, SciHubSource, SemanticScholarSource, SourceClient, SourceKind,
    UnpaywallSource,
};
use crate::utils::{BrowserRenderer, HttpClient, SourceLimiter};

/// Static per-source policy, resolved from configuration at load time
/// and never mutated afterwards.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceDescriptor {
    pub name: String,
    pub priority: u32,
    pub enabled: bool,
    pub kind: SourceKind,
    pub last_resort: bool,
    pub interval: Duration,
    pub max_in_flight: usize,
}

/// One chain slot: policy, client, and the limiter shared by every
/// identifier in flight against this source.
#[derive(Debug, Clone)]
pub struct RegisteredSource {
    pub descriptor: SourceDescriptor,
    pub client: Arc<dyn SourceClient>,
    pub limiter: Arc<SourceLimiter>,
}

#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    entries: Vec<RegisteredSource>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown source in configuration: {0}")]
    UnknownSource(String),
}

impl SourceRegistry {
    /// Build the registry from configuration. Unknown source names are
    /// an error so typos do not silently drop a chain slot.
    pub fn from_config(config: &Config, http: &HttpClient) -> Result<Self, RegistryError> {
        let renderer = config.browser.command.as_ref().map(|cmd| {
            BrowserRenderer::new(
                cmd.clone(),
                Duration::from_secs(config.browser.render_timeout_secs),
            )
        });

        let mut entries = Vec::with_capacity(config.sources.len());
        for entry in &config.sources {
            let client = build_client(entry, http, renderer.as_ref())?;
            let (interval, max_in_flight) = config.limiter_for(entry);
            let descriptor = SourceDescriptor {
                name: entry.name.clone(),
                priority: entry.priority,
                enabled: entry.enabled,
                kind: client.kind(),
                last_resort: entry.last_resort || client.kind() == SourceKind::LastResort,
                interval,
                max_in_flight,
            };
            entries.push(RegisteredSource {
                descriptor,
                client,
                limiter: Arc::new(SourceLimiter::new(interval, max_in_flight)),
            });
        }

        let mut registry = Self { entries };
        registry.sort();
        Ok(registry)
    }

    /// Assemble a registry from pre-built parts; used by tests to
    /// inject scripted clients and unlimited limiters.
    pub fn from_parts(entries: Vec<RegisteredSource>) -> Self {
        let mut registry = Self { entries };
        registry.sort();
        registry
    }

    fn sort(&mut self) {
        self.entries
            .sort_by_key(|e| (e.descriptor.last_resort, e.descriptor.priority));
    }

    /// The effective fallback chain: enabled sources in attempt order.
    pub fn chain(&self) -> impl Iterator<Item = &RegisteredSource> {
        self.entries.iter().filter(|e| e.descriptor.enabled)
    }

    /// All registered sources, enabled or not, in chain order.
    pub fn all(&self) -> impl Iterator<Item = &RegisteredSource> {
        self.entries.iter()
    }

    pub fn enabled_len(&self) -> usize {
        self.chain().count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn build_client(
    entry: &SourceEntry,
    http: &HttpClient,
    renderer: Option<&BrowserRenderer>,
) -> Result<Arc<dyn SourceClient>, RegistryError> {
    let client: Arc<dyn SourceClient> = match entry.name.as_str() {
        "arxiv" => Arc::new(ArxivSource::new(http.clone())),
        "acl" => Arc::new(AclSource::new(http.clone())),
        "mdpi" => Arc::new(MdpiSource::new(http.clone())),
        "unpaywall" => Arc::new(UnpaywallSource::new(http.clone(), entry.email.clone())),
        "crossref" => Arc::new(CrossrefSource::new(
            http.clone(),
            entry.lookup_order.clone(),
        )),
        "openalex" => Arc::new(OpenAlexSource::new(http.clone())),
        "semantic" => Arc::new(SemanticScholarSource::new(
            http.clone(),
            entry.api_key.clone(),
        )),
        "publisher" => Arc::new(PublisherSource::new(http.clone(), renderer.cloned())),
        "ezproxy" => Arc::new(EzproxySource::new(
            http.clone(),
            entry.base_url.clone(),
            entry.session_cookie.clone(),
        )),
        "scihub" => {
            let mirrors = if entry.mirrors.is_empty() {
                vec!["https://sci-hub.se".to_string()]
            } else {
                entry.mirrors.clone()
            };
            Arc::new(SciHubSource::new(
                http.clone(),
                mirrors,
                entry
                    .lookup_order
                    .clone()
                    .or_else(|| Some(vec![LookupField::Title, LookupField::Doi])),
            ))
        }
        other => return Err(RegistryError::UnknownSource(other.to_string())),
    };
    Ok(client)
}
